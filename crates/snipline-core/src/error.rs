#![forbid(unsafe_code)]

//! Error types shared across the engine.

use crate::host::ElementId;

/// Failure reported by a [`Host`](crate::host::Host) operation.
///
/// Hosts translate page-side exceptions into these variants. The engine never
/// lets one escape to the page: callers degrade functionality instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The structural pattern could not be parsed by the host.
    InvalidSelector(String),
    /// The element is no longer attached to the document (or never was).
    Detached(ElementId),
    /// The host does not implement this operation for the given element.
    Unsupported(&'static str),
    /// The page raised an exception while the operation ran.
    Script(String),
}

impl core::fmt::Display for HostError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidSelector(sel) => write!(f, "invalid selector: {sel}"),
            Self::Detached(id) => write!(f, "element {} is detached", id.get()),
            Self::Unsupported(what) => write!(f, "unsupported: {what}"),
            Self::Script(msg) => write!(f, "script error: {msg}"),
        }
    }
}

impl std::error::Error for HostError {}

/// Failure to load or parse an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug)]
pub enum ConfigError {
    /// JSON deserialization failed.
    Json(serde_json::Error),
    /// TOML deserialization failed.
    #[cfg(feature = "toml-config")]
    Toml(toml::de::Error),
    /// The configuration parsed but violates range constraints.
    Invalid(Vec<String>),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Json(e) => write!(f, "JSON config error: {e}"),
            #[cfg(feature = "toml-config")]
            Self::Toml(e) => write!(f, "TOML config error: {e}"),
            Self::Invalid(errors) => write!(f, "invalid config: {}", errors.join("; ")),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            #[cfg(feature = "toml-config")]
            Self::Toml(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}
