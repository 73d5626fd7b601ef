#![forbid(unsafe_code)]

//! Messages exchanged with the external controller and asynchronous requests
//! the engine hands to its host.
//!
//! Controller messages use the action names of the cross-context channel:
//!
//! ```json
//! {"action":"ACTIVATE"}
//! {"action":"SETTINGS_UPDATED","settings":{"panel":{"status_ttl_ms":4000}}}
//! ```
//!
//! Every message is answered with an [`Ack`].

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

/// Command from the external controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    Activate,
    Deactivate,
    SettingsUpdated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        settings: Option<EngineConfig>,
    },
    Reinitialize,
}

impl ControlMessage {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Activate => "ACTIVATE",
            Self::Deactivate => "DEACTIVATE",
            Self::SettingsUpdated { .. } => "SETTINGS_UPDATED",
            Self::Reinitialize => "REINITIALIZE",
        }
    }
}

/// Acknowledgement sent back over the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
}

impl Ack {
    pub const OK: Self = Self { success: true };
    pub const FAILED: Self = Self { success: false };
}

/// Asynchronous work the engine needs the host to perform.
///
/// Each request is answered by the host with the matching session event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostRequest {
    /// Is this origin enabled (built-in or custom)?
    CheckSiteEnabled { hostname: String },
    /// Read the custom-site entry for this hostname, if any.
    LoadCustomSite { hostname: String },
    /// `getStoredSnippets()`.
    LoadSnippets,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_controller_actions() {
        let msg: ControlMessage = serde_json::from_str(r#"{"action":"ACTIVATE"}"#).unwrap();
        assert_eq!(msg, ControlMessage::Activate);
        let msg: ControlMessage =
            serde_json::from_str(r#"{"action":"SETTINGS_UPDATED"}"#).unwrap();
        assert_eq!(msg, ControlMessage::SettingsUpdated { settings: None });
        let msg: ControlMessage = serde_json::from_str(r#"{"action":"REINITIALIZE"}"#).unwrap();
        assert_eq!(msg.name(), "REINITIALIZE");
    }

    #[test]
    fn settings_payload_is_partial() {
        let msg: ControlMessage = serde_json::from_str(
            r#"{"action":"SETTINGS_UPDATED","settings":{"panel":{"status_ttl_ms":4000}}}"#,
        )
        .unwrap();
        let ControlMessage::SettingsUpdated {
            settings: Some(cfg),
        } = msg
        else {
            panic!("expected settings payload");
        };
        assert_eq!(cfg.panel.status_ttl_ms, 4000);
        assert_eq!(cfg.mutation, EngineConfig::default().mutation);
    }

    #[test]
    fn ack_and_request_wire_shapes() {
        assert_eq!(serde_json::to_string(&Ack::OK).unwrap(), r#"{"success":true}"#);
        let req = HostRequest::CheckSiteEnabled {
            hostname: "claude.ai".into(),
        };
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"kind":"check_site_enabled","hostname":"claude.ai"}"#
        );
    }
}
