#![forbid(unsafe_code)]

//! Custom-site configuration as produced by the external element picker.
//!
//! Wire shape (camelCase JSON):
//!
//! ```json
//! {
//!   "hostname": "support.example.com",
//!   "enabled": true,
//!   "positioning": {
//!     "mode": "custom",
//!     "selector": "#composer .toolbar",
//!     "placement": "inside-end",
//!     "offset": { "x": 4, "y": 0 },
//!     "zIndex": 1000
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};

/// Where a control goes relative to its anchor element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    Before,
    After,
    InsideStart,
    #[default]
    InsideEnd,
}

impl Placement {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
            Self::InsideStart => "inside-start",
            Self::InsideEnd => "inside-end",
        }
    }
}

/// Pixel nudge applied to a placed control.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Offset {
    pub x: f64,
    pub y: f64,
}

/// How the trigger for a custom site is positioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PositionMode {
    /// Use the built-in or floating placement.
    #[default]
    Auto,
    /// Use the declared selector and placement.
    Custom,
}

/// Positioning block of a custom-site entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Positioning {
    pub mode: PositionMode,
    pub selector: Option<String>,
    pub placement: Placement,
    pub offset: Offset,
    pub z_index: Option<i32>,
}

/// One user-declared site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomSiteConfig {
    pub hostname: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub positioning: Positioning,
}

impl CustomSiteConfig {
    /// The declared selector, if this entry asks for custom positioning.
    ///
    /// Disabled entries, `auto` mode and blank selectors all fall back to
    /// default placement.
    #[must_use]
    pub fn custom_selector(&self) -> Option<&str> {
        if !self.enabled || self.positioning.mode != PositionMode::Custom {
            return None;
        }
        self.positioning
            .selector
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Whether this entry applies to `hostname` (exact or `www.`-insensitive).
    #[must_use]
    pub fn applies_to(&self, hostname: &str) -> bool {
        strip_www(&self.hostname).eq_ignore_ascii_case(strip_www(hostname))
    }
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}
