#![forbid(unsafe_code)]

//! Policy-as-data configuration for the engine.
//!
//! Every timing constant and threshold the engine uses lives here, grouped by
//! component, so it can be tuned without a rebuild. The defaults reproduce the
//! engine's stock behavior.
//!
//! # Loading
//!
//! ```toml
//! # snipline.toml
//! [mutation]
//! burst_threshold = 12
//! extreme_threshold = 30
//!
//! [retry]
//! max_attempts = 10
//! ```
//!
//! ```rust,ignore
//! let config = EngineConfig::from_json_str(json)?;
//! let config = EngineConfig::from_toml_str(toml)?; // feature = "toml-config"
//! ```
//!
//! Missing sections and fields fall back to their defaults.

use serde::{Deserialize, Serialize};
use web_time::Duration;

use crate::error::ConfigError;

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mutation: MutationConfig,
    pub acquisition: AcquisitionConfig,
    pub navigation: NavigationConfig,
    pub retry: RetryConfig,
    pub trigger: TriggerConfig,
    pub insertion: InsertionConfig,
    pub panel: PanelConfig,
}

/// Adaptive throttling of mutation-driven re-scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    /// Debounce delay for a quiet page.
    pub base_delay_ms: u64,
    /// Ceiling for the doubled debounce delay.
    pub max_delay_ms: u64,
    /// Sliding window over which relevant mutations are counted.
    pub window_ms: u64,
    /// Burst size above which the delay doubles.
    pub burst_threshold: usize,
    /// Burst size above which mutation handling is suspended.
    pub extreme_threshold: usize,
    /// Length of the suspension.
    pub cooldown_ms: u64,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 150,
            max_delay_ms: 2_000,
            window_ms: 2_000,
            burst_threshold: 10,
            extreme_threshold: 20,
            cooldown_ms: 5_000,
        }
    }
}

/// Target acquisition memoization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Lifetime of a memoized acquisition result.
    pub cache_ttl_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 2_000,
        }
    }
}

/// In-page navigation detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Safety-net location poll interval.
    pub poll_interval_ms: u64,
    /// Delay between a detected navigation and the first re-scan.
    pub settle_delay_ms: u64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            settle_delay_ms: 500,
        }
    }
}

/// Custom-site positioning backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    /// Initial growth factor of the delay.
    pub initial_multiplier: f64,
    /// Added to the multiplier on every attempt.
    pub multiplier_step: f64,
    /// Symmetric jitter fraction (0.15 = ±15 %).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 200,
            max_delay_ms: 8_000,
            max_attempts: 20,
            initial_multiplier: 1.3,
            multiplier_step: 0.05,
            jitter: 0.15,
        }
    }
}

/// Trigger control placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// How many times to look for a strategy's control bar before floating.
    pub bar_attempts: u32,
    /// How many times to look for the reference sibling inside a found bar.
    pub sibling_attempts: u32,
    /// Delay between bar/sibling lookups.
    pub retry_delay_ms: u64,
    /// Edge length of the floating control.
    pub floating_size: f64,
    /// Inset of the floating control from the editor's bottom-right corner.
    pub floating_inset: f64,
    pub floating_z_index: i32,
    pub label: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            bar_attempts: 3,
            sibling_attempts: 5,
            retry_delay_ms: 300,
            floating_size: 28.0,
            floating_inset: 8.0,
            floating_z_index: 2_147_483_000,
            label: "Insert snippet".into(),
        }
    }
}

/// Where inserted content lands relative to existing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InsertMode {
    /// Move the caret to the end and append.
    #[default]
    Append,
    /// Focus, wait for the surface to settle, select everything, then insert.
    Replace,
}

/// Insertion behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsertionConfig {
    pub mode: InsertMode,
    /// Content longer than this (in chars) is truncated before insertion.
    pub max_content_chars: usize,
    /// Bounded wait between focus and select-all in replace mode.
    pub focus_settle_ms: u64,
    /// Run the unverified legacy routine after every strategy failed.
    pub legacy_fallback: bool,
}

impl Default for InsertionConfig {
    fn default() -> Self {
        Self {
            mode: InsertMode::Append,
            max_content_chars: 100_000,
            focus_settle_ms: 60,
            legacy_fallback: true,
        }
    }
}

/// Selection panel presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    /// Fixed list height in pixels.
    pub max_height: f64,
    /// Characters of content shown under each title.
    pub preview_chars: usize,
    /// Lifetime of an inline status message.
    pub status_ttl_ms: u64,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            max_height: 320.0,
            preview_chars: 80,
            status_ttl_ms: 3_000,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON string and validate.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s).map_err(ConfigError::Json)?;
        config.into_validated()
    }

    /// Load from a TOML string and validate.
    #[cfg(feature = "toml-config")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(ConfigError::Toml)?;
        config.into_validated()
    }

    fn into_validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Validate all parameters are within acceptable ranges.
    ///
    /// Returns a list of validation errors. An empty list means the config
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let m = &self.mutation;
        if m.base_delay_ms > m.max_delay_ms {
            errors.push(format!(
                "mutation.base_delay_ms ({}) must be <= mutation.max_delay_ms ({})",
                m.base_delay_ms, m.max_delay_ms
            ));
        }
        if m.window_ms == 0 {
            errors.push("mutation.window_ms must be > 0".into());
        }
        if m.extreme_threshold <= m.burst_threshold {
            errors.push(format!(
                "mutation.extreme_threshold ({}) must be > mutation.burst_threshold ({})",
                m.extreme_threshold, m.burst_threshold
            ));
        }

        let r = &self.retry;
        if r.base_delay_ms == 0 {
            errors.push("retry.base_delay_ms must be > 0".into());
        }
        if r.base_delay_ms > r.max_delay_ms {
            errors.push(format!(
                "retry.base_delay_ms ({}) must be <= retry.max_delay_ms ({})",
                r.base_delay_ms, r.max_delay_ms
            ));
        }
        if !(r.initial_multiplier >= 1.0) {
            errors.push(format!(
                "retry.initial_multiplier must be >= 1, got {}",
                r.initial_multiplier
            ));
        }
        if !(r.multiplier_step >= 0.0) {
            errors.push(format!(
                "retry.multiplier_step must be >= 0, got {}",
                r.multiplier_step
            ));
        }
        if !(0.0..1.0).contains(&r.jitter) {
            errors.push(format!("retry.jitter must be in [0, 1), got {}", r.jitter));
        }

        if self.navigation.poll_interval_ms == 0 {
            errors.push("navigation.poll_interval_ms must be > 0".into());
        }
        if self.insertion.max_content_chars == 0 {
            errors.push("insertion.max_content_chars must be > 0".into());
        }
        if !(self.trigger.floating_size > 0.0) {
            errors.push(format!(
                "trigger.floating_size must be > 0, got {}",
                self.trigger.floating_size
            ));
        }
        if !(self.panel.max_height > 0.0) {
            errors.push(format!(
                "panel.max_height must be > 0, got {}",
                self.panel.max_height
            ));
        }

        errors
    }
}

impl MutationConfig {
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl RetryConfig {
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}
