#![forbid(unsafe_code)]

//! Custom-site trigger placement with backoff.
//!
//! A custom-site entry names a selector and a placement rule. The declared
//! element often renders late, so placement retries until it resolves to an
//! element that is attached, has a real box, and is actually on top at its own
//! center point.
//!
//! # Retry state machine
//!
//! ```text
//!            begin            fail (attempts < max)
//!   Idle ───────────▶ Attempting ───────────────▶ Waiting ──┐
//!    ▲                   │  │                        ▲      │ begin
//!    │ reset             │  └── fail (attempts = max) ─▶ Exhausted
//!    │                   └── success ─▶ Placed       └──────┘
//! ```
//!
//! Delays grow by a slowly increasing multiplier with symmetric jitter and
//! are clamped to `[base, max]`. A new epoch or a selector change resets the
//! machine.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use snipline_core::config::RetryConfig;
use snipline_core::host::{ElementId, ElementProbe, Host};
use snipline_core::site::{CustomSiteConfig, Offset, Placement};
use tracing::{debug, trace};
use web_time::Duration;

/// Phase of the retry state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    Idle,
    Waiting,
    Attempting,
    Placed,
    Exhausted,
}

/// Backoff bookkeeping for one selector within one epoch.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempts: u32,
    max_attempts: u32,
    base: Duration,
    current: Duration,
    max: Duration,
    initial_multiplier: f64,
    multiplier_step: f64,
    jitter: f64,
    selector: Option<String>,
    placement: Placement,
    phase: RetryPhase,
}

impl RetryState {
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            attempts: 0,
            max_attempts: config.max_attempts,
            base: config.base_delay(),
            current: config.base_delay(),
            max: config.max_delay(),
            initial_multiplier: config.initial_multiplier,
            multiplier_step: config.multiplier_step,
            jitter: config.jitter,
            selector: None,
            placement: Placement::default(),
            phase: RetryPhase::Idle,
        }
    }

    /// Point the machine at `selector`; resets when anything changed.
    pub fn configure(&mut self, selector: Option<&str>, placement: Placement) -> bool {
        let changed = self.selector.as_deref() != selector || self.placement != placement;
        if changed {
            self.selector = selector.map(str::to_string);
            self.placement = placement;
            self.reset();
        }
        changed
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current = self.base;
        self.phase = RetryPhase::Idle;
    }

    /// Enter `Attempting`; `false` once placed or exhausted.
    pub fn begin(&mut self) -> bool {
        match self.phase {
            RetryPhase::Idle | RetryPhase::Waiting | RetryPhase::Attempting => {
                self.phase = RetryPhase::Attempting;
                true
            }
            RetryPhase::Placed | RetryPhase::Exhausted => false,
        }
    }

    pub fn succeed(&mut self) {
        self.phase = RetryPhase::Placed;
    }

    /// Record a failed attempt; the delay before the next one, or `None`
    /// once the attempt budget is spent.
    pub fn fail<R: Rng>(&mut self, rng: &mut R) -> Option<Duration> {
        if self.attempts < self.max_attempts {
            self.attempts += 1;
        }
        if self.attempts >= self.max_attempts {
            self.phase = RetryPhase::Exhausted;
            return None;
        }
        self.current = self.next_delay(rng);
        self.phase = RetryPhase::Waiting;
        Some(self.current)
    }

    fn next_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        let multiplier = self.initial_multiplier + self.multiplier_step * f64::from(self.attempts);
        let spread = if self.jitter > 0.0 {
            rng.random_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        let base_ms = self.base.as_secs_f64() * 1_000.0;
        let max_ms = self.max.as_secs_f64() * 1_000.0;
        let raw = self.current.as_secs_f64() * 1_000.0 * multiplier * (1.0 + spread);
        let clamped = if raw.is_finite() {
            raw.clamp(base_ms, max_ms)
        } else {
            max_ms
        };
        Duration::from_millis(clamped.round() as u64)
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max
    }

    #[must_use]
    pub fn phase(&self) -> RetryPhase {
        self.phase
    }

    #[must_use]
    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }
}

/// Why the declared element was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotFound,
    InvalidSelector,
    Detached,
    Degenerate,
    /// Something else is on top at the element's center.
    Occluded,
}

/// Resolve `selector` to the first acceptable element.
pub fn validate_target(
    host: &dyn Host,
    selector: &str,
) -> Result<(ElementId, ElementProbe), Rejection> {
    let found = host
        .query_all(selector)
        .map_err(|_| Rejection::InvalidSelector)?;
    let mut first_rejection = Rejection::NotFound;
    for (i, el) in found.into_iter().enumerate() {
        match check(host, el) {
            Ok(probe) => return Ok((el, probe)),
            Err(rejection) if i == 0 => first_rejection = rejection,
            Err(_) => {}
        }
    }
    Err(first_rejection)
}

fn check(host: &dyn Host, el: ElementId) -> Result<ElementProbe, Rejection> {
    let probe = host.probe(el).ok_or(Rejection::Detached)?;
    if !probe.connected {
        return Err(Rejection::Detached);
    }
    if probe.rect.is_degenerate() {
        return Err(Rejection::Degenerate);
    }
    match host.element_at_point(probe.rect.center()) {
        Some(hit) if hit == el || host.contains(el, hit) => Ok(probe),
        _ => Err(Rejection::Occluded),
    }
}

/// Result of one placement attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomAttempt {
    /// No custom positioning for this site.
    Inactive,
    Resolved {
        anchor: ElementId,
        placement: Placement,
        offset: Offset,
        z_index: Option<i32>,
    },
    /// Try again after this delay.
    Retry(Duration),
    /// Attempts spent for this epoch.
    Exhausted,
}

/// Custom-site placement driver.
#[derive(Debug, Clone)]
pub struct CustomSitePositioner {
    site: Option<CustomSiteConfig>,
    retry: RetryState,
    rng: SmallRng,
}

impl CustomSitePositioner {
    #[must_use]
    pub fn new(config: &RetryConfig, seed: u64) -> Self {
        Self {
            site: None,
            retry: RetryState::new(config),
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn set_config(&mut self, config: &RetryConfig) {
        let selector = self.retry.selector.clone();
        let placement = self.retry.placement;
        self.retry = RetryState::new(config);
        self.retry.selector = selector;
        self.retry.placement = placement;
    }

    /// Install the site entry; returns whether the target changed.
    pub fn set_site(&mut self, site: Option<CustomSiteConfig>) -> bool {
        let placement = site
            .as_ref()
            .map_or(Placement::default(), |s| s.positioning.placement);
        let selector = site
            .as_ref()
            .and_then(CustomSiteConfig::custom_selector)
            .map(str::to_string);
        self.site = site;
        let changed = self.retry.configure(selector.as_deref(), placement);
        if changed {
            debug!(selector = ?selector, placement = placement.as_str(), "custom placement target changed");
        }
        changed
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.retry.selector().is_some()
    }

    #[must_use]
    pub fn retry(&self) -> &RetryState {
        &self.retry
    }

    /// Epoch boundary: attempts back to zero, delay back to base.
    pub fn reset_epoch(&mut self) {
        self.retry.reset();
    }

    /// Try to resolve the declared element once.
    pub fn attempt(&mut self, host: &dyn Host) -> CustomAttempt {
        let Some(selector) = self.retry.selector().map(str::to_string) else {
            return CustomAttempt::Inactive;
        };
        if !self.retry.begin() {
            return match self.retry.phase() {
                RetryPhase::Exhausted => CustomAttempt::Exhausted,
                _ => self.resolve(host, &selector),
            };
        }
        self.resolve(host, &selector)
    }

    fn resolve(&mut self, host: &dyn Host, selector: &str) -> CustomAttempt {
        match validate_target(host, selector) {
            Ok((anchor, _)) => {
                self.retry.succeed();
                let positioning = self
                    .site
                    .as_ref()
                    .map(|s| s.positioning.clone())
                    .unwrap_or_default();
                CustomAttempt::Resolved {
                    anchor,
                    placement: positioning.placement,
                    offset: positioning.offset,
                    z_index: positioning.z_index,
                }
            }
            Err(rejection) => match self.retry.fail(&mut self.rng) {
                Some(delay) => {
                    trace!(
                        %selector,
                        ?rejection,
                        attempt = self.retry.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "custom target not ready"
                    );
                    CustomAttempt::Retry(delay)
                }
                None => {
                    debug!(%selector, ?rejection, attempts = self.retry.attempts(), "custom placement abandoned for this epoch");
                    CustomAttempt::Exhausted
                }
            },
        }
    }
}
