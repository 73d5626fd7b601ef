#![forbid(unsafe_code)]

//! The single timer table that drives every delayed action.
//!
//! Each purpose ([`TimerKind`]) owns at most one pending deadline. Scheduling
//! a kind that is already pending replaces its deadline, so there is never a
//! double re-scan or two overlapping retries: debounce, backoff, and cool-down
//! all reduce to "cancel and reschedule".
//!
//! The host asks for [`TimerScheduler::next_deadline`], arms one real timer
//! for it, and calls back into the session, which drains
//! [`TimerScheduler::take_due`].

use std::collections::BTreeMap;

use web_time::Duration;

/// Purpose of a pending timer. Ordering is the tie-break for equal deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Debounced target re-scan.
    Rescan,
    /// Safety-net location poll for in-page navigation.
    NavigationPoll,
    /// Delay after a navigation before the first re-scan of the new view.
    NavigationSettle,
    /// End of the extreme-load mutation suspension.
    MutationCooldown,
    /// Bounded retry while a control bar or its reference sibling renders.
    TriggerRetry,
    /// Backoff step of the custom-site positioner.
    CustomRetry,
    /// Wait between focusing a surface and selecting its content.
    FocusSettle,
    /// Expiry of the panel's transient status message.
    StatusExpiry,
}

impl TimerKind {
    /// Stable label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rescan => "rescan",
            Self::NavigationPoll => "navigation_poll",
            Self::NavigationSettle => "navigation_settle",
            Self::MutationCooldown => "mutation_cooldown",
            Self::TriggerRetry => "trigger_retry",
            Self::CustomRetry => "custom_retry",
            Self::FocusSettle => "focus_settle",
            Self::StatusExpiry => "status_expiry",
        }
    }
}

/// Keyed one-shot timers on host-driven time.
#[derive(Debug, Clone, Default)]
pub struct TimerScheduler {
    pending: BTreeMap<TimerKind, Duration>,
}

impl TimerScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` to fire at `now + delay`, replacing any pending deadline.
    ///
    /// Returns `true` if a pending timer was replaced.
    pub fn schedule(&mut self, kind: TimerKind, now: Duration, delay: Duration) -> bool {
        let deadline = now.saturating_add(delay);
        let replaced = self.pending.insert(kind, deadline).is_some();
        tracing::trace!(
            timer = kind.as_str(),
            deadline_ms = deadline.as_millis() as u64,
            replaced,
            "timer scheduled"
        );
        replaced
    }

    /// Cancel a pending timer. Returns `true` if one was pending.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.pending.remove(&kind).is_some()
    }

    #[must_use]
    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.pending.contains_key(&kind)
    }

    #[must_use]
    pub fn deadline(&self, kind: TimerKind) -> Option<Duration> {
        self.pending.get(&kind).copied()
    }

    /// Earliest pending deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.pending.values().copied().min()
    }

    /// Remove and return every timer due at `now`, ordered by deadline then kind.
    pub fn take_due(&mut self, now: Duration) -> Vec<TimerKind> {
        let mut due: Vec<(Duration, TimerKind)> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(kind, deadline)| (*deadline, *kind))
            .collect();
        due.sort();
        for (_, kind) in &due {
            self.pending.remove(kind);
        }
        due.into_iter().map(|(_, kind)| kind).collect()
    }

    /// Cancel everything except `keep`. Returns how many timers were dropped.
    pub fn clear_except(&mut self, keep: &[TimerKind]) -> usize {
        let before = self.pending.len();
        self.pending.retain(|kind, _| keep.contains(kind));
        before - self.pending.len()
    }

    /// Cancel every pending timer.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
