#![forbid(unsafe_code)]

//! Change monitor: classify mutation batches and throttle re-scans.
//!
//! # Relevance
//!
//! A batch is relevant when it adds something that is, or contains, an
//! editing-surface-like element, or changes an observed attribute on such an
//! element. Checks run cheapest first: text nodes are skipped outright, tag
//! names and attribute hints are inspected next, and a subtree query is only
//! issued for added elements that have element children.
//!
//! # Budget
//!
//! [`MutationBudget`] counts relevant mutations over a sliding window:
//!
//! ```text
//! n <= burst            delay = current (base on a quiet page)
//! burst < n <= extreme  delay = min(current * 2, max)
//! n > extreme           suspended for the cool-down, then reset
//! ```
//!
//! The delay only grows while the window is non-empty and drops back to base
//! once it empties, so one settled burst produces exactly one re-scan through
//! the debounce timer.

use std::collections::VecDeque;

use snipline_core::config::MutationConfig;
use snipline_core::host::{ElementId, Host, MutationFilter, MutationRecord};
use tracing::{debug, trace, warn};
use web_time::Duration;

/// Attributes whose changes can turn an element into (or out of) an editor.
pub const OBSERVED_ATTRIBUTES: [&str; 6] = [
    "contenteditable",
    "disabled",
    "readonly",
    "role",
    "hidden",
    "aria-hidden",
];

const EDITABLE_DESCENDANTS: &str = "textarea, input, [contenteditable], [role='textbox']";

/// What to do about one relevant mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    /// (Re)arm the debounced re-scan with this delay.
    Schedule(Duration),
    /// Handling is suspended; drop the mutation.
    Suspended,
}

/// Adaptive mutation throttle.
#[derive(Debug, Clone)]
pub struct MutationBudget {
    base: Duration,
    current: Duration,
    max: Duration,
    window: Duration,
    burst_threshold: usize,
    extreme_threshold: usize,
    cooldown: Duration,
    events: VecDeque<Duration>,
    throttled_until: Option<Duration>,
}

impl MutationBudget {
    #[must_use]
    pub fn new(config: &MutationConfig) -> Self {
        Self {
            base: config.base_delay(),
            current: config.base_delay(),
            max: config.max_delay(),
            window: config.window(),
            burst_threshold: config.burst_threshold,
            extreme_threshold: config.extreme_threshold,
            cooldown: config.cooldown(),
            events: VecDeque::new(),
            throttled_until: None,
        }
    }

    /// Record one relevant mutation at `now`.
    pub fn record(&mut self, now: Duration) -> BudgetDecision {
        if self.throttled_until.is_some() {
            return BudgetDecision::Suspended;
        }

        while self
            .events
            .front()
            .is_some_and(|t| now.saturating_sub(*t) > self.window)
        {
            self.events.pop_front();
        }
        if self.events.is_empty() {
            self.current = self.base;
        }

        self.events.push_back(now);
        let n = self.events.len();

        if n > self.extreme_threshold {
            let until = now + self.cooldown;
            self.throttled_until = Some(until);
            warn!(
                events = n,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "mutation storm, suspending re-scans"
            );
            return BudgetDecision::Suspended;
        }
        if n > self.burst_threshold {
            self.current = (self.current * 2).min(self.max);
            trace!(
                events = n,
                delay_ms = self.current.as_millis() as u64,
                "mutation burst"
            );
        }
        BudgetDecision::Schedule(self.current)
    }

    /// End of the cool-down: clear history and return to the base delay.
    pub fn resume(&mut self) {
        self.reset();
    }

    /// Epoch boundary reset.
    pub fn reset(&mut self) {
        self.events.clear();
        self.current = self.base;
        self.throttled_until = None;
    }

    #[must_use]
    pub fn is_throttled(&self) -> bool {
        self.throttled_until.is_some()
    }

    #[must_use]
    pub fn throttled_until(&self) -> Option<Duration> {
        self.throttled_until
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
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
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

/// Result of handing one batch to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Nothing relevant in the batch.
    Ignored,
    /// Re-arm the re-scan timer.
    Rescan(Duration),
    /// This batch tipped the budget into suspension.
    Throttled { cooldown: Duration },
    /// Already suspended.
    Suspended,
}

/// Mutation subscription owner and classifier.
#[derive(Debug, Clone)]
pub struct ChangeMonitor {
    budget: MutationBudget,
}

impl ChangeMonitor {
    #[must_use]
    pub fn new(config: &MutationConfig) -> Self {
        Self {
            budget: MutationBudget::new(config),
        }
    }

    pub fn set_config(&mut self, config: &MutationConfig) {
        self.budget = MutationBudget::new(config);
    }

    #[must_use]
    pub fn budget(&self) -> &MutationBudget {
        &self.budget
    }

    pub fn budget_mut(&mut self) -> &mut MutationBudget {
        &mut self.budget
    }

    /// Subscription filter for `scope` (`None` = whole body).
    #[must_use]
    pub fn filter(scope: Option<ElementId>) -> MutationFilter {
        MutationFilter {
            scope,
            attributes: OBSERVED_ATTRIBUTES.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    /// Resolve the narrowest observation root for `scope_pattern`.
    #[must_use]
    pub fn resolve_scope(host: &dyn Host, scope_pattern: Option<&str>) -> Option<ElementId> {
        let pattern = scope_pattern?;
        match host.query_all(pattern) {
            Ok(found) => found.into_iter().find(|el| host.probe(*el).is_some_and(|p| p.connected)),
            Err(err) => {
                debug!(%pattern, error = %err, "observation scope unavailable, using body");
                None
            }
        }
    }

    /// Classify `records` and feed relevant ones to the budget.
    ///
    /// `editor` is the current editing surface; its removal is relevant.
    pub fn on_batch(
        &mut self,
        host: &dyn Host,
        records: &[MutationRecord],
        editor: Option<ElementId>,
        now: Duration,
    ) -> MonitorOutcome {
        if self.budget.is_throttled() {
            return MonitorOutcome::Suspended;
        }
        let relevant = relevant_records(host, records, editor);
        if relevant == 0 {
            return MonitorOutcome::Ignored;
        }
        // Each relevant record counts toward the burst window on its own.
        let mut delay = self.budget.base_delay();
        for _ in 0..relevant {
            match self.budget.record(now) {
                BudgetDecision::Schedule(next) => delay = next,
                BudgetDecision::Suspended => {
                    return MonitorOutcome::Throttled {
                        cooldown: self.budget.cooldown(),
                    };
                }
            }
        }
        MonitorOutcome::Rescan(delay)
    }
}

/// Whether any record in the batch can affect acquisition.
#[must_use]
pub fn is_relevant(host: &dyn Host, records: &[MutationRecord], editor: Option<ElementId>) -> bool {
    records
        .iter()
        .any(|record| record_is_relevant(host, record, editor))
}

/// Number of records in the batch that can affect acquisition.
#[must_use]
pub fn relevant_records(
    host: &dyn Host,
    records: &[MutationRecord],
    editor: Option<ElementId>,
) -> usize {
    records
        .iter()
        .filter(|record| record_is_relevant(host, record, editor))
        .count()
}

fn record_is_relevant(host: &dyn Host, record: &MutationRecord, editor: Option<ElementId>) -> bool {
    match record {
        MutationRecord::ChildList { added, removed, .. } => {
            let editor_gone = *removed > 0
                && editor.is_some_and(|el| !host.probe(el).is_some_and(|p| p.connected));
            editor_gone
                || added.iter().any(|node| {
                    let Some(element) = node.element else {
                        return false;
                    };
                    if node.editable_hint || matches!(node.tag.as_str(), "textarea" | "input") {
                        return true;
                    }
                    node.child_elements > 0
                        && host
                            .query_within(element, EDITABLE_DESCENDANTS)
                            .is_ok_and(|found| !found.is_empty())
                })
        }
        MutationRecord::Attributes { target, name } => {
            matches!(name.as_str(), "contenteditable" | "role")
                || host
                    .probe(*target)
                    .is_some_and(|p| p.is_editing_surface_like())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snipline_harness::{ElementSpec, FakeDom};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn quiet_page_uses_base_delay() {
        let mut budget = MutationBudget::new(&MutationConfig::default());
        assert_eq!(budget.record(ms(0)), BudgetDecision::Schedule(ms(150)));
        assert_eq!(budget.record(ms(100)), BudgetDecision::Schedule(ms(150)));
    }

    #[test]
    fn burst_doubles_up_to_max() {
        let mut budget = MutationBudget::new(&MutationConfig::default());
        let mut last = Duration::ZERO;
        for i in 0..20 {
            match budget.record(ms(i * 10)) {
                BudgetDecision::Schedule(d) => {
                    assert!(d >= last, "delay must not decrease within a burst");
                    last = d;
                }
                BudgetDecision::Suspended => panic!("not yet extreme at {i}"),
            }
        }
        assert_eq!(last, ms(2_000));
    }

    #[test]
    fn window_expiry_resets_to_base() {
        let mut budget = MutationBudget::new(&MutationConfig::default());
        for i in 0..15 {
            budget.record(ms(i));
        }
        assert!(budget.current_delay() > ms(150));
        assert_eq!(budget.record(ms(10_000)), BudgetDecision::Schedule(ms(150)));
        assert_eq!(budget.event_count(), 1);
    }

    #[test]
    fn extreme_load_suspends_until_resume() {
        let mut budget = MutationBudget::new(&MutationConfig::default());
        let decisions: Vec<_> = (0..25).map(|i| budget.record(ms(i * 40))).collect();
        assert_eq!(decisions[20], BudgetDecision::Suspended);
        assert!(decisions[21..].iter().all(|d| *d == BudgetDecision::Suspended));
        assert_eq!(budget.throttled_until(), Some(ms(800 + 5_000)));

        budget.resume();
        assert!(!budget.is_throttled());
        assert_eq!(budget.event_count(), 0);
        assert_eq!(budget.record(ms(6_000)), BudgetDecision::Schedule(ms(150)));
    }

    #[test]
    fn relevance_classification() {
        let mut dom = FakeDom::new("https://example.com/");
        let wrapper = dom.append(dom.body(), ElementSpec::new("div"));
        let plain = dom.append(wrapper, ElementSpec::new("span"));
        let field = dom.append(dom.body(), ElementSpec::textarea());
        let shell = dom.append(dom.body(), ElementSpec::new("section"));
        dom.append(shell, ElementSpec::editable_div());

        assert!(!is_relevant(&dom, &[dom.text_added_record(wrapper)], None));
        assert!(!is_relevant(&dom, &[dom.added_record(plain)], None));
        assert!(is_relevant(&dom, &[dom.added_record(field)], None));
        assert!(is_relevant(&dom, &[dom.added_record(shell)], None));
        assert!(is_relevant(&dom, &[dom.attribute_record(field, "disabled")], None));
        assert!(!is_relevant(&dom, &[dom.attribute_record(plain, "hidden")], None));
    }

    #[test]
    fn leaf_additions_never_query_subtrees() {
        let mut dom = FakeDom::new("https://example.com/");
        let span = dom.append(dom.body(), ElementSpec::new("span"));
        dom.clear_queries();
        assert!(!is_relevant(&dom, &[dom.added_record(span)], None));
        assert!(dom.queries().is_empty());
    }

    #[test]
    fn removal_of_current_editor_is_relevant() {
        let mut dom = FakeDom::new("https://example.com/");
        let field = dom.append(dom.body(), ElementSpec::textarea());
        dom.detach(field);
        let record = MutationRecord::ChildList {
            target: dom.body(),
            added: Vec::new(),
            removed: 1,
        };
        assert!(is_relevant(&dom, std::slice::from_ref(&record), Some(field)));
        assert!(!is_relevant(&dom, &[record], None));
    }

    #[test]
    fn monitor_reports_throttle_once() {
        let mut dom = FakeDom::new("https://example.com/");
        let field = dom.append(dom.body(), ElementSpec::textarea());
        let mut monitor = ChangeMonitor::new(&MutationConfig::default());
        let batch = [dom.added_record(field)];
        let outcomes: Vec<_> = (0..23)
            .map(|i| monitor.on_batch(&dom, &batch, None, ms(i * 10)))
            .collect();
        assert_eq!(outcomes[0], MonitorOutcome::Rescan(ms(150)));
        assert_eq!(
            outcomes[20],
            MonitorOutcome::Throttled {
                cooldown: ms(5_000)
            }
        );
        assert_eq!(outcomes[22], MonitorOutcome::Suspended);
    }

    #[test]
    fn one_large_batch_counts_every_relevant_record() {
        let mut dom = FakeDom::new("https://example.com/");
        let plain = dom.append(dom.body(), ElementSpec::new("span"));
        let mut batch: Vec<MutationRecord> = (0..25)
            .map(|_| {
                let field = dom.append(dom.body(), ElementSpec::textarea());
                dom.added_record(field)
            })
            .collect();
        batch.push(dom.added_record(plain));
        assert_eq!(relevant_records(&dom, &batch, None), 25);

        let mut monitor = ChangeMonitor::new(&MutationConfig::default());
        assert_eq!(
            monitor.on_batch(&dom, &batch, None, ms(10)),
            MonitorOutcome::Throttled {
                cooldown: ms(5_000)
            }
        );
        assert!(monitor.budget().is_throttled());
    }

    #[test]
    fn burst_inside_one_batch_raises_the_delay() {
        let mut dom = FakeDom::new("https://example.com/");
        let batch: Vec<MutationRecord> = (0..12)
            .map(|_| {
                let field = dom.append(dom.body(), ElementSpec::textarea());
                dom.added_record(field)
            })
            .collect();
        let mut monitor = ChangeMonitor::new(&MutationConfig::default());
        assert_eq!(
            monitor.on_batch(&dom, &batch, None, ms(0)),
            MonitorOutcome::Rescan(ms(600))
        );
        assert_eq!(monitor.budget().event_count(), 12);
    }
}
