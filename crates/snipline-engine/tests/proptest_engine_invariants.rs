#![forbid(unsafe_code)]

//! Property-based invariant tests for the engine's state machines.
//!
//! ## Invariants
//!
//! 1. Registry order: priority descending, registration order among ties,
//!    identical across repeated registration
//! 2. Mutation budget: delay never decreases inside one burst window and stays
//!    within `[base, max]`; suspension lasts until `resume`, which clears
//!    history and restores the base delay
//! 3. Retry state: attempts never exceed the maximum; every delay lies in
//!    `[base, max]`; reset returns to zero attempts and the base delay
//! 4. Panel selection: `-1 <= index < len`, `-1` exactly when empty, Down
//!    wraps from the last item to 0, Up wraps from 0 to the last item

use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use snipline_core::config::{MutationConfig, RetryConfig};
use snipline_core::geometry::Rect;
use snipline_core::host::{ControlSpec, Host};
use snipline_core::snippet::Snippet;
use snipline_engine::{
    BudgetDecision, EditorHandle, InsertionStrategy, MutationBudget, PanelState, RetryState,
    StrategyRegistry, TechniqueChain, TechniqueKind, TriggerBar,
};
use web_time::Duration;

// ── Test strategy ─────────────────────────────────────────────────────────

struct Ranked {
    name: String,
    priority: i32,
    chain: TechniqueChain,
}

impl InsertionStrategy for Ranked {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_compatible(&self, _host: &dyn Host, _editor: &EditorHandle) -> bool {
        true
    }

    fn techniques(&self) -> &TechniqueChain {
        &self.chain
    }

    fn selectors(&self) -> &[String] {
        &[]
    }

    fn trigger_bar(&self) -> Option<&TriggerBar> {
        None
    }

    fn supports_site(&self, _hostname: &str) -> bool {
        true
    }

    fn build_trigger(&self, base: ControlSpec) -> ControlSpec {
        base
    }
}

fn registry_of(priorities: &[i32]) -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    for (i, priority) in priorities.iter().enumerate() {
        registry.register(Box::new(Ranked {
            name: format!("s{i}"),
            priority: *priority,
            chain: TechniqueChain::new(TechniqueKind::ExecCommand, &[]),
        }));
    }
    registry
}

// ── Generators ────────────────────────────────────────────────────────────

fn arb_priorities() -> impl Strategy<Value = Vec<i32>> {
    prop::collection::vec(-3i32..=3, 0..12)
}

fn arb_retry_config() -> impl Strategy<Value = RetryConfig> {
    (1u64..500, 1u64..20, 1u32..30, 0u32..=50).prop_map(|(base, factor, attempts, jitter)| {
        RetryConfig {
            base_delay_ms: base,
            max_delay_ms: base * factor,
            max_attempts: attempts,
            jitter: f64::from(jitter) / 100.0,
            ..RetryConfig::default()
        }
    })
}

#[derive(Debug, Clone)]
enum PanelOp {
    Next,
    Previous,
    Query(String),
}

fn arb_panel_op() -> impl Strategy<Value = PanelOp> {
    prop_oneof![
        Just(PanelOp::Next),
        Just(PanelOp::Previous),
        prop::sample::select(vec!["", "a", "b", "ab", "zz", "General"])
            .prop_map(|q| PanelOp::Query(q.to_string())),
    ]
}

fn arb_library() -> impl Strategy<Value = Vec<Snippet>> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "ab", "c"]), 0..8).prop_map(
        |titles| {
            titles
                .into_iter()
                .enumerate()
                .map(|(i, title)| Snippet {
                    id: i.to_string(),
                    title: title.to_string(),
                    content: String::new(),
                    category: "General".into(),
                    created_at: 0,
                })
                .collect()
        },
    )
}

// ── 1. Registry order ─────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn registry_is_sorted_and_stable(priorities in arb_priorities()) {
        let registry = registry_of(&priorities);
        let order: Vec<(i32, String)> = registry
            .iter()
            .map(|s| (s.priority(), s.name().to_string()))
            .collect();

        for pair in order.windows(2) {
            prop_assert!(pair[0].0 >= pair[1].0);
        }

        // Registration order among equal priorities: the default strategy
        // (priority 0) was registered first.
        let mut expected: Vec<(i32, usize, String)> = std::iter::once((0, 0, "default".to_string()))
            .chain(priorities.iter().enumerate().map(|(i, p)| (*p, i + 1, format!("s{i}"))))
            .collect();
        expected.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        let expected: Vec<String> = expected.into_iter().map(|e| e.2).collect();
        prop_assert_eq!(registry.names(), expected);

        prop_assert_eq!(registry_of(&priorities).names(), registry.names());
    }
}

// ── 2. Mutation budget ────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn budget_delay_is_monotonic_within_a_window(gaps in prop::collection::vec(0u64..100, 1..40)) {
        let config = MutationConfig::default();
        let mut budget = MutationBudget::new(&config);
        let mut now = Duration::ZERO;
        let mut last = Duration::ZERO;
        let mut suspended = false;

        for gap in gaps {
            now += Duration::from_millis(gap);
            match budget.record(now) {
                BudgetDecision::Schedule(delay) => {
                    prop_assert!(!suspended, "scheduled after suspension");
                    prop_assert!(delay >= last);
                    prop_assert!(delay >= config.base_delay() && delay <= config.max_delay());
                    last = delay;
                }
                BudgetDecision::Suspended => {
                    suspended = true;
                    prop_assert!(budget.is_throttled());
                }
            }
        }

        budget.resume();
        prop_assert!(!budget.is_throttled());
        prop_assert_eq!(budget.event_count(), 0);
        prop_assert_eq!(budget.current_delay(), config.base_delay());
    }

    #[test]
    fn budget_resets_after_the_window_empties(burst in 11usize..20) {
        let config = MutationConfig::default();
        let mut budget = MutationBudget::new(&config);
        for i in 0..burst {
            budget.record(Duration::from_millis(i as u64));
        }
        prop_assert!(budget.current_delay() > config.base_delay());

        let later = Duration::from_millis(burst as u64) + config.window() + Duration::from_millis(1);
        prop_assert_eq!(budget.record(later), BudgetDecision::Schedule(config.base_delay()));
    }
}

// ── 3. Retry state ────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn retry_stays_within_bounds(config in arb_retry_config(), seed in any::<u64>(), extra in 0u32..10) {
        let mut retry = RetryState::new(&config);
        retry.configure(Some("#anchor"), Default::default());
        let mut rng = SmallRng::seed_from_u64(seed);

        for _ in 0..config.max_attempts + extra {
            retry.begin();
            if let Some(delay) = retry.fail(&mut rng) {
                prop_assert!(delay >= retry.base_delay());
                prop_assert!(delay <= retry.max_delay());
            }
            prop_assert!(retry.attempts() <= retry.max_attempts());
        }
        prop_assert_eq!(retry.attempts(), config.max_attempts);

        retry.reset();
        prop_assert_eq!(retry.attempts(), 0);
        prop_assert_eq!(retry.current_delay(), retry.base_delay());
    }
}

// ── 4. Panel selection ────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn panel_index_invariants(
        library in arb_library(),
        ops in prop::collection::vec(arb_panel_op(), 0..30),
    ) {
        let mut panel = PanelState::new();
        panel.open(library, Rect::default());

        for op in ops {
            let len = panel.len() as isize;
            let before = panel.selected_index();
            match op {
                PanelOp::Next => {
                    panel.select_next();
                    if len > 0 && before == len - 1 {
                        prop_assert_eq!(panel.selected_index(), 0);
                    }
                }
                PanelOp::Previous => {
                    panel.select_previous();
                    if len > 0 && (before == 0 || before == -1) {
                        prop_assert_eq!(panel.selected_index(), len - 1);
                    }
                }
                PanelOp::Query(q) => panel.set_query(&q),
            }

            let len = panel.len() as isize;
            let index = panel.selected_index();
            prop_assert!(index >= -1 && index < len.max(0));
            prop_assert_eq!(index == -1, len == 0);
            prop_assert_eq!(panel.selected_snippet().is_some(), len > 0);
        }
    }
}
