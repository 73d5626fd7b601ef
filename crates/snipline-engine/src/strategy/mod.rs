#![forbid(unsafe_code)]

//! Platform insertion strategies.
//!
//! An [`InsertionStrategy`] decides whether it can handle an acquired editor
//! and, if so, which [`TechniqueChain`] to run against it. Strategies also
//! carry the site-specific trigger bar and may customize the trigger control.
//!
//! # Standalone structs and the registry
//!
//! Each built-in strategy is a standalone struct ([`RichEditorStrategy`],
//! [`FrameworkFieldStrategy`], [`EditableRegionStrategy`],
//! [`DefaultStrategy`]). Every trait member is required, so a strategy that
//! forgets its chain or its selectors does not compile.
//!
//! The [`StrategyRegistry`] always holds a [`DefaultStrategy`] and keeps its
//! entries sorted by priority (descending), ties broken by registration order.

mod default;
mod editable;
mod framework;
mod rich;

pub use default::DefaultStrategy;
pub use editable::EditableRegionStrategy;
pub use framework::FrameworkFieldStrategy;
pub use rich::RichEditorStrategy;

use snipline_core::host::{ControlSpec, Host};
use tracing::debug;

use crate::editor::{EditorHandle, EditorKind};
use crate::profile::{SiteProfile, TriggerBar};
use crate::technique::TechniqueChain;

/// A platform-specific way of inserting into one family of editors.
pub trait InsertionStrategy {
    /// Name for logs and for the reported method.
    fn name(&self) -> &str;

    /// Higher wins.
    fn priority(&self) -> i32;

    /// Whether this strategy can handle `editor`.
    ///
    /// Implementations must re-validate that the element is still attached.
    fn is_compatible(&self, host: &dyn Host, editor: &EditorHandle) -> bool;

    /// Techniques to try, in order.
    fn techniques(&self) -> &TechniqueChain;

    /// Patterns describing the editors this strategy was written for.
    fn selectors(&self) -> &[String];

    /// The site's own control bar, if the trigger should live there.
    fn trigger_bar(&self) -> Option<&TriggerBar>;

    /// Whether the strategy is registered on `hostname`.
    fn supports_site(&self, hostname: &str) -> bool;

    /// Customize the trigger control built for this strategy.
    fn build_trigger(&self, base: ControlSpec) -> ControlSpec;
}

/// Where a strategy applies and what it looks for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StrategyTargeting {
    pub selectors: Vec<String>,
    pub trigger_bar: Option<TriggerBar>,
    /// Hostnames the strategy is limited to; empty means every site.
    pub hosts: Vec<String>,
}

impl StrategyTargeting {
    /// Targeting derived from a site profile.
    #[must_use]
    pub fn from_profile(profile: &SiteProfile) -> Self {
        Self {
            selectors: profile.descriptor.patterns().to_vec(),
            trigger_bar: profile.descriptor.control_bar().cloned(),
            hosts: profile.hostnames.iter().map(|h| (*h).to_string()).collect(),
        }
    }

    #[must_use]
    pub fn matches_site(&self, hostname: &str) -> bool {
        let hostname = hostname.to_ascii_lowercase();
        let hostname = hostname.strip_prefix("www.").unwrap_or(&hostname);
        self.hosts.is_empty()
            || self.hosts.iter().any(|h| {
                hostname == h.as_str()
                    || hostname
                        .strip_suffix(h.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            })
    }
}

/// Shared compatibility test: attached and of one of `kinds`.
pub(crate) fn attached_and_kind(
    host: &dyn Host,
    editor: &EditorHandle,
    kinds: &[EditorKind],
) -> bool {
    kinds.contains(&editor.kind()) && editor.is_attached(host)
}

struct Entry {
    order: usize,
    strategy: Box<dyn InsertionStrategy>,
}

/// Priority-ordered strategy set for one page.
pub struct StrategyRegistry {
    entries: Vec<Entry>,
    next_order: usize,
}

impl core::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    /// Registry holding only the [`DefaultStrategy`].
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            entries: Vec::new(),
            next_order: 0,
        };
        registry.register(Box::new(DefaultStrategy::new()));
        registry
    }

    /// Built-in strategies for `profile`, filtered to `hostname`.
    #[must_use]
    pub fn for_site(profile: &SiteProfile, hostname: &str) -> Self {
        let targeting = if profile.hostnames.is_empty() {
            StrategyTargeting {
                selectors: profile.descriptor.patterns().to_vec(),
                ..StrategyTargeting::default()
            }
        } else {
            StrategyTargeting::from_profile(profile)
        };
        let mut registry = Self::new();
        registry.register(Box::new(RichEditorStrategy::new(targeting.clone())));
        registry.register(Box::new(FrameworkFieldStrategy::new(targeting.clone())));
        registry.register(Box::new(EditableRegionStrategy::new(targeting)));
        registry.retain_site(hostname);
        registry
    }

    /// Add a strategy; the order among equal priorities is registration order.
    pub fn register(&mut self, strategy: Box<dyn InsertionStrategy>) {
        debug!(
            strategy = strategy.name(),
            priority = strategy.priority(),
            "strategy registered"
        );
        self.entries.push(Entry {
            order: self.next_order,
            strategy,
        });
        self.next_order += 1;
        self.entries.sort_by(|a, b| {
            b.strategy
                .priority()
                .cmp(&a.strategy.priority())
                .then(a.order.cmp(&b.order))
        });
    }

    /// Drop strategies not registered for `hostname`.
    pub fn retain_site(&mut self, hostname: &str) {
        self.entries.retain(|e| e.strategy.supports_site(hostname));
    }

    /// Strategies in selection order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn InsertionStrategy> {
        self.entries.iter().map(|e| e.strategy.as_ref())
    }

    /// Compatible strategies for `editor`, in selection order.
    #[must_use]
    pub fn compatible(&self, host: &dyn Host, editor: &EditorHandle) -> Vec<&dyn InsertionStrategy> {
        self.iter()
            .filter(|s| s.is_compatible(host, editor))
            .collect()
    }

    /// The active strategy for `editor`.
    #[must_use]
    pub fn select(&self, host: &dyn Host, editor: &EditorHandle) -> Option<&dyn InsertionStrategy> {
        self.iter().find(|s| s.is_compatible(host, editor))
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.iter().map(|s| s.name().to_string()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::profile_for;
    use crate::technique::TechniqueKind;

    struct Fixed {
        name: &'static str,
        priority: i32,
        chain: TechniqueChain,
    }

    impl Fixed {
        fn boxed(name: &'static str, priority: i32) -> Box<dyn InsertionStrategy> {
            Box::new(Self {
                name,
                priority,
                chain: TechniqueChain::new(TechniqueKind::ExecCommand, &[]),
            })
        }
    }

    impl InsertionStrategy for Fixed {
        fn name(&self) -> &str {
            self.name
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

        fn supports_site(&self, hostname: &str) -> bool {
            hostname == "a.test"
        }

        fn build_trigger(&self, base: ControlSpec) -> ControlSpec {
            base
        }
    }

    #[test]
    fn default_strategy_is_always_present() {
        let registry = StrategyRegistry::new();
        assert_eq!(registry.names(), vec!["default".to_string()]);
    }

    #[test]
    fn sorted_by_priority_then_registration_order() {
        let mut registry = StrategyRegistry::new();
        registry.register(Fixed::boxed("low", 10));
        registry.register(Fixed::boxed("high-a", 90));
        registry.register(Fixed::boxed("high-b", 90));
        registry.register(Fixed::boxed("mid", 50));
        assert_eq!(
            registry.names(),
            vec!["high-a", "high-b", "mid", "low", "default"]
        );
    }

    #[test]
    fn site_filter_keeps_default() {
        let mut registry = StrategyRegistry::new();
        registry.register(Fixed::boxed("site-only", 70));
        registry.retain_site("b.test");
        assert_eq!(registry.names(), vec!["default"]);
    }

    #[test]
    fn builtin_registry_for_known_site() {
        let profile = profile_for("claude.ai");
        let registry = StrategyRegistry::for_site(&profile, "claude.ai");
        assert_eq!(
            registry.names(),
            vec!["rich-editor", "framework-field", "editable-region", "default"]
        );
        // A profile-bound registry on a foreign host keeps only the default.
        let registry = StrategyRegistry::for_site(&profile, "example.com");
        assert_eq!(registry.names(), vec!["default"]);
    }

    #[test]
    fn targeting_site_match() {
        let t = StrategyTargeting {
            hosts: vec!["chatgpt.com".into()],
            ..StrategyTargeting::default()
        };
        assert!(t.matches_site("chatgpt.com"));
        assert!(t.matches_site("www.chatgpt.com"));
        assert!(!t.matches_site("notchatgpt.com"));
        assert!(StrategyTargeting::default().matches_site("anything.test"));
    }
}
