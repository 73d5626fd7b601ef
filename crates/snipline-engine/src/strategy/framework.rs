#![forbid(unsafe_code)]

//! [`FrameworkFieldStrategy`]: text fields owned by a UI framework.

use snipline_core::host::{ControlSpec, Host};

use super::{InsertionStrategy, StrategyTargeting, attached_and_kind};
use crate::editor::{EditorHandle, EditorKind};
use crate::profile::TriggerBar;
use crate::technique::{TechniqueChain, TechniqueKind};

/// Bypasses the framework's value tracker with the native setter.
#[derive(Debug, Clone)]
pub struct FrameworkFieldStrategy {
    targeting: StrategyTargeting,
    chain: TechniqueChain,
}

impl FrameworkFieldStrategy {
    pub const PRIORITY: i32 = 80;

    #[must_use]
    pub fn new(targeting: StrategyTargeting) -> Self {
        Self {
            targeting,
            chain: TechniqueChain::new(
                TechniqueKind::NativeSetter,
                &[TechniqueKind::ExecCommand, TechniqueKind::DirectAssignment],
            ),
        }
    }
}

impl InsertionStrategy for FrameworkFieldStrategy {
    fn name(&self) -> &str {
        "framework-field"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn is_compatible(&self, host: &dyn Host, editor: &EditorHandle) -> bool {
        attached_and_kind(host, editor, &[EditorKind::FrameworkField])
    }

    fn techniques(&self) -> &TechniqueChain {
        &self.chain
    }

    fn selectors(&self) -> &[String] {
        &self.targeting.selectors
    }

    fn trigger_bar(&self) -> Option<&TriggerBar> {
        self.targeting.trigger_bar.as_ref()
    }

    fn supports_site(&self, hostname: &str) -> bool {
        self.targeting.matches_site(hostname)
    }

    fn build_trigger(&self, mut base: ControlSpec) -> ControlSpec {
        if !base.floating {
            base.class_name.push_str(" snipline-trigger--toolbar");
        }
        base
    }
}
