#![forbid(unsafe_code)]

//! [`EditableRegionStrategy`]: plain `contenteditable` / textbox regions.

use snipline_core::host::{ControlSpec, Host};

use super::{InsertionStrategy, StrategyTargeting, attached_and_kind};
use crate::editor::{EditorHandle, EditorKind};
use crate::profile::TriggerBar;
use crate::technique::{TechniqueChain, TechniqueKind};

#[derive(Debug, Clone)]
pub struct EditableRegionStrategy {
    targeting: StrategyTargeting,
    chain: TechniqueChain,
}

impl EditableRegionStrategy {
    pub const PRIORITY: i32 = 50;

    #[must_use]
    pub fn new(targeting: StrategyTargeting) -> Self {
        Self {
            targeting,
            chain: TechniqueChain::new(
                TechniqueKind::ExecCommand,
                &[TechniqueKind::DirectAssignment],
            ),
        }
    }
}

impl InsertionStrategy for EditableRegionStrategy {
    fn name(&self) -> &str {
        "editable-region"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn is_compatible(&self, host: &dyn Host, editor: &EditorHandle) -> bool {
        attached_and_kind(host, editor, &[EditorKind::EditableRegion])
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

    fn build_trigger(&self, base: ControlSpec) -> ControlSpec {
        base
    }
}
