#![forbid(unsafe_code)]

//! [`RichEditorStrategy`]: editors with a transactional document model.

use snipline_core::host::{ControlSpec, Host};

use super::{InsertionStrategy, StrategyTargeting, attached_and_kind};
use crate::editor::{EditorHandle, EditorKind};
use crate::profile::TriggerBar;
use crate::technique::{TechniqueChain, TechniqueKind};

/// Inserts through the editor's own transaction API first.
///
/// Rich editors keep a document model behind the visible DOM and discard DOM
/// edits they did not make themselves, so a plain assignment is the last
/// resort here.
#[derive(Debug, Clone)]
pub struct RichEditorStrategy {
    targeting: StrategyTargeting,
    chain: TechniqueChain,
}

impl RichEditorStrategy {
    pub const PRIORITY: i32 = 100;

    #[must_use]
    pub fn new(targeting: StrategyTargeting) -> Self {
        Self {
            targeting,
            chain: TechniqueChain::new(
                TechniqueKind::RichTransaction,
                &[TechniqueKind::ExecCommand, TechniqueKind::DirectAssignment],
            ),
        }
    }
}

impl InsertionStrategy for RichEditorStrategy {
    fn name(&self) -> &str {
        "rich-editor"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn is_compatible(&self, host: &dyn Host, editor: &EditorHandle) -> bool {
        attached_and_kind(host, editor, &[EditorKind::RichRegion])
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
