#![forbid(unsafe_code)]

//! [`DefaultStrategy`]: accepts any attached editor on any site.

use snipline_core::host::{ControlSpec, Host};

use super::InsertionStrategy;
use crate::editor::EditorHandle;
use crate::profile::TriggerBar;
use crate::technique::{TechniqueChain, TechniqueKind};

/// Priority-0 catch-all. Always registered.
#[derive(Debug, Clone)]
pub struct DefaultStrategy {
    chain: TechniqueChain,
    selectors: Vec<String>,
}

impl DefaultStrategy {
    pub const PRIORITY: i32 = 0;

    #[must_use]
    pub fn new() -> Self {
        Self {
            chain: TechniqueChain::new(
                TechniqueKind::ExecCommand,
                &[TechniqueKind::NativeSetter, TechniqueKind::DirectAssignment],
            ),
            selectors: vec![
                "textarea".into(),
                "input[type='text']".into(),
                "[contenteditable='true']".into(),
                "[role='textbox']".into(),
            ],
        }
    }
}

impl Default for DefaultStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl InsertionStrategy for DefaultStrategy {
    fn name(&self) -> &str {
        "default"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn is_compatible(&self, host: &dyn Host, editor: &EditorHandle) -> bool {
        editor.is_attached(host)
    }

    fn techniques(&self) -> &TechniqueChain {
        &self.chain
    }

    fn selectors(&self) -> &[String] {
        &self.selectors
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
