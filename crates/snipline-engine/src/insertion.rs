#![forbid(unsafe_code)]

//! Insertion engine: strategy selection and technique fallback.
//!
//! `insert` sanitizes the content, then walks every compatible strategy in
//! priority order and, within each, every technique of its chain. The first
//! verified success wins and nothing runs after it. A technique that errors
//! is logged and treated as a failure; errors never escape to the caller.

use snipline_core::config::{InsertMode, InsertionConfig};
use snipline_core::host::Host;
use snipline_core::sanitize::sanitize_content;
use tracing::{debug, trace};

use crate::editor::EditorHandle;
use crate::strategy::StrategyRegistry;
use crate::technique::{self, TechniqueKind};

/// Result of one insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted {
        strategy: String,
        method: TechniqueKind,
    },
    Failed {
        reason: String,
    },
}

impl InsertOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Inserted { .. })
    }

    /// Technique that landed the content, if any.
    #[must_use]
    pub fn method_used(&self) -> Option<TechniqueKind> {
        match self {
            Self::Inserted { method, .. } => Some(*method),
            Self::Failed { .. } => None,
        }
    }
}

/// Orchestrates strategies against one editor.
#[derive(Debug, Clone)]
pub struct InsertionEngine {
    config: InsertionConfig,
}

impl InsertionEngine {
    #[must_use]
    pub fn new(config: InsertionConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn mode(&self) -> InsertMode {
        self.config.mode
    }

    pub fn set_config(&mut self, config: InsertionConfig) {
        self.config = config;
    }

    /// Content as it will be inserted.
    #[must_use]
    pub fn prepare_content(&self, content: &str) -> String {
        sanitize_content(content, self.config.max_content_chars)
    }

    /// Insert `content` into `editor`.
    pub fn insert(
        &self,
        registry: &StrategyRegistry,
        host: &mut dyn Host,
        editor: &EditorHandle,
        content: &str,
    ) -> InsertOutcome {
        let text = self.prepare_content(content);
        if text.is_empty() {
            return InsertOutcome::Failed {
                reason: "nothing to insert".into(),
            };
        }
        if !editor.is_attached(host) {
            return InsertOutcome::Failed {
                reason: "editor is no longer attached".into(),
            };
        }

        // Baseline for spotting content that a failing technique left behind.
        let original = host.read_text(editor.element()).ok();
        let strategies = registry.compatible(host, editor);
        let mut last_error = String::from("no compatible strategy");
        for strategy in strategies {
            for kind in strategy.techniques().iter() {
                match technique::apply(kind, host, editor.element(), &text, self.config.mode) {
                    Ok(()) => {
                        debug!(
                            strategy = strategy.name(),
                            method = kind.as_str(),
                            editor = editor.kind().as_str(),
                            chars = text.chars().count(),
                            "snippet inserted"
                        );
                        return InsertOutcome::Inserted {
                            strategy: strategy.name().to_string(),
                            method: kind,
                        };
                    }
                    Err(err)
                        if self.already_present(&*host, editor, original.as_deref(), &text) =>
                    {
                        debug!(
                            strategy = strategy.name(),
                            method = kind.as_str(),
                            error = %err,
                            "technique failed after its content landed"
                        );
                        return InsertOutcome::Inserted {
                            strategy: strategy.name().to_string(),
                            method: kind,
                        };
                    }
                    Err(err) => {
                        trace!(
                            strategy = strategy.name(),
                            method = kind.as_str(),
                            error = %err,
                            "technique failed"
                        );
                        last_error = format!("{}/{}: {err}", strategy.name(), kind);
                    }
                }
            }
        }
        debug!(reason = %last_error, "every insertion technique failed");
        InsertOutcome::Failed { reason: last_error }
    }

    fn already_present(
        &self,
        host: &dyn Host,
        editor: &EditorHandle,
        original: Option<&str>,
        text: &str,
    ) -> bool {
        original.is_some_and(|before| {
            host.read_text(editor.element())
                .is_ok_and(|now| technique::landed(before, &now, text, self.config.mode))
        })
    }

    /// Unstructured fallback after [`Self::insert`] failed.
    pub fn insert_legacy(&self, host: &mut dyn Host, editor: &EditorHandle, content: &str) -> bool {
        let text = self.prepare_content(content);
        !text.is_empty()
            && editor.is_attached(host)
            && technique::legacy_insert(host, editor.element(), &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::EditorKind;
    use snipline_harness::{ElementSpec, FakeDom, Fault, HostOp};

    fn handle(dom: &FakeDom, el: snipline_core::ElementId, kind: EditorKind) -> EditorHandle {
        EditorHandle::new(el, kind, 0, dom.rect_of(el).unwrap_or_default(), 0)
    }

    #[test]
    fn first_success_wins_and_nothing_runs_after() {
        let mut dom = FakeDom::new("https://example.com/");
        let field = dom.append(dom.body(), ElementSpec::textarea());
        let editor = handle(&dom, field, EditorKind::PlainField);
        let engine = InsertionEngine::new(InsertionConfig::default());

        let outcome = engine.insert(&StrategyRegistry::new(), &mut dom, &editor, "Hi there");
        assert_eq!(outcome.method_used(), Some(TechniqueKind::ExecCommand));
        assert_eq!(dom.text_of(field), "Hi there");
        assert!(
            !dom.journal()
                .iter()
                .any(|op| matches!(op, HostOp::NativeSet(..) | HostOp::Assign(..)))
        );
    }

    #[test]
    fn techniques_fall_through_in_order() {
        let mut dom = FakeDom::new("https://example.com/");
        let field = dom.append(dom.body(), ElementSpec::textarea().text("a"));
        dom.inject_fault(field, Fault::ExecRejected);
        dom.inject_fault(field, Fault::NativeSetterReverted);
        let editor = handle(&dom, field, EditorKind::PlainField);
        let engine = InsertionEngine::new(InsertionConfig::default());

        let outcome = engine.insert(&StrategyRegistry::new(), &mut dom, &editor, "b");
        assert_eq!(outcome.method_used(), Some(TechniqueKind::DirectAssignment));
        assert_eq!(dom.text_of(field), "ab");
    }

    #[test]
    fn total_failure_is_reported() {
        let mut dom = FakeDom::new("https://example.com/");
        let field = dom.append(dom.body(), ElementSpec::textarea());
        dom.inject_fault(field, Fault::ExecThrows);
        dom.inject_fault(field, Fault::NativeSetterReverted);
        dom.inject_fault(field, Fault::AssignmentThrows);
        let editor = handle(&dom, field, EditorKind::PlainField);
        let engine = InsertionEngine::new(InsertionConfig::default());

        let outcome = engine.insert(&StrategyRegistry::new(), &mut dom, &editor, "x");
        assert!(!outcome.is_success());
        assert_eq!(dom.text_of(field), "");
    }

    #[test]
    fn content_is_sanitized_before_insertion() {
        let mut dom = FakeDom::new("https://example.com/");
        let field = dom.append(dom.body(), ElementSpec::textarea());
        let editor = handle(&dom, field, EditorKind::PlainField);
        let engine = InsertionEngine::new(InsertionConfig::default());

        engine.insert(&StrategyRegistry::new(), &mut dom, &editor, "go javascript:run()\u{0}");
        assert_eq!(dom.text_of(field), "go run()");
    }

    #[test]
    fn detached_editor_fails_without_touching_the_page() {
        let mut dom = FakeDom::new("https://example.com/");
        let field = dom.append(dom.body(), ElementSpec::textarea());
        let editor = handle(&dom, field, EditorKind::PlainField);
        dom.detach(field);
        let engine = InsertionEngine::new(InsertionConfig::default());

        let outcome = engine.insert(&StrategyRegistry::new(), &mut dom, &editor, "x");
        assert!(!outcome.is_success());
        assert!(dom.journal().is_empty());
    }

    #[test]
    fn replace_mode_overwrites() {
        let mut dom = FakeDom::new("https://example.com/");
        let field = dom.append(dom.body(), ElementSpec::textarea().text("draft"));
        let editor = handle(&dom, field, EditorKind::PlainField);
        let engine = InsertionEngine::new(InsertionConfig {
            mode: InsertMode::Replace,
            ..InsertionConfig::default()
        });

        let outcome = engine.insert(&StrategyRegistry::new(), &mut dom, &editor, "final");
        assert!(outcome.is_success());
        assert_eq!(dom.text_of(field), "final");
    }

    #[test]
    fn legacy_routine_assigns_when_exec_is_refused() {
        let mut dom = FakeDom::new("https://example.com/");
        let field = dom.append(dom.body(), ElementSpec::textarea().text("a"));
        dom.inject_fault(field, Fault::ExecRejected);
        let editor = handle(&dom, field, EditorKind::PlainField);
        let engine = InsertionEngine::new(InsertionConfig::default());

        assert!(engine.insert_legacy(&mut dom, &editor, "b"));
        assert_eq!(dom.text_of(field), "ab");
    }

    #[test]
    fn throwing_listeners_never_duplicate_content() {
        let mut dom = FakeDom::new("https://example.com/");
        let field = dom.append(dom.body(), ElementSpec::textarea());
        dom.inject_fault(field, Fault::ExecRejected);
        dom.inject_fault(field, Fault::DispatchThrows);
        let editor = handle(&dom, field, EditorKind::PlainField);
        let engine = InsertionEngine::new(InsertionConfig::default());

        let outcome = engine.insert(&StrategyRegistry::new(), &mut dom, &editor, "Hi there");
        assert!(outcome.is_success(), "{outcome:?}");
        assert_eq!(dom.text_of(field), "Hi there");
        let writes = dom
            .journal()
            .iter()
            .filter(|op| matches!(op, HostOp::NativeSet(..) | HostOp::Assign(..)))
            .count();
        assert_eq!(writes, 1);
    }
}
