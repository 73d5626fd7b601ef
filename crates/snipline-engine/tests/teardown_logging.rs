#![forbid(unsafe_code)]

//! Teardown keeps going after a failed step and reports it at `WARN`; host
//! errors that best-effort paths swallow still leave a `TRACE` event.
//!
//! Run:
//!   cargo test -p snipline-engine --test teardown_logging

use std::sync::{Arc, Mutex};

use snipline_core::config::EngineConfig;
use snipline_core::host::SessionId;
use snipline_core::message::ControlMessage;
use snipline_core::config::InsertionConfig;
use snipline_engine::{EditorHandle, EditorKind, EngineSession, InsertionEngine, SessionEvent};
use snipline_harness::{ElementSpec, FakeDom, Fault};
use tracing_subscriber::layer::SubscriberExt;

// ============================================================================
// Capture layer
// ============================================================================

#[derive(Debug, Clone)]
struct CapturedEvent {
    level: tracing::Level,
    message: String,
    step: Option<String>,
}

struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    step: Option<String>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "step" => self.step = Some(value.to_string()),
            _ => {}
        }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            step: visitor.step,
        });
    }
}

fn capture<T>(f: impl FnOnce() -> T) -> (T, Vec<CapturedEvent>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(EventCapture {
        events: events.clone(),
    });
    let out = tracing::subscriber::with_default(subscriber, f);
    let captured = events.lock().unwrap().clone();
    (out, captured)
}

fn active_session() -> EngineSession<FakeDom> {
    let mut dom = FakeDom::new("https://example.com/");
    dom.append(dom.body(), ElementSpec::textarea());
    let mut session = EngineSession::new(dom, SessionId::new("t"), EngineConfig::default());
    session.handle_message(ControlMessage::Activate);
    session.dispatch(SessionEvent::SiteEnabled(true));
    session
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn failed_removal_is_logged_and_cleanup_continues() {
    let mut session = active_session();
    let control = session.trigger().element().expect("trigger placed");
    session.host_mut().inject_fault(control, Fault::RemoveThrows);

    let (report, events) = capture(|| session.teardown());

    assert!(!report.is_clean());
    assert_eq!(report.failures[0].step, "remove_trigger");
    let warned: Vec<&CapturedEvent> = events
        .iter()
        .filter(|e| e.level == tracing::Level::WARN)
        .collect();
    assert!(
        warned
            .iter()
            .any(|e| e.step.as_deref() == Some("remove_trigger")),
        "{events:?}"
    );
    assert!(warned.iter().all(|e| e.message.contains("teardown step failed")));

    // Later steps still ran.
    assert!(session.host().mutation_filter().is_none());
    assert!(!session.host().history_hooks_installed());
    assert!(!session.host().page_listeners_enabled());
}

#[test]
fn clean_teardown_emits_no_warnings() {
    let mut session = active_session();
    let (report, events) = capture(|| session.teardown());
    assert!(report.is_clean());
    assert!(events.iter().all(|e| e.level != tracing::Level::WARN), "{events:?}");
}

#[test]
fn quiet_scans_emit_no_warnings() {
    let dom = FakeDom::new("https://example.com/");
    let mut session = EngineSession::new(dom, SessionId::new("q"), EngineConfig::default());
    let (_, events) = capture(|| {
        session.handle_message(ControlMessage::Activate);
        session.dispatch(SessionEvent::SiteEnabled(true));
        session.dispatch(SessionEvent::VisibilityChanged { visible: true });
        session.advance_to(web_time::Duration::from_millis(1));
    });
    assert!(session.editor().is_none());
    assert!(events.iter().all(|e| e.level != tracing::Level::WARN && e.level != tracing::Level::ERROR));
}

#[test]
fn swallowed_legacy_errors_are_traced() {
    let mut dom = FakeDom::new("https://example.com/");
    let field = dom.append(dom.body(), ElementSpec::textarea());
    dom.inject_fault(field, Fault::ExecRejected);
    dom.inject_fault(field, Fault::AssignmentThrows);
    let editor = EditorHandle::new(field, EditorKind::PlainField, 0, Default::default(), 0);
    let engine = InsertionEngine::new(InsertionConfig::default());

    let (landed, events) = capture(|| engine.insert_legacy(&mut dom, &editor, "x"));

    assert!(!landed);
    assert!(
        events.iter().any(|e| e.level == tracing::Level::TRACE
            && e.message.contains("legacy insert: assignment failed")),
        "{events:?}"
    );
}
