#![forbid(unsafe_code)]

//! Trigger control injection and positioning.
//!
//! # Placement order
//!
//! 1. If a control for the current editor and epoch is still attached, do
//!    nothing (re-injection is idempotent).
//! 2. If a control bar pattern is known, look for the bar; while it is
//!    missing, retry up to `bar_attempts` times. Inside a found bar, look for
//!    the reference sibling with its own bounded retry, then insert next to it
//!    (or at the end of the bar once the sibling retry is spent).
//! 3. Otherwise float the control over the editor's bottom-right corner.
//!
//! # Floating controls
//!
//! Scroll and resize events are coalesced into one animation frame. The
//! reposition runs only while the intersection observer reports the editor
//! in view.

use snipline_core::config::TriggerConfig;
use snipline_core::error::HostError;
use snipline_core::geometry::Rect;
use snipline_core::host::{ControlSpec, ElementId, FloatingPosition, Host, SessionId};
use snipline_core::site::{Offset, Placement};
use tracing::{debug, trace, warn};
use web_time::Duration;

use crate::editor::EditorHandle;
use crate::profile::TriggerBar;
use crate::strategy::InsertionStrategy;

/// Base class of every trigger control.
pub const TRIGGER_CLASS: &str = "snipline-trigger";

/// How the live control was placed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerPlacement {
    Bar {
        anchor: ElementId,
        placement: Placement,
    },
    Custom {
        anchor: ElementId,
        placement: Placement,
    },
    Floating,
}

/// The one live trigger control.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerControl {
    pub element: ElementId,
    pub placement: TriggerPlacement,
    pub editor: ElementId,
    pub epoch: u64,
}

/// Result of one injection pass.
#[derive(Debug, Clone, PartialEq)]
pub enum InjectOutcome {
    AlreadyPresent(ElementId),
    Placed(ElementId),
    Floating(ElementId),
    /// Bar or sibling not there yet; try again after this delay.
    Retry(Duration),
    Failed(HostError),
}

/// Owner of the trigger control.
#[derive(Debug, Clone)]
pub struct TriggerInjector {
    config: TriggerConfig,
    session: SessionId,
    control: Option<TriggerControl>,
    bar_misses: u32,
    sibling_misses: u32,
    in_view: bool,
    frame_pending: bool,
}

impl TriggerInjector {
    #[must_use]
    pub fn new(config: TriggerConfig, session: SessionId) -> Self {
        Self {
            config,
            session,
            control: None,
            bar_misses: 0,
            sibling_misses: 0,
            in_view: true,
            frame_pending: false,
        }
    }

    pub fn set_config(&mut self, config: TriggerConfig) {
        self.config = config;
    }

    #[must_use]
    pub fn control(&self) -> Option<&TriggerControl> {
        self.control.as_ref()
    }

    #[must_use]
    pub fn element(&self) -> Option<ElementId> {
        self.control.map(|c| c.element)
    }

    #[must_use]
    pub fn is_floating(&self) -> bool {
        self.control
            .is_some_and(|c| c.placement == TriggerPlacement::Floating)
    }

    /// Forget bar/sibling retry progress (new editor or epoch).
    pub fn reset_attempts(&mut self) {
        self.bar_misses = 0;
        self.sibling_misses = 0;
    }

    fn base_spec(&self, floating: bool, offset: Offset, z_index: Option<i32>) -> ControlSpec {
        ControlSpec {
            session: self.session.clone(),
            label: self.config.label.clone(),
            class_name: TRIGGER_CLASS.to_string(),
            floating,
            z_index,
            offset,
        }
    }

    fn is_current(&self, host: &dyn Host, editor: &EditorHandle) -> Option<ElementId> {
        let control = self.control?;
        (control.editor == editor.element()
            && control.epoch == editor.epoch()
            && host.probe(control.element).is_some_and(|p| p.connected))
        .then_some(control.element)
    }

    /// Place (or keep) the control for `editor`.
    pub fn inject(
        &mut self,
        host: &mut dyn Host,
        strategy: &dyn InsertionStrategy,
        bar: Option<&TriggerBar>,
        editor: &EditorHandle,
    ) -> InjectOutcome {
        if let Some(existing) = self.is_current(host, editor) {
            trace!(control = existing.get(), "trigger already present");
            return InjectOutcome::AlreadyPresent(existing);
        }
        if let Err(err) = self.remove(host) {
            trace!(error = %err, "previous trigger already gone");
        }

        if let Some(bar) = bar {
            match self.locate_in_bar(host, bar) {
                BarLookup::Found { anchor, placement } => {
                    let spec = strategy.build_trigger(self.base_spec(false, Offset::default(), None));
                    return match place(host, &spec, anchor, placement) {
                        Ok(control) => {
                            debug!(
                                control = control.get(),
                                strategy = strategy.name(),
                                placement = placement.as_str(),
                                "trigger placed in control bar"
                            );
                            self.set_control(control, TriggerPlacement::Bar { anchor, placement }, editor);
                            InjectOutcome::Placed(control)
                        }
                        Err(err) => {
                            warn!(error = %err, "trigger injection failed");
                            InjectOutcome::Failed(err)
                        }
                    };
                }
                BarLookup::Retry => {
                    return InjectOutcome::Retry(Duration::from_millis(self.config.retry_delay_ms));
                }
                BarLookup::GiveUp => {
                    debug!(bar = %bar.selector, "control bar not found, floating the trigger");
                }
            }
        }
        self.float(host, strategy, editor)
    }

    fn locate_in_bar(&mut self, host: &dyn Host, bar: &TriggerBar) -> BarLookup {
        let found = host
            .query_all(&bar.selector)
            .ok()
            .and_then(|els| els.into_iter().find(|el| host.probe(*el).is_some_and(|p| p.connected)));
        let Some(bar_el) = found else {
            self.bar_misses += 1;
            return if self.bar_misses < self.config.bar_attempts {
                BarLookup::Retry
            } else {
                BarLookup::GiveUp
            };
        };
        let Some(sibling) = &bar.sibling else {
            return BarLookup::Found {
                anchor: bar_el,
                placement: Placement::InsideEnd,
            };
        };
        match host
            .query_within(bar_el, sibling)
            .ok()
            .and_then(|els| els.into_iter().next())
        {
            Some(reference) => BarLookup::Found {
                anchor: reference,
                placement: bar.placement,
            },
            None => {
                self.sibling_misses += 1;
                if self.sibling_misses < self.config.sibling_attempts {
                    BarLookup::Retry
                } else {
                    BarLookup::Found {
                        anchor: bar_el,
                        placement: Placement::InsideEnd,
                    }
                }
            }
        }
    }

    fn float(
        &mut self,
        host: &mut dyn Host,
        strategy: &dyn InsertionStrategy,
        editor: &EditorHandle,
    ) -> InjectOutcome {
        let rect = host
            .probe(editor.element())
            .map_or(editor.rect(), |p| p.rect);
        let spec = strategy.build_trigger(self.base_spec(
            true,
            Offset::default(),
            Some(self.config.floating_z_index),
        ));
        let result = host.create_control(&spec).and_then(|control| {
            let positioned = host
                .position_floating(control, self.floating_position(rect))
                .and_then(|()| host.observe_intersection(editor.element()));
            match positioned {
                Ok(()) => Ok(control),
                Err(err) => {
                    if let Err(cleanup) = host.remove_element(control) {
                        trace!(error = %cleanup, "half-placed floating control not removed");
                    }
                    Err(err)
                }
            }
        });
        match result {
            Ok(control) => {
                debug!(control = control.get(), "floating trigger placed");
                self.in_view = true;
                self.frame_pending = false;
                self.set_control(control, TriggerPlacement::Floating, editor);
                InjectOutcome::Floating(control)
            }
            Err(err) => {
                warn!(error = %err, "floating trigger injection failed");
                InjectOutcome::Failed(err)
            }
        }
    }

    /// Place the control at a custom-site anchor.
    pub fn place_custom(
        &mut self,
        host: &mut dyn Host,
        editor: &EditorHandle,
        anchor: ElementId,
        placement: Placement,
        offset: Offset,
        z_index: Option<i32>,
    ) -> Result<ElementId, HostError> {
        if let Some(existing) = self.is_current(host, editor)
            && matches!(
                self.control.map(|c| c.placement),
                Some(TriggerPlacement::Custom { anchor: a, .. }) if a == anchor
            )
        {
            return Ok(existing);
        }
        if let Err(err) = self.remove(host) {
            trace!(error = %err, "previous control already gone");
        }
        let spec = self.base_spec(false, offset, z_index);
        let control = place(host, &spec, anchor, placement)?;
        debug!(
            control = control.get(),
            anchor = anchor.get(),
            placement = placement.as_str(),
            "trigger placed at custom anchor"
        );
        self.set_control(control, TriggerPlacement::Custom { anchor, placement }, editor);
        Ok(control)
    }

    fn set_control(&mut self, element: ElementId, placement: TriggerPlacement, editor: &EditorHandle) {
        self.control = Some(TriggerControl {
            element,
            placement,
            editor: editor.element(),
            epoch: editor.epoch(),
        });
    }

    fn floating_position(&self, editor: Rect) -> FloatingPosition {
        let size = self.config.floating_size;
        let inset = self.config.floating_inset;
        FloatingPosition {
            left: editor.right() - size - inset,
            top: editor.bottom() - size - inset,
            z_index: self.config.floating_z_index,
        }
    }

    /// Scroll or resize: coalesce into one animation frame.
    pub fn on_viewport_change(&mut self, host: &mut dyn Host) {
        if !self.is_floating() || !self.in_view || self.frame_pending {
            return;
        }
        match host.request_animation_frame() {
            Ok(()) => self.frame_pending = true,
            Err(err) => trace!(error = %err, "animation frame unavailable"),
        }
    }

    /// Intersection callback for the observed editor.
    pub fn on_intersection(&mut self, host: &mut dyn Host, visible: bool) {
        let was_visible = self.in_view;
        self.in_view = visible;
        if visible && !was_visible {
            self.on_viewport_change(host);
        }
    }

    /// Animation frame: reposition from a fresh snapshot of the editor.
    pub fn on_animation_frame(&mut self, host: &mut dyn Host, editor: Option<&EditorHandle>) {
        self.frame_pending = false;
        let (Some(control), Some(editor)) = (self.control, editor) else {
            return;
        };
        if control.placement != TriggerPlacement::Floating || !self.in_view {
            return;
        }
        let Some(probe) = host.probe(editor.element()).filter(|p| p.connected) else {
            return;
        };
        if let Err(err) = host.position_floating(control.element, self.floating_position(probe.rect)) {
            trace!(error = %err, "reposition skipped");
        }
    }

    /// Remove the live control, if any.
    pub fn remove(&mut self, host: &mut dyn Host) -> Result<(), HostError> {
        let Some(control) = self.control.take() else {
            return Ok(());
        };
        self.frame_pending = false;
        let floating = control.placement == TriggerPlacement::Floating;
        let removed = host.remove_element(control.element);
        if floating {
            host.disconnect_intersection()?;
        }
        removed
    }
}

enum BarLookup {
    Found {
        anchor: ElementId,
        placement: Placement,
    },
    Retry,
    GiveUp,
}

fn place(
    host: &mut dyn Host,
    spec: &ControlSpec,
    anchor: ElementId,
    placement: Placement,
) -> Result<ElementId, HostError> {
    let control = host.create_control(spec)?;
    if let Err(err) = host.insert_control(control, anchor, placement) {
        if let Err(cleanup) = host.remove_element(control) {
            trace!(error = %cleanup, "unplaced control not removed");
        }
        return Err(err);
    }
    Ok(control)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::EditorKind;
    use crate::strategy::DefaultStrategy;
    use snipline_harness::{ElementSpec, FakeDom, Fault, HostOp};

    fn setup() -> (FakeDom, EditorHandle, TriggerInjector) {
        let mut dom = FakeDom::new("https://example.com/");
        let field = dom.append(dom.body(), ElementSpec::textarea().rect(100.0, 400.0, 500.0, 80.0));
        let editor = EditorHandle::new(field, EditorKind::PlainField, 0, dom.rect_of(field).unwrap(), 0);
        let injector = TriggerInjector::new(TriggerConfig::default(), SessionId::new("s1"));
        (dom, editor, injector)
    }

    #[test]
    fn floats_without_a_bar() {
        let (mut dom, editor, mut injector) = setup();
        let outcome = injector.inject(&mut dom, &DefaultStrategy::new(), None, &editor);
        let InjectOutcome::Floating(control) = outcome else {
            panic!("expected floating, got {outcome:?}");
        };
        assert_eq!(dom.intersection_target(), Some(editor.element()));
        assert!(dom.journal().contains(&HostOp::PositionFloating(
            control,
            FloatingPosition {
                left: 600.0 - 28.0 - 8.0,
                top: 480.0 - 28.0 - 8.0,
                z_index: 2_147_483_000,
            }
        )));
        assert_eq!(
            injector.inject(&mut dom, &DefaultStrategy::new(), None, &editor),
            InjectOutcome::AlreadyPresent(control)
        );
        assert_eq!(dom.controls().len(), 1);
    }

    #[test]
    fn bar_lookup_retries_then_floats() {
        let (mut dom, editor, mut injector) = setup();
        let bar = TriggerBar::new("#bar");
        let strategy = DefaultStrategy::new();
        assert_eq!(
            injector.inject(&mut dom, &strategy, Some(&bar), &editor),
            InjectOutcome::Retry(Duration::from_millis(300))
        );
        assert!(matches!(
            injector.inject(&mut dom, &strategy, Some(&bar), &editor),
            InjectOutcome::Retry(_)
        ));
        assert!(matches!(
            injector.inject(&mut dom, &strategy, Some(&bar), &editor),
            InjectOutcome::Floating(_)
        ));
    }

    #[test]
    fn sibling_placement_inside_bar() {
        let (mut dom, editor, mut injector) = setup();
        let bar_el = dom.append(dom.body(), ElementSpec::new("div").id("bar"));
        let send = dom.append(bar_el, ElementSpec::new("button").class("send"));
        let bar = TriggerBar::new("#bar").next_to("button.send", Placement::Before);

        let InjectOutcome::Placed(control) =
            injector.inject(&mut dom, &DefaultStrategy::new(), Some(&bar), &editor)
        else {
            panic!("expected bar placement");
        };
        assert_eq!(dom.children_of(bar_el), &[control, send]);
        assert!(!injector.is_floating());
    }

    #[test]
    fn missing_sibling_falls_back_to_bar_end() {
        let (mut dom, editor, mut injector) = setup();
        let bar_el = dom.append(dom.body(), ElementSpec::new("div").id("bar"));
        let bar = TriggerBar::new("#bar").next_to("button.send", Placement::Before);
        let strategy = DefaultStrategy::new();
        for _ in 0..4 {
            assert!(matches!(
                injector.inject(&mut dom, &strategy, Some(&bar), &editor),
                InjectOutcome::Retry(_)
            ));
        }
        let InjectOutcome::Placed(control) = injector.inject(&mut dom, &strategy, Some(&bar), &editor)
        else {
            panic!("expected placement at bar end");
        };
        assert_eq!(dom.children_of(bar_el), &[control]);
    }

    #[test]
    fn injection_failure_leaves_no_control() {
        let (mut dom, editor, mut injector) = setup();
        let bar_el = dom.append(dom.body(), ElementSpec::new("div").id("bar"));
        dom.inject_fault(bar_el, Fault::InsertControlThrows);
        let outcome = injector.inject(&mut dom, &DefaultStrategy::new(), Some(&TriggerBar::new("#bar")), &editor);
        assert!(matches!(outcome, InjectOutcome::Failed(_)));
        assert!(dom.controls().is_empty());
        assert!(injector.control().is_none());
    }

    #[test]
    fn scroll_is_coalesced_into_one_frame() {
        let (mut dom, editor, mut injector) = setup();
        injector.inject(&mut dom, &DefaultStrategy::new(), None, &editor);
        dom.take_journal();
        injector.on_viewport_change(&mut dom);
        injector.on_viewport_change(&mut dom);
        injector.on_viewport_change(&mut dom);
        assert_eq!(dom.journal(), &[HostOp::RequestAnimationFrame]);

        dom.set_rect(editor.element(), Rect::new(100.0, 200.0, 500.0, 80.0));
        injector.on_animation_frame(&mut dom, Some(&editor));
        assert!(matches!(dom.journal().last(), Some(HostOp::PositionFloating(_, p)) if p.top == 280.0 - 36.0));
    }

    #[test]
    fn out_of_view_suppresses_repositioning() {
        let (mut dom, editor, mut injector) = setup();
        injector.inject(&mut dom, &DefaultStrategy::new(), None, &editor);
        injector.on_intersection(&mut dom, false);
        dom.take_journal();
        injector.on_viewport_change(&mut dom);
        assert!(dom.journal().is_empty());

        injector.on_intersection(&mut dom, true);
        assert_eq!(dom.journal(), &[HostOp::RequestAnimationFrame]);
    }

    #[test]
    fn remove_clears_record_when_page_already_removed_it() {
        let (mut dom, editor, mut injector) = setup();
        let InjectOutcome::Floating(control) =
            injector.inject(&mut dom, &DefaultStrategy::new(), None, &editor)
        else {
            panic!("expected floating");
        };
        dom.detach(control);
        assert!(injector.remove(&mut dom).is_err());
        assert!(injector.control().is_none());
        assert!(injector.remove(&mut dom).is_ok());
    }
}
