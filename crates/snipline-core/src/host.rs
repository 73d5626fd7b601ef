#![forbid(unsafe_code)]

//! The page abstraction.
//!
//! [`Host`] is everything the engine may do to a document it does not own.
//! Implementations:
//! - `snipline-web` binds it to `web-sys` inside a browser,
//! - `snipline-harness` provides an in-memory document for tests.
//!
//! # Snapshots
//!
//! Geometry and element state are read through [`Host::probe`] exactly once
//! per decision pass and carried around as an [`ElementProbe`]. Decisions made
//! within one pass never re-read live layout, so a page mutating mid-scan
//! cannot tear a decision.
//!
//! # Errors
//!
//! Every fallible operation returns [`HostError`]; implementations must turn
//! page exceptions into errors rather than panicking.

use bitflags::bitflags;

use crate::error::HostError;
use crate::geometry::{Point, Rect};
use crate::site::{Offset, Placement};

/// Attribute carrying the owning session id on every injected element.
pub const SESSION_ATTRIBUTE: &str = "data-snipline-session";

/// Opaque handle to a host element.
///
/// Ids are never reused by a host during a page lifetime, so a stale id from a
/// previous epoch can only ever resolve to "detached".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(u64);

impl ElementId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Identifier of one engine activation on one page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for SessionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

bitflags! {
    /// What kind of editing machinery an element exposes.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EditorTraits: u8 {
        /// `<textarea>` or a text-like `<input>`.
        const TEXT_FIELD           = 0b0_0001;
        /// The field's value is tracked by a UI framework (React-style value tracker).
        const FRAMEWORK_CONTROLLED = 0b0_0010;
        /// A rich editor exposing a transactional insertion API.
        const RICH_TRANSACTIONAL   = 0b0_0100;
        /// `contenteditable` region.
        const CONTENT_EDITABLE     = 0b0_1000;
        /// `role="textbox"`.
        const TEXTBOX_ROLE         = 0b1_0000;
    }
}

/// Cheap, one-shot snapshot of an element's geometry and state.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementProbe {
    /// Whether the element is attached to the document.
    pub connected: bool,
    /// Lowercase tag name.
    pub tag: String,
    /// Viewport-relative bounding rectangle.
    pub rect: Rect,
    pub disabled: bool,
    pub read_only: bool,
    pub traits: EditorTraits,
}

impl ElementProbe {
    /// Attached, enabled, writable and with a non-degenerate box.
    #[must_use]
    pub fn passes_cheap_checks(&self) -> bool {
        self.connected && !self.disabled && !self.read_only && !self.rect.is_degenerate()
    }

    /// Whether the element looks like something text can be typed into.
    #[must_use]
    pub fn is_editing_surface_like(&self) -> bool {
        !self.traits.is_empty()
    }
}

/// Result of the (expensive) computed-style read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StyleSnapshot {
    pub display_none: bool,
    pub visibility_hidden: bool,
    pub opacity: f64,
}

impl StyleSnapshot {
    #[must_use]
    pub fn is_visible(&self) -> bool {
        !self.display_none && !self.visibility_hidden && self.opacity > 0.0
    }
}

impl Default for StyleSnapshot {
    fn default() -> Self {
        Self {
            display_none: false,
            visibility_hidden: false,
            opacity: 1.0,
        }
    }
}

/// One node reported as added by a child-list mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedNode {
    /// `None` for text and comment nodes.
    pub element: Option<ElementId>,
    /// Lowercase tag name (empty for non-elements).
    pub tag: String,
    /// The node carries a `contenteditable` or `role="textbox"` attribute itself.
    pub editable_hint: bool,
    /// Number of element children; zero means no subtree query is needed.
    pub child_elements: usize,
}

/// Host mutation notification, flattened from the page's observer records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    ChildList {
        target: ElementId,
        added: Vec<AddedNode>,
        removed: usize,
    },
    Attributes {
        target: ElementId,
        name: String,
    },
}

/// Subscription parameters for [`Host::observe_mutations`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationFilter {
    /// Subtree root; `None` observes the whole document body.
    pub scope: Option<ElementId>,
    /// Attribute names to observe; empty disables attribute observation.
    pub attributes: Vec<String>,
}

/// Synthetic events dispatched so host frameworks accept programmatic input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntheticEvent {
    Focus,
    KeyDown { key: String },
    KeyPress { key: String },
    BeforeInput { data: String },
    Input { data: String, input_type: &'static str },
    KeyUp { key: String },
    Change,
    Blur,
}

impl SyntheticEvent {
    /// DOM event type name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Focus => "focus",
            Self::KeyDown { .. } => "keydown",
            Self::KeyPress { .. } => "keypress",
            Self::BeforeInput { .. } => "beforeinput",
            Self::Input { .. } => "input",
            Self::KeyUp { .. } => "keyup",
            Self::Change => "change",
            Self::Blur => "blur",
        }
    }
}

/// How an injected control should look and be tagged.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSpec {
    pub session: SessionId,
    /// Accessible label / tooltip.
    pub label: String,
    /// Class list applied to the control (strategies use it to blend in).
    pub class_name: String,
    pub floating: bool,
    pub z_index: Option<i32>,
    pub offset: Offset,
}

/// Screen-anchored placement for a floating control.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatingPosition {
    pub left: f64,
    pub top: f64,
    pub z_index: i32,
}

/// An injected element found on the page with its session tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedControl {
    pub element: ElementId,
    pub session: String,
}

/// One row of the selection panel as the host should draw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelItemView {
    pub id: String,
    pub title: String,
    pub category: String,
    pub preview: String,
    pub selected: bool,
}

/// Complete render model of the selection panel.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelView {
    pub session: SessionId,
    /// Rectangle of the control the panel is anchored to.
    pub anchor: Rect,
    pub max_height: f64,
    pub query: String,
    pub items: Vec<PanelItemView>,
    pub status: Option<String>,
    pub busy: bool,
}

/// Everything the engine may do to a page.
///
/// The trait is object safe; techniques and strategies receive `&mut dyn Host`.
pub trait Host {
    // --- Document -------------------------------------------------------

    /// Full current location (used for navigation detection).
    fn location(&self) -> String;

    /// Hostname of the current origin.
    fn hostname(&self) -> String;

    /// Visible viewport rectangle.
    fn viewport(&self) -> Rect;

    /// Whether the document is currently visible to the user.
    fn is_document_visible(&self) -> bool;

    // --- Queries --------------------------------------------------------

    /// All elements matching `selector`, in document order.
    fn query_all(&self, selector: &str) -> Result<Vec<ElementId>, HostError>;

    /// Descendants of `root` matching `selector`, in document order.
    fn query_within(&self, root: ElementId, selector: &str) -> Result<Vec<ElementId>, HostError>;

    /// Whether `el` matches `selector`.
    fn matches(&self, el: ElementId, selector: &str) -> Result<bool, HostError>;

    /// Snapshot of geometry and state; `None` if the id no longer resolves.
    fn probe(&self, el: ElementId) -> Option<ElementProbe>;

    /// Computed style; the expensive check, only called after [`Host::probe`] passes.
    fn computed_style(&self, el: ElementId) -> Option<StyleSnapshot>;

    /// Topmost element at a viewport point.
    fn element_at_point(&self, point: Point) -> Option<ElementId>;

    /// Whether `el` is `ancestor` or one of its descendants.
    fn contains(&self, ancestor: ElementId, el: ElementId) -> bool;

    // --- Editing --------------------------------------------------------

    fn focus(&mut self, el: ElementId) -> Result<(), HostError>;

    /// Current value (fields) or text content (editable regions).
    fn read_text(&self, el: ElementId) -> Result<String, HostError>;

    fn select_all(&mut self, el: ElementId) -> Result<(), HostError>;

    fn move_caret_to_end(&mut self, el: ElementId) -> Result<(), HostError>;

    /// Insert through the rich editor's own transaction API.
    ///
    /// `Ok(false)` means no such API is reachable from this element.
    fn rich_insert(&mut self, el: ElementId, text: &str) -> Result<bool, HostError>;

    /// `document.execCommand("insertText")` at the current selection.
    fn exec_insert_text(&mut self, el: ElementId, text: &str) -> Result<bool, HostError>;

    /// Assign a field value through the element prototype's native setter,
    /// bypassing a framework's value tracker.
    fn set_value_native(&mut self, el: ElementId, value: &str) -> Result<(), HostError>;

    /// Plain assignment: `value` for fields, text content for editable regions.
    fn assign_content(&mut self, el: ElementId, text: &str) -> Result<(), HostError>;

    fn dispatch_event(&mut self, el: ElementId, event: &SyntheticEvent) -> Result<(), HostError>;

    // --- Overlay --------------------------------------------------------

    /// Create a detached trigger control.
    fn create_control(&mut self, spec: &ControlSpec) -> Result<ElementId, HostError>;

    /// Attach `control` relative to `anchor`.
    fn insert_control(
        &mut self,
        control: ElementId,
        anchor: ElementId,
        placement: Placement,
    ) -> Result<(), HostError>;

    /// Attach (if needed) and move a floating control.
    fn position_floating(
        &mut self,
        control: ElementId,
        position: FloatingPosition,
    ) -> Result<(), HostError>;

    fn remove_element(&mut self, el: ElementId) -> Result<(), HostError>;

    /// Every element carrying [`SESSION_ATTRIBUTE`].
    fn tagged_controls(&self) -> Vec<TaggedControl>;

    fn render_panel(&mut self, view: &PanelView) -> Result<(), HostError>;

    fn close_panel(&mut self) -> Result<(), HostError>;

    fn focus_panel_search(&mut self) -> Result<(), HostError>;

    // --- Subscriptions --------------------------------------------------

    /// (Re)subscribe the mutation observer. Replaces any previous subscription.
    fn observe_mutations(&mut self, filter: &MutationFilter) -> Result<(), HostError>;

    fn disconnect_mutations(&mut self) -> Result<(), HostError>;

    /// Observe visibility of `el`. Replaces any previous target.
    fn observe_intersection(&mut self, el: ElementId) -> Result<(), HostError>;

    fn disconnect_intersection(&mut self) -> Result<(), HostError>;

    /// Ask for one animation-frame callback.
    fn request_animation_frame(&mut self) -> Result<(), HostError>;

    /// Wrap the history push/replace entry points.
    fn install_history_hooks(&mut self) -> Result<(), HostError>;

    fn remove_history_hooks(&mut self) -> Result<(), HostError>;

    /// Scroll, resize, visibility, unload and outside-click listeners.
    fn set_page_listeners(&mut self, enabled: bool) -> Result<(), HostError>;
}
