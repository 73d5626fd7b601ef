#![forbid(unsafe_code)]

//! In-memory document implementing [`Host`].
//!
//! # Model
//!
//! Elements live in an arena indexed by [`ElementId`]; ids are never reused,
//! so a removed element keeps resolving as "detached". The body is element 0
//! and the only root: an element is connected exactly when its parent chain
//! reaches the body.
//!
//! Editing follows the behavior engines have to cope with on real pages:
//! - a framework-controlled field silently reverts plain value assignment,
//! - `execCommand` only acts on the focused, editable element,
//! - the rich-editor transaction API exists only on elements built with
//!   [`ElementSpec::rich_editor`].
//!
//! Anything beyond that is scripted per element through [`Fault`].
//!
//! # Observability
//!
//! Every mutating host call is appended to a [`HostOp`] journal. Selector
//! queries and computed-style reads are counted separately because they are
//! issued through `&self`.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use snipline_core::error::HostError;
use snipline_core::geometry::{Point, Rect};
use snipline_core::host::{
    AddedNode, ControlSpec, EditorTraits, ElementId, ElementProbe, FloatingPosition, Host,
    MutationFilter, MutationRecord, PanelView, SESSION_ATTRIBUTE, StyleSnapshot, SyntheticEvent,
    TaggedControl,
};
use snipline_core::site::Placement;

use crate::selector::{SelectorList, SelectorTree};

const CONTROL_SIZE: f64 = 28.0;

// ============================================================================
// Construction
// ============================================================================

/// Builder for one element.
#[derive(Debug, Clone)]
pub struct ElementSpec {
    tag: String,
    attrs: BTreeMap<String, String>,
    rect: Rect,
    style: StyleSnapshot,
    text: String,
    framework_controlled: bool,
    rich_editor: bool,
}

impl ElementSpec {
    /// A visible element with a 100x20 box at the origin.
    #[must_use]
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            rect: Rect::new(0.0, 0.0, 100.0, 20.0),
            style: StyleSnapshot::default(),
            text: String::new(),
            framework_controlled: false,
            rich_editor: false,
        }
    }

    #[must_use]
    pub fn textarea() -> Self {
        Self::new("textarea").rect(0.0, 500.0, 600.0, 60.0)
    }

    /// `<div contenteditable="true">`.
    #[must_use]
    pub fn editable_div() -> Self {
        Self::new("div")
            .attr("contenteditable", "true")
            .rect(0.0, 500.0, 600.0, 60.0)
    }

    #[must_use]
    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn id(self, id: &str) -> Self {
        self.attr("id", id)
    }

    #[must_use]
    pub fn class(self, class: &str) -> Self {
        self.attr("class", class)
    }

    #[must_use]
    pub fn rect(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.rect = Rect::new(x, y, width, height);
        self
    }

    #[must_use]
    pub fn style(mut self, style: StyleSnapshot) -> Self {
        self.style = style;
        self
    }

    /// `display: none`.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.style.display_none = true;
        self
    }

    #[must_use]
    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    /// Field whose value is owned by a UI framework's value tracker.
    #[must_use]
    pub fn framework_controlled(mut self) -> Self {
        self.framework_controlled = true;
        self
    }

    /// Region that exposes a transactional rich-editor API.
    #[must_use]
    pub fn rich_editor(mut self) -> Self {
        self.rich_editor = true;
        self
    }
}

/// Scripted misbehavior for one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The rich-editor API throws.
    RichInsertThrows,
    /// `execCommand` reports `false` and changes nothing.
    ExecRejected,
    /// `execCommand` throws.
    ExecThrows,
    /// The native setter is accepted but the value snaps back.
    NativeSetterReverted,
    /// Plain assignment is accepted but the content snaps back.
    AssignmentReverted,
    /// Plain assignment throws.
    AssignmentThrows,
    /// Inserting a control relative to this anchor throws.
    InsertControlThrows,
    /// Removing this element throws.
    RemoveThrows,
    /// Synthetic event dispatch on this element throws.
    DispatchThrows,
}

/// One mutating host call.
#[derive(Debug, Clone, PartialEq)]
pub enum HostOp {
    Focus(ElementId),
    SelectAll(ElementId),
    CaretToEnd(ElementId),
    RichInsert(ElementId, String),
    ExecInsert(ElementId, String),
    NativeSet(ElementId, String),
    Assign(ElementId, String),
    Dispatch(ElementId, &'static str),
    CreateControl(ElementId),
    InsertControl {
        control: ElementId,
        anchor: ElementId,
        placement: Placement,
    },
    PositionFloating(ElementId, FloatingPosition),
    Remove(ElementId),
    RenderPanel,
    ClosePanel,
    FocusPanelSearch,
    ObserveMutations(MutationFilter),
    DisconnectMutations,
    ObserveIntersection(ElementId),
    DisconnectIntersection,
    RequestAnimationFrame,
    InstallHistoryHooks,
    RemoveHistoryHooks,
    PageListeners(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    End,
    All,
}

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attrs: BTreeMap<String, String>,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    rect: Rect,
    style: StyleSnapshot,
    text: String,
    framework_controlled: bool,
    rich_editor: bool,
    selection: Selection,
}

impl Node {
    fn from_spec(spec: ElementSpec) -> Self {
        Self {
            tag: spec.tag,
            attrs: spec.attrs,
            parent: None,
            children: Vec::new(),
            rect: spec.rect,
            style: spec.style,
            text: spec.text,
            framework_controlled: spec.framework_controlled,
            rich_editor: spec.rich_editor,
            selection: Selection::End,
        }
    }

    fn is_text_field(&self) -> bool {
        match self.tag.as_str() {
            "textarea" => true,
            "input" => matches!(
                self.attrs.get("type").map(String::as_str),
                None | Some("text" | "search" | "email" | "url")
            ),
            _ => false,
        }
    }

    fn is_content_editable(&self) -> bool {
        matches!(
            self.attrs.get("contenteditable").map(String::as_str),
            Some("" | "true" | "plaintext-only")
        )
    }

    fn has_textbox_role(&self) -> bool {
        self.attrs.get("role").map(String::as_str) == Some("textbox")
    }

    fn traits(&self) -> EditorTraits {
        let mut traits = EditorTraits::empty();
        traits.set(EditorTraits::TEXT_FIELD, self.is_text_field());
        traits.set(EditorTraits::FRAMEWORK_CONTROLLED, self.framework_controlled);
        traits.set(EditorTraits::RICH_TRANSACTIONAL, self.rich_editor);
        traits.set(EditorTraits::CONTENT_EDITABLE, self.is_content_editable());
        traits.set(EditorTraits::TEXTBOX_ROLE, self.has_textbox_role());
        traits
    }

    fn flag(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
            || self.attrs.get(&format!("aria-{name}")).map(String::as_str) == Some("true")
    }

    fn insert_at_selection(&mut self, text: &str) {
        match self.selection {
            Selection::All => self.text = text.to_string(),
            Selection::End => self.text.push_str(text),
        }
        self.selection = Selection::End;
    }
}

// ============================================================================
// FakeDom
// ============================================================================

/// Deterministic in-memory document.
#[derive(Debug)]
pub struct FakeDom {
    nodes: Vec<Node>,
    location: String,
    viewport: Rect,
    visible: bool,
    focused: Option<ElementId>,
    faults: Vec<(ElementId, Fault)>,
    journal: Vec<HostOp>,
    queries: RefCell<Vec<String>>,
    style_reads: Cell<usize>,
    mutation_filter: Option<MutationFilter>,
    intersection_target: Option<ElementId>,
    history_hooks: bool,
    page_listeners: bool,
    panel: Option<PanelView>,
}

impl FakeDom {
    /// Empty document at `location` with a 1280x800 viewport.
    #[must_use]
    pub fn new(location: &str) -> Self {
        let mut body = Node::from_spec(ElementSpec::new("body").rect(0.0, 0.0, 1280.0, 800.0));
        body.parent = None;
        Self {
            nodes: vec![body],
            location: location.to_string(),
            viewport: Rect::new(0.0, 0.0, 1280.0, 800.0),
            visible: true,
            focused: None,
            faults: Vec::new(),
            journal: Vec::new(),
            queries: RefCell::new(Vec::new()),
            style_reads: Cell::new(0),
            mutation_filter: None,
            intersection_target: None,
            history_hooks: false,
            page_listeners: false,
            panel: None,
        }
    }

    #[must_use]
    pub const fn body(&self) -> ElementId {
        ElementId::new(0)
    }

    /// Create an element and attach it as the last child of `parent`.
    pub fn append(&mut self, parent: ElementId, spec: ElementSpec) -> ElementId {
        let id = self.create(spec);
        self.attach(id, parent, None);
        id
    }

    /// Create a detached element.
    pub fn create(&mut self, spec: ElementSpec) -> ElementId {
        let id = ElementId::new(self.nodes.len() as u64);
        self.nodes.push(Node::from_spec(spec));
        id
    }

    /// Detach `el` (and its subtree) from the document, as a page script would.
    pub fn detach(&mut self, el: ElementId) {
        if let Some(parent) = self.node(el).and_then(|n| n.parent) {
            if let Some(p) = self.node_mut(parent) {
                p.children.retain(|c| *c != el);
            }
            if let Some(n) = self.node_mut(el) {
                n.parent = None;
            }
        }
        if self.focused.is_some_and(|f| self.contains(el, f)) {
            self.focused = None;
        }
    }

    /// Change the location without a reload (same-document navigation).
    pub fn navigate(&mut self, location: &str) {
        self.location = location.to_string();
    }

    pub fn set_document_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
    }

    pub fn set_rect(&mut self, el: ElementId, rect: Rect) {
        if let Some(n) = self.node_mut(el) {
            n.rect = rect;
        }
    }

    pub fn set_style(&mut self, el: ElementId, style: StyleSnapshot) {
        if let Some(n) = self.node_mut(el) {
            n.style = style;
        }
    }

    pub fn set_attr(&mut self, el: ElementId, name: &str, value: &str) {
        if let Some(n) = self.node_mut(el) {
            n.attrs.insert(name.to_string(), value.to_string());
        }
    }

    pub fn remove_attr(&mut self, el: ElementId, name: &str) {
        if let Some(n) = self.node_mut(el) {
            n.attrs.remove(name);
        }
    }

    pub fn set_text(&mut self, el: ElementId, text: &str) {
        if let Some(n) = self.node_mut(el) {
            n.text = text.to_string();
        }
    }

    pub fn inject_fault(&mut self, el: ElementId, fault: Fault) {
        self.faults.push((el, fault));
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    // --- Inspection ---------------------------------------------------------

    /// Current text or value of `el`; empty for unknown ids.
    #[must_use]
    pub fn text_of(&self, el: ElementId) -> &str {
        self.node(el).map_or("", |n| n.text.as_str())
    }

    #[must_use]
    pub fn attr(&self, el: ElementId, name: &str) -> Option<&str> {
        self.node(el)?.attrs.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn parent_of(&self, el: ElementId) -> Option<ElementId> {
        self.node(el)?.parent
    }

    #[must_use]
    pub fn children_of(&self, el: ElementId) -> &[ElementId] {
        self.node(el).map_or(&[], |n| n.children.as_slice())
    }

    #[must_use]
    pub fn rect_of(&self, el: ElementId) -> Option<Rect> {
        self.node(el).map(|n| n.rect)
    }

    #[must_use]
    pub fn is_connected(&self, el: ElementId) -> bool {
        let mut cursor = Some(el);
        while let Some(id) = cursor {
            if id == self.body() {
                return true;
            }
            cursor = self.node(id).and_then(|n| n.parent);
        }
        false
    }

    #[must_use]
    pub fn focused(&self) -> Option<ElementId> {
        self.focused
    }

    #[must_use]
    pub fn journal(&self) -> &[HostOp] {
        &self.journal
    }

    pub fn take_journal(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.journal)
    }

    /// Every selector passed to a query, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.queries.borrow().clone()
    }

    pub fn clear_queries(&self) {
        self.queries.borrow_mut().clear();
    }

    /// Number of computed-style reads so far.
    #[must_use]
    pub fn style_reads(&self) -> usize {
        self.style_reads.get()
    }

    #[must_use]
    pub fn mutation_filter(&self) -> Option<&MutationFilter> {
        self.mutation_filter.as_ref()
    }

    #[must_use]
    pub fn intersection_target(&self) -> Option<ElementId> {
        self.intersection_target
    }

    #[must_use]
    pub fn history_hooks_installed(&self) -> bool {
        self.history_hooks
    }

    #[must_use]
    pub fn page_listeners_enabled(&self) -> bool {
        self.page_listeners
    }

    /// The panel as last rendered, while open.
    #[must_use]
    pub fn panel(&self) -> Option<&PanelView> {
        self.panel.as_ref()
    }

    /// Connected elements carrying [`SESSION_ATTRIBUTE`], in document order.
    #[must_use]
    pub fn controls(&self) -> Vec<ElementId> {
        self.tagged_controls().into_iter().map(|t| t.element).collect()
    }

    // --- Mutation records ---------------------------------------------------

    /// Child-list record reporting `el` as added to its parent.
    #[must_use]
    pub fn added_record(&self, el: ElementId) -> MutationRecord {
        let target = self.parent_of(el).unwrap_or(self.body());
        let added = self.node(el).map_or_else(Vec::new, |n| {
            vec![AddedNode {
                element: Some(el),
                tag: n.tag.clone(),
                editable_hint: n.is_content_editable() || n.has_textbox_role(),
                child_elements: n.children.len(),
            }]
        });
        MutationRecord::ChildList {
            target,
            added,
            removed: 0,
        }
    }

    /// Child-list record for a text node appended under `target`.
    #[must_use]
    pub fn text_added_record(&self, target: ElementId) -> MutationRecord {
        MutationRecord::ChildList {
            target,
            added: vec![AddedNode {
                element: None,
                tag: String::new(),
                editable_hint: false,
                child_elements: 0,
            }],
            removed: 0,
        }
    }

    #[must_use]
    pub fn attribute_record(&self, el: ElementId, name: &str) -> MutationRecord {
        MutationRecord::Attributes {
            target: el,
            name: name.to_string(),
        }
    }

    // --- Internals ----------------------------------------------------------

    fn node(&self, el: ElementId) -> Option<&Node> {
        usize::try_from(el.get())
            .ok()
            .and_then(|i| self.nodes.get(i))
    }

    fn node_mut(&mut self, el: ElementId) -> Option<&mut Node> {
        usize::try_from(el.get())
            .ok()
            .and_then(|i| self.nodes.get_mut(i))
    }

    fn has_fault(&self, el: ElementId, fault: Fault) -> bool {
        self.faults.contains(&(el, fault))
    }

    fn connected_node(&self, el: ElementId) -> Result<&Node, HostError> {
        if !self.is_connected(el) {
            return Err(HostError::Detached(el));
        }
        self.node(el).ok_or(HostError::Detached(el))
    }

    fn connected_node_mut(&mut self, el: ElementId) -> Result<&mut Node, HostError> {
        if !self.is_connected(el) {
            return Err(HostError::Detached(el));
        }
        self.node_mut(el).ok_or(HostError::Detached(el))
    }

    /// Move `el` under `parent` at `index` (append when `None`).
    fn attach(&mut self, el: ElementId, parent: ElementId, index: Option<usize>) {
        self.detach(el);
        if let Some(p) = self.node_mut(parent) {
            let at = index.unwrap_or(p.children.len()).min(p.children.len());
            p.children.insert(at, el);
        }
        if let Some(n) = self.node_mut(el) {
            n.parent = Some(parent);
        }
    }

    /// Pre-order descendants of `root`, excluding `root`.
    fn descendants(&self, root: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut stack: Vec<ElementId> = self.children_of(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children_of(id).iter().rev().copied());
        }
        out
    }

    fn parse(&self, selector: &str) -> Result<SelectorList, HostError> {
        self.queries.borrow_mut().push(selector.to_string());
        SelectorList::parse(selector)
            .map_err(|err| HostError::InvalidSelector(format!("{selector}: {err}")))
    }
}

impl SelectorTree for FakeDom {
    type Node = ElementId;

    fn tag(&self, node: ElementId) -> &str {
        self.node(node).map_or("", |n| n.tag.as_str())
    }

    fn attr(&self, node: ElementId, name: &str) -> Option<&str> {
        FakeDom::attr(self, node, name)
    }

    fn parent(&self, node: ElementId) -> Option<ElementId> {
        self.parent_of(node)
    }
}

// ============================================================================
// Host
// ============================================================================

impl Host for FakeDom {
    fn location(&self) -> String {
        self.location.clone()
    }

    fn hostname(&self) -> String {
        let rest = self
            .location
            .split_once("://")
            .map_or(self.location.as_str(), |(_, rest)| rest);
        let end = rest.find(['/', ':', '?', '#']).unwrap_or(rest.len());
        rest[..end].to_ascii_lowercase()
    }

    fn viewport(&self) -> Rect {
        self.viewport
    }

    fn is_document_visible(&self) -> bool {
        self.visible
    }

    fn query_all(&self, selector: &str) -> Result<Vec<ElementId>, HostError> {
        let list = self.parse(selector)?;
        Ok(self
            .descendants(self.body())
            .into_iter()
            .filter(|el| list.matches(self, *el))
            .collect())
    }

    fn query_within(&self, root: ElementId, selector: &str) -> Result<Vec<ElementId>, HostError> {
        let list = self.parse(selector)?;
        Ok(self
            .descendants(root)
            .into_iter()
            .filter(|el| list.matches(self, *el))
            .collect())
    }

    fn matches(&self, el: ElementId, selector: &str) -> Result<bool, HostError> {
        let list = self.parse(selector)?;
        Ok(self.node(el).is_some() && list.matches(self, el))
    }

    fn probe(&self, el: ElementId) -> Option<ElementProbe> {
        let node = self.node(el)?;
        Some(ElementProbe {
            connected: self.is_connected(el),
            tag: node.tag.clone(),
            rect: node.rect,
            disabled: node.flag("disabled"),
            read_only: node.flag("readonly"),
            traits: node.traits(),
        })
    }

    fn computed_style(&self, el: ElementId) -> Option<StyleSnapshot> {
        self.style_reads.set(self.style_reads.get() + 1);
        self.node(el).map(|n| n.style)
    }

    fn element_at_point(&self, point: Point) -> Option<ElementId> {
        self.descendants(self.body())
            .into_iter()
            .filter(|el| {
                self.node(*el)
                    .is_some_and(|n| n.style.is_visible() && n.rect.contains(point))
            })
            .last()
    }

    fn contains(&self, ancestor: ElementId, el: ElementId) -> bool {
        let mut cursor = Some(el);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.parent_of(id);
        }
        false
    }

    fn focus(&mut self, el: ElementId) -> Result<(), HostError> {
        self.connected_node(el)?;
        self.journal.push(HostOp::Focus(el));
        self.focused = Some(el);
        Ok(())
    }

    fn read_text(&self, el: ElementId) -> Result<String, HostError> {
        Ok(self.connected_node(el)?.text.clone())
    }

    fn select_all(&mut self, el: ElementId) -> Result<(), HostError> {
        self.connected_node_mut(el)?.selection = Selection::All;
        self.journal.push(HostOp::SelectAll(el));
        Ok(())
    }

    fn move_caret_to_end(&mut self, el: ElementId) -> Result<(), HostError> {
        self.connected_node_mut(el)?.selection = Selection::End;
        self.journal.push(HostOp::CaretToEnd(el));
        Ok(())
    }

    fn rich_insert(&mut self, el: ElementId, text: &str) -> Result<bool, HostError> {
        self.journal.push(HostOp::RichInsert(el, text.to_string()));
        if self.has_fault(el, Fault::RichInsertThrows) {
            return Err(HostError::Script("editor view threw during dispatch".into()));
        }
        let node = self.connected_node_mut(el)?;
        if !node.rich_editor {
            return Ok(false);
        }
        node.insert_at_selection(text);
        Ok(true)
    }

    fn exec_insert_text(&mut self, el: ElementId, text: &str) -> Result<bool, HostError> {
        self.journal.push(HostOp::ExecInsert(el, text.to_string()));
        if self.has_fault(el, Fault::ExecThrows) {
            return Err(HostError::Script("execCommand threw".into()));
        }
        let rejected = self.has_fault(el, Fault::ExecRejected);
        let focused = self.focused == Some(el);
        let node = self.connected_node_mut(el)?;
        if rejected || !focused || !(node.is_text_field() || node.is_content_editable()) {
            return Ok(false);
        }
        node.insert_at_selection(text);
        Ok(true)
    }

    fn set_value_native(&mut self, el: ElementId, value: &str) -> Result<(), HostError> {
        self.journal.push(HostOp::NativeSet(el, value.to_string()));
        let reverted = self.has_fault(el, Fault::NativeSetterReverted);
        let node = self.connected_node_mut(el)?;
        if !node.is_text_field() {
            return Err(HostError::Unsupported("native value setter"));
        }
        if !reverted {
            node.text = value.to_string();
        }
        Ok(())
    }

    fn assign_content(&mut self, el: ElementId, text: &str) -> Result<(), HostError> {
        self.journal.push(HostOp::Assign(el, text.to_string()));
        if self.has_fault(el, Fault::AssignmentThrows) {
            return Err(HostError::Script("assignment threw".into()));
        }
        let reverted = self.has_fault(el, Fault::AssignmentReverted);
        let node = self.connected_node_mut(el)?;
        // The value tracker restores its own copy of a controlled field.
        if !reverted && !node.framework_controlled {
            node.text = text.to_string();
        }
        Ok(())
    }

    fn dispatch_event(&mut self, el: ElementId, event: &SyntheticEvent) -> Result<(), HostError> {
        self.connected_node(el)?;
        if self.has_fault(el, Fault::DispatchThrows) {
            return Err(HostError::Script(format!(
                "listener threw on {}",
                event.event_type()
            )));
        }
        self.journal.push(HostOp::Dispatch(el, event.event_type()));
        Ok(())
    }

    fn create_control(&mut self, spec: &ControlSpec) -> Result<ElementId, HostError> {
        let mut element = ElementSpec::new("button")
            .attr(SESSION_ATTRIBUTE, spec.session.as_str())
            .attr("type", "button")
            .attr("aria-label", &spec.label)
            .attr("title", &spec.label)
            .class(&spec.class_name)
            .rect(0.0, 0.0, 0.0, 0.0);
        if spec.floating {
            element = element.attr("data-floating", "true");
        }
        let id = self.create(element);
        self.journal.push(HostOp::CreateControl(id));
        Ok(id)
    }

    fn insert_control(
        &mut self,
        control: ElementId,
        anchor: ElementId,
        placement: Placement,
    ) -> Result<(), HostError> {
        let anchor_rect = self.connected_node(anchor)?.rect;
        if self.node(control).is_none() {
            return Err(HostError::Detached(control));
        }
        if self.has_fault(anchor, Fault::InsertControlThrows) {
            return Err(HostError::Script("insertion point rejected the node".into()));
        }
        match placement {
            Placement::InsideStart => self.attach(control, anchor, Some(0)),
            Placement::InsideEnd => self.attach(control, anchor, None),
            Placement::Before | Placement::After => {
                let parent = self
                    .parent_of(anchor)
                    .ok_or(HostError::Unsupported("sibling placement next to the body"))?;
                self.detach(control);
                let index = self
                    .children_of(parent)
                    .iter()
                    .position(|c| *c == anchor)
                    .unwrap_or(0);
                let at = if placement == Placement::After {
                    index + 1
                } else {
                    index
                };
                self.attach(control, parent, Some(at));
            }
        }
        self.set_rect(
            control,
            Rect::new(anchor_rect.x, anchor_rect.y, CONTROL_SIZE, CONTROL_SIZE),
        );
        self.journal.push(HostOp::InsertControl {
            control,
            anchor,
            placement,
        });
        Ok(())
    }

    fn position_floating(
        &mut self,
        control: ElementId,
        position: FloatingPosition,
    ) -> Result<(), HostError> {
        if self.node(control).is_none() {
            return Err(HostError::Detached(control));
        }
        if !self.is_connected(control) {
            let body = self.body();
            self.attach(control, body, None);
        }
        self.set_rect(
            control,
            Rect::new(position.left, position.top, CONTROL_SIZE, CONTROL_SIZE),
        );
        self.journal.push(HostOp::PositionFloating(control, position));
        Ok(())
    }

    fn remove_element(&mut self, el: ElementId) -> Result<(), HostError> {
        if self.has_fault(el, Fault::RemoveThrows) {
            return Err(HostError::Script("removal threw".into()));
        }
        if el == self.body() || !self.is_connected(el) {
            return Err(HostError::Detached(el));
        }
        self.detach(el);
        self.journal.push(HostOp::Remove(el));
        Ok(())
    }

    fn tagged_controls(&self) -> Vec<TaggedControl> {
        self.descendants(self.body())
            .into_iter()
            .filter_map(|el| {
                self.attr(el, SESSION_ATTRIBUTE).map(|session| TaggedControl {
                    element: el,
                    session: session.to_string(),
                })
            })
            .collect()
    }

    fn render_panel(&mut self, view: &PanelView) -> Result<(), HostError> {
        self.panel = Some(view.clone());
        self.journal.push(HostOp::RenderPanel);
        Ok(())
    }

    fn close_panel(&mut self) -> Result<(), HostError> {
        self.panel = None;
        self.journal.push(HostOp::ClosePanel);
        Ok(())
    }

    fn focus_panel_search(&mut self) -> Result<(), HostError> {
        if self.panel.is_none() {
            return Err(HostError::Unsupported("panel is not open"));
        }
        self.journal.push(HostOp::FocusPanelSearch);
        Ok(())
    }

    fn observe_mutations(&mut self, filter: &MutationFilter) -> Result<(), HostError> {
        if let Some(scope) = filter.scope {
            self.connected_node(scope)?;
        }
        self.mutation_filter = Some(filter.clone());
        self.journal.push(HostOp::ObserveMutations(filter.clone()));
        Ok(())
    }

    fn disconnect_mutations(&mut self) -> Result<(), HostError> {
        self.mutation_filter = None;
        self.journal.push(HostOp::DisconnectMutations);
        Ok(())
    }

    fn observe_intersection(&mut self, el: ElementId) -> Result<(), HostError> {
        self.connected_node(el)?;
        self.intersection_target = Some(el);
        self.journal.push(HostOp::ObserveIntersection(el));
        Ok(())
    }

    fn disconnect_intersection(&mut self) -> Result<(), HostError> {
        self.intersection_target = None;
        self.journal.push(HostOp::DisconnectIntersection);
        Ok(())
    }

    fn request_animation_frame(&mut self) -> Result<(), HostError> {
        self.journal.push(HostOp::RequestAnimationFrame);
        Ok(())
    }

    fn install_history_hooks(&mut self) -> Result<(), HostError> {
        self.history_hooks = true;
        self.journal.push(HostOp::InstallHistoryHooks);
        Ok(())
    }

    fn remove_history_hooks(&mut self) -> Result<(), HostError> {
        self.history_hooks = false;
        self.journal.push(HostOp::RemoveHistoryHooks);
        Ok(())
    }

    fn set_page_listeners(&mut self, enabled: bool) -> Result<(), HostError> {
        self.page_listeners = enabled;
        self.journal.push(HostOp::PageListeners(enabled));
        Ok(())
    }
}
