#![forbid(unsafe_code)]

//! Browser binding: [`WebHost`] implements [`Host`] over `web-sys`, and
//! [`SniplineRuntime`] exports a session to the page glue.
//!
//! # Element ids
//!
//! Elements handed to the engine are registered once and tagged with an
//! expando property holding their numeric id, so the mutation observer can map
//! DOM nodes back to ids without a linear search. Ids are never reused.
//!
//! # Callbacks
//!
//! Observer and listener callbacks never touch the session. They only append
//! [`SessionEvent`]s to a shared inbox which [`SniplineRuntime::tick`] drains,
//! so no callback can re-enter the engine while it holds the host mutably.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use js_sys::{Array, Function, Object, Reflect};
use snipline_core::clock::DeterministicClock;
use snipline_core::config::EngineConfig;
use snipline_core::error::HostError;
use snipline_core::geometry::{Point, Rect};
use snipline_core::host::{
    AddedNode, ControlSpec, EditorTraits, ElementId, ElementProbe, FloatingPosition, Host,
    MutationFilter, MutationRecord, PanelView, SESSION_ATTRIBUTE, SessionId, StyleSnapshot,
    SyntheticEvent, TaggedControl,
};
use snipline_core::key::Modifiers;
use snipline_core::site::Placement;
use snipline_engine::{EngineSession, SessionEvent};
use tracing::{debug, trace};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{
    AddEventListenerOptions, Document, Element, Event, EventInit, EventTarget, HtmlDocument,
    HtmlElement, HtmlInputElement, HtmlTextAreaElement, InputEvent, InputEventInit,
    IntersectionObserver, IntersectionObserverEntry, KeyboardEvent, KeyboardEventInit,
    MutationObserver, MutationObserverInit, Node, NodeList, VisibilityState, Window,
};

use crate::protocol;

/// Expando property carrying the registry id on page elements.
const ID_PROPERTY: &str = "__sniplineId";
/// Attribute marking the selection panel root.
const PANEL_ATTRIBUTE: &str = "data-snipline-panel";
/// Attribute carrying a snippet id on a panel row.
const ITEM_ATTRIBUTE: &str = "data-snippet-id";
/// Registry size above which detached page elements are forgotten.
const REGISTRY_PRUNE_THRESHOLD: usize = 4096;
const PANEL_GAP: f64 = 4.0;

type Inbox = Rc<RefCell<Vec<SessionEvent>>>;

fn script_error(err: JsValue) -> HostError {
    HostError::Script(err.as_string().unwrap_or_else(|| format!("{err:?}")))
}

fn js_f64(value: Result<JsValue, JsValue>) -> f64 {
    value.ok().and_then(|v| v.as_f64()).unwrap_or(0.0)
}

// ============================================================================
// Element registry
// ============================================================================

#[derive(Debug, Default)]
struct Registry {
    next: u64,
    elements: HashMap<u64, Element>,
    /// Controls we created; kept while detached.
    owned: HashSet<u64>,
}

impl Registry {
    fn id_of(&mut self, el: &Element) -> ElementId {
        let known = Reflect::get(el, &JsValue::from_str(ID_PROPERTY))
            .ok()
            .and_then(|v| v.as_f64())
            .map(|raw| raw as u64)
            .filter(|raw| self.elements.contains_key(raw));
        if let Some(raw) = known {
            return ElementId::new(raw);
        }
        if self.elements.len() > REGISTRY_PRUNE_THRESHOLD {
            self.prune();
        }
        self.next += 1;
        let raw = self.next;
        if let Err(err) = Reflect::set(
            el,
            &JsValue::from_str(ID_PROPERTY),
            &JsValue::from_f64(raw as f64),
        ) {
            trace!(error = ?err, "element id tag not stored");
        }
        self.elements.insert(raw, el.clone());
        ElementId::new(raw)
    }

    fn get(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id.get())
    }

    fn prune(&mut self) {
        let owned = &self.owned;
        self.elements
            .retain(|raw, el| owned.contains(raw) || el.is_connected());
    }

    fn forget(&mut self, id: ElementId) {
        self.elements.remove(&id.get());
        self.owned.remove(&id.get());
    }
}

fn node_list_ids(registry: &mut Registry, list: &NodeList) -> Vec<ElementId> {
    (0..list.length())
        .filter_map(|i| list.item(i))
        .filter_map(|node| node.dyn_into::<Element>().ok())
        .map(|el| registry.id_of(&el))
        .collect()
}

// ============================================================================
// Listeners
// ============================================================================

struct Listener {
    target: EventTarget,
    kind: &'static str,
    capture: bool,
    callback: Closure<dyn FnMut(Event)>,
}

impl Listener {
    fn attach(
        target: EventTarget,
        kind: &'static str,
        capture: bool,
        callback: Closure<dyn FnMut(Event)>,
    ) -> Result<Self, HostError> {
        let options = AddEventListenerOptions::new();
        options.set_capture(capture);
        options.set_passive(matches!(kind, "scroll" | "resize"));
        target
            .add_event_listener_with_callback_and_add_event_listener_options(
                kind,
                callback.as_ref().unchecked_ref(),
                &options,
            )
            .map_err(script_error)?;
        Ok(Self {
            target,
            kind,
            capture,
            callback,
        })
    }

    fn detach(self) {
        if let Err(err) = self.target.remove_event_listener_with_callback_and_bool(
            self.kind,
            self.callback.as_ref().unchecked_ref(),
            self.capture,
        ) {
            trace!(kind = self.kind, error = ?err, "listener not removed");
        }
    }
}

/// Listener callback that turns a DOM event into an inbox entry.
fn pushing(
    inbox: &Inbox,
    make: impl Fn(&Event) -> Option<SessionEvent> + 'static,
) -> Closure<dyn FnMut(Event)> {
    let inbox = inbox.clone();
    Closure::new(move |event: Event| {
        if let Some(ev) = make(&event) {
            inbox.borrow_mut().push(ev);
        }
    })
}

// ============================================================================
// Panel DOM
// ============================================================================

struct PanelDom {
    root: HtmlElement,
    search: HtmlInputElement,
    list: HtmlElement,
    status: HtmlElement,
    listeners: Vec<Listener>,
}

impl PanelDom {
    fn build(document: &Document, session: &SessionId, inbox: &Inbox) -> Result<Self, HostError> {
        let create = |tag: &str| -> Result<HtmlElement, HostError> {
            document
                .create_element(tag)
                .map_err(script_error)?
                .dyn_into::<HtmlElement>()
                .map_err(|_| HostError::Unsupported("panel element"))
        };
        let root = create("div")?;
        root.set_attribute(PANEL_ATTRIBUTE, session.as_str())
            .map_err(script_error)?;
        root.set_attribute("role", "dialog").map_err(script_error)?;
        root.set_class_name("snipline-panel");
        let style = root.style();
        for (name, value) in [
            ("position", "fixed"),
            ("z-index", "2147483001"),
            ("overflow-y", "auto"),
        ] {
            style.set_property(name, value).map_err(script_error)?;
        }

        let search = create("input")?
            .dyn_into::<HtmlInputElement>()
            .map_err(|_| HostError::Unsupported("panel search field"))?;
        search.set_type("search");
        search.set_placeholder("Search snippets");
        let list = create("div")?;
        list.set_attribute("role", "listbox").map_err(script_error)?;
        let status = create("div")?;
        status.set_class_name("snipline-status");

        root.append_with_node_1(&search).map_err(script_error)?;
        root.append_with_node_1(&status).map_err(script_error)?;
        root.append_with_node_1(&list).map_err(script_error)?;
        document
            .body()
            .ok_or(HostError::Unsupported("document body"))?
            .append_with_node_1(&root)
            .map_err(script_error)?;

        let search_target = search.clone();
        let on_input = pushing(inbox, move |_| {
            Some(SessionEvent::PanelQuery(search_target.value()))
        });
        let on_key = pushing(inbox, |event| {
            let key = event.dyn_ref::<KeyboardEvent>()?;
            let mut mods = Modifiers::empty();
            mods.set(Modifiers::SHIFT, key.shift_key());
            mods.set(Modifiers::ALT, key.alt_key());
            mods.set(Modifiers::CTRL, key.ctrl_key());
            mods.set(Modifiers::SUPER, key.meta_key());
            let input = protocol::key_input(&key.key(), mods.bits()).ok()?;
            if matches!(key.key().as_str(), "ArrowUp" | "ArrowDown" | "Enter" | "Escape") {
                event.prevent_default();
            }
            Some(SessionEvent::PanelKey(input))
        });
        let on_pick = pushing(inbox, |event| {
            let target = event.target()?.dyn_into::<Element>().ok()?;
            let row = target.closest(&format!("[{ITEM_ATTRIBUTE}]")).ok()??;
            Some(SessionEvent::PanelPick {
                id: row.get_attribute(ITEM_ATTRIBUTE)?,
            })
        });

        let listeners = vec![
            Listener::attach(search.clone().into(), "input", false, on_input)?,
            Listener::attach(search.clone().into(), "keydown", false, on_key)?,
            Listener::attach(list.clone().into(), "click", false, on_pick)?,
        ];
        Ok(Self {
            root,
            search,
            list,
            status,
            listeners,
        })
    }

    fn render(&self, document: &Document, view: &PanelView, viewport: Rect) -> Result<(), HostError> {
        let below = view.anchor.bottom() + PANEL_GAP;
        let top = if below + view.max_height > viewport.height {
            (view.anchor.y - view.max_height - PANEL_GAP).max(0.0)
        } else {
            below
        };
        let left = view.anchor.x.clamp(0.0, viewport.width.max(0.0));
        let style = self.root.style();
        style
            .set_property("top", &format!("{top}px"))
            .map_err(script_error)?;
        style
            .set_property("left", &format!("{left}px"))
            .map_err(script_error)?;
        style
            .set_property("max-height", &format!("{}px", view.max_height))
            .map_err(script_error)?;

        if self.search.value() != view.query {
            self.search.set_value(&view.query);
        }
        self.root
            .set_attribute("aria-busy", if view.busy { "true" } else { "false" })
            .map_err(script_error)?;
        self.status.set_text_content(view.status.as_deref());
        self.status.set_hidden(view.status.is_none());

        self.list.set_text_content(None);
        for item in &view.items {
            let row = document.create_element("div").map_err(script_error)?;
            row.set_attribute(ITEM_ATTRIBUTE, &item.id)
                .map_err(script_error)?;
            row.set_attribute("role", "option").map_err(script_error)?;
            row.set_attribute("aria-selected", if item.selected { "true" } else { "false" })
                .map_err(script_error)?;
            row.set_class_name(if item.selected {
                "snipline-item selected"
            } else {
                "snipline-item"
            });
            for (class, text) in [
                ("snipline-title", item.title.as_str()),
                ("snipline-category", item.category.as_str()),
                ("snipline-preview", item.preview.as_str()),
            ] {
                let cell = document.create_element("div").map_err(script_error)?;
                cell.set_class_name(class);
                cell.set_text_content(Some(text));
                row.append_with_node_1(&cell).map_err(script_error)?;
            }
            self.list.append_with_node_1(&row).map_err(script_error)?;
        }
        Ok(())
    }

    fn destroy(self) {
        for listener in self.listeners {
            listener.detach();
        }
        self.root.remove();
    }
}

// ============================================================================
// WebHost
// ============================================================================

/// [`Host`] bound to the current browser document.
pub struct WebHost {
    window: Window,
    document: Document,
    registry: Rc<RefCell<Registry>>,
    inbox: Inbox,
    mutation_observer: Option<(MutationObserver, Closure<dyn FnMut(Array, MutationObserver)>)>,
    intersection_observer:
        Option<(IntersectionObserver, Closure<dyn FnMut(Array, IntersectionObserver)>)>,
    frame_callback: Closure<dyn FnMut(f64)>,
    history_hooks: Option<HistoryHooks>,
    page_listeners: Vec<Listener>,
    control_listeners: HashMap<u64, Listener>,
    panel: Option<PanelDom>,
}

struct HistoryHooks {
    push_state: JsValue,
    replace_state: JsValue,
    wrappers: Vec<Closure<dyn FnMut(JsValue, JsValue, JsValue) -> JsValue>>,
    popstate: Listener,
}

impl core::fmt::Debug for WebHost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WebHost")
            .field("registered", &self.registry.borrow().elements.len())
            .field("pending_events", &self.inbox.borrow().len())
            .field("panel_open", &self.panel.is_some())
            .finish()
    }
}

impl WebHost {
    /// Bind to the global window.
    pub fn new() -> Result<Self, JsValue> {
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
        let document = window
            .document()
            .ok_or_else(|| JsValue::from_str("no document"))?;
        let inbox: Inbox = Rc::default();
        let frame_inbox = inbox.clone();
        let frame_callback = Closure::new(move |_ts: f64| {
            frame_inbox.borrow_mut().push(SessionEvent::AnimationFrame);
        });
        Ok(Self {
            window,
            document,
            registry: Rc::default(),
            inbox,
            mutation_observer: None,
            intersection_observer: None,
            frame_callback,
            history_hooks: None,
            page_listeners: Vec::new(),
            control_listeners: HashMap::new(),
            panel: None,
        })
    }

    fn inbox(&self) -> Inbox {
        self.inbox.clone()
    }

    fn element(&self, id: ElementId) -> Result<Element, HostError> {
        self.registry
            .borrow()
            .get(id)
            .cloned()
            .ok_or(HostError::Detached(id))
    }

    fn html(&self, id: ElementId) -> Result<HtmlElement, HostError> {
        self.element(id)?
            .dyn_into::<HtmlElement>()
            .map_err(|_| HostError::Unsupported("non-HTML element"))
    }

    fn register(&self, el: &Element) -> ElementId {
        self.registry.borrow_mut().id_of(el)
    }

    fn field_value(el: &Element) -> Option<String> {
        if let Some(input) = el.dyn_ref::<HtmlInputElement>() {
            return Some(input.value());
        }
        el.dyn_ref::<HtmlTextAreaElement>().map(HtmlTextAreaElement::value)
    }

    fn traits_of(el: &Element, tag: &str) -> EditorTraits {
        let mut traits = EditorTraits::empty();
        let text_input = el
            .dyn_ref::<HtmlInputElement>()
            .is_some_and(|i| matches!(i.type_().as_str(), "" | "text" | "search" | "email" | "url"));
        if tag == "textarea" || text_input {
            traits |= EditorTraits::TEXT_FIELD;
            if Reflect::has(el, &JsValue::from_str("_valueTracker")).unwrap_or(false) {
                traits |= EditorTraits::FRAMEWORK_CONTROLLED;
            }
        }
        if el
            .dyn_ref::<HtmlElement>()
            .is_some_and(HtmlElement::is_content_editable)
        {
            traits |= EditorTraits::CONTENT_EDITABLE;
            if rich_editor_api(el).is_some() {
                traits |= EditorTraits::RICH_TRANSACTIONAL;
            }
        }
        if el.get_attribute("role").as_deref() == Some("textbox") {
            traits |= EditorTraits::TEXTBOX_ROLE;
        }
        traits
    }

    fn mutation_callback(&self) -> Closure<dyn FnMut(Array, MutationObserver)> {
        let inbox = self.inbox();
        let registry = self.registry.clone();
        Closure::new(move |records: Array, _observer: MutationObserver| {
            let mut registry = registry.borrow_mut();
            let batch: Vec<MutationRecord> = records
                .iter()
                .filter_map(|r| r.dyn_into::<web_sys::MutationRecord>().ok())
                .filter_map(|r| convert_record(&mut registry, &r))
                .collect();
            if !batch.is_empty() {
                inbox.borrow_mut().push(SessionEvent::Mutations(batch));
            }
        })
    }
}

fn convert_record(
    registry: &mut Registry,
    record: &web_sys::MutationRecord,
) -> Option<MutationRecord> {
    let target = record.target()?.dyn_into::<Element>().ok()?;
    let target = registry.id_of(&target);
    if record.type_() == "attributes" {
        return Some(MutationRecord::Attributes {
            target,
            name: record.attribute_name()?,
        });
    }
    let added_nodes = record.added_nodes();
    let added = (0..added_nodes.length())
        .filter_map(|i| added_nodes.item(i))
        .map(|node| match node.dyn_into::<Element>() {
            Ok(el) => AddedNode {
                element: Some(registry.id_of(&el)),
                tag: el.tag_name().to_ascii_lowercase(),
                editable_hint: el.has_attribute("contenteditable")
                    || el.get_attribute("role").as_deref() == Some("textbox"),
                child_elements: el.child_element_count() as usize,
            },
            Err(_) => AddedNode {
                element: None,
                tag: String::new(),
                editable_hint: false,
                child_elements: 0,
            },
        })
        .collect();
    Some(MutationRecord::ChildList {
        target,
        added,
        removed: record.removed_nodes().length() as usize,
    })
}

/// The editor object behind a rich editing surface, if one is reachable.
///
/// Recognizes editors that expose themselves on their root element: an
/// `editor.commands.insertContent` API, or a Quill instance.
fn rich_editor_api(el: &Element) -> Option<(JsValue, &'static str)> {
    let editor = Reflect::get(el, &JsValue::from_str("editor")).ok()?;
    if !editor.is_undefined() && !editor.is_null() {
        let commands = Reflect::get(&editor, &JsValue::from_str("commands")).ok()?;
        if Reflect::get(&commands, &JsValue::from_str("insertContent"))
            .ok()
            .is_some_and(|f| f.is_function())
        {
            return Some((commands, "insertContent"));
        }
    }
    let quill = Reflect::get(el.parent_element()?.as_ref(), &JsValue::from_str("__quill")).ok()?;
    (!quill.is_undefined() && !quill.is_null()).then_some((quill, "quill"))
}

impl Host for WebHost {
    fn location(&self) -> String {
        self.window.location().href().unwrap_or_default()
    }

    fn hostname(&self) -> String {
        self.window.location().hostname().unwrap_or_default()
    }

    fn viewport(&self) -> Rect {
        Rect::from_size(
            js_f64(self.window.inner_width()),
            js_f64(self.window.inner_height()),
        )
    }

    fn is_document_visible(&self) -> bool {
        self.document.visibility_state() == VisibilityState::Visible
    }

    fn query_all(&self, selector: &str) -> Result<Vec<ElementId>, HostError> {
        let list = self
            .document
            .query_selector_all(selector)
            .map_err(|_| HostError::InvalidSelector(selector.to_string()))?;
        Ok(node_list_ids(&mut self.registry.borrow_mut(), &list))
    }

    fn query_within(&self, root: ElementId, selector: &str) -> Result<Vec<ElementId>, HostError> {
        let list = self
            .element(root)?
            .query_selector_all(selector)
            .map_err(|_| HostError::InvalidSelector(selector.to_string()))?;
        Ok(node_list_ids(&mut self.registry.borrow_mut(), &list))
    }

    fn matches(&self, el: ElementId, selector: &str) -> Result<bool, HostError> {
        self.element(el)?
            .matches(selector)
            .map_err(|_| HostError::InvalidSelector(selector.to_string()))
    }

    fn probe(&self, id: ElementId) -> Option<ElementProbe> {
        let el = self.registry.borrow().get(id).cloned()?;
        let tag = el.tag_name().to_ascii_lowercase();
        let rect = el.get_bounding_client_rect();
        Some(ElementProbe {
            connected: el.is_connected(),
            rect: Rect::new(rect.left(), rect.top(), rect.width(), rect.height()),
            disabled: el.has_attribute("disabled")
                || el.get_attribute("aria-disabled").as_deref() == Some("true"),
            read_only: el.has_attribute("readonly"),
            traits: Self::traits_of(&el, &tag),
            tag,
        })
    }

    fn computed_style(&self, id: ElementId) -> Option<StyleSnapshot> {
        let el = self.element(id).ok()?;
        let style = self.window.get_computed_style(&el).ok()??;
        let read = |name: &str| style.get_property_value(name).unwrap_or_default();
        Some(StyleSnapshot {
            display_none: read("display") == "none",
            visibility_hidden: matches!(read("visibility").as_str(), "hidden" | "collapse"),
            opacity: read("opacity").parse().unwrap_or(1.0),
        })
    }

    fn element_at_point(&self, point: Point) -> Option<ElementId> {
        let el = self
            .document
            .element_from_point(point.x as f32, point.y as f32)?;
        Some(self.register(&el))
    }

    fn contains(&self, ancestor: ElementId, el: ElementId) -> bool {
        let registry = self.registry.borrow();
        match (registry.get(ancestor), registry.get(el)) {
            (Some(a), Some(e)) => a.contains(Some(e.as_ref())),
            _ => false,
        }
    }

    fn focus(&mut self, el: ElementId) -> Result<(), HostError> {
        self.html(el)?.focus().map_err(script_error)
    }

    fn read_text(&self, id: ElementId) -> Result<String, HostError> {
        let el = self.element(id)?;
        Ok(Self::field_value(&el)
            .or_else(|| el.dyn_ref::<HtmlElement>().map(HtmlElement::inner_text))
            .unwrap_or_else(|| el.text_content().unwrap_or_default()))
    }

    fn select_all(&mut self, id: ElementId) -> Result<(), HostError> {
        let el = self.element(id)?;
        if let Some(input) = el.dyn_ref::<HtmlInputElement>() {
            input.select();
            return Ok(());
        }
        if let Some(area) = el.dyn_ref::<HtmlTextAreaElement>() {
            area.select();
            return Ok(());
        }
        let selection = self
            .window
            .get_selection()
            .map_err(script_error)?
            .ok_or(HostError::Unsupported("selection"))?;
        selection.select_all_children(&el).map_err(script_error)
    }

    fn move_caret_to_end(&mut self, id: ElementId) -> Result<(), HostError> {
        let el = self.element(id)?;
        if let Some(value) = Self::field_value(&el) {
            let end = value.encode_utf16().count() as u32;
            if let Some(input) = el.dyn_ref::<HtmlInputElement>() {
                return input.set_selection_range(end, end).map_err(script_error);
            }
            if let Some(area) = el.dyn_ref::<HtmlTextAreaElement>() {
                return area.set_selection_range(end, end).map_err(script_error);
            }
        }
        let range = self.document.create_range().map_err(script_error)?;
        range.select_node_contents(&el).map_err(script_error)?;
        range.collapse_with_to_start(false);
        let selection = self
            .window
            .get_selection()
            .map_err(script_error)?
            .ok_or(HostError::Unsupported("selection"))?;
        selection.remove_all_ranges().map_err(script_error)?;
        selection.add_range(&range).map_err(script_error)
    }

    fn rich_insert(&mut self, id: ElementId, text: &str) -> Result<bool, HostError> {
        let el = self.element(id)?;
        let Some((api, kind)) = rich_editor_api(&el) else {
            return Ok(false);
        };
        let call = |target: &JsValue, name: &str, args: &Array| -> Result<JsValue, HostError> {
            let f = Reflect::get(target, &JsValue::from_str(name))
                .map_err(script_error)?
                .dyn_into::<Function>()
                .map_err(|_| HostError::Unsupported("rich editor method"))?;
            Reflect::apply(&f, target, args).map_err(script_error)
        };
        match kind {
            "insertContent" => {
                let done = call(&api, "insertContent", &Array::of1(&JsValue::from_str(text)))?;
                Ok(done.as_bool().unwrap_or(true))
            }
            _ => {
                let length = call(&api, "getLength", &Array::new())?.as_f64().unwrap_or(1.0);
                let at = JsValue::from_f64((length - 1.0).max(0.0));
                call(&api, "insertText", &Array::of3(&at, &JsValue::from_str(text), &JsValue::from_str("user")))?;
                Ok(true)
            }
        }
    }

    fn exec_insert_text(&mut self, _el: ElementId, text: &str) -> Result<bool, HostError> {
        let document = self
            .document
            .dyn_ref::<HtmlDocument>()
            .ok_or(HostError::Unsupported("execCommand"))?;
        document
            .exec_command_with_show_ui_and_value("insertText", false, text)
            .map_err(script_error)
    }

    fn set_value_native(&mut self, id: ElementId, value: &str) -> Result<(), HostError> {
        let el = self.element(id)?;
        let class = if el.dyn_ref::<HtmlTextAreaElement>().is_some() {
            "HTMLTextAreaElement"
        } else if el.dyn_ref::<HtmlInputElement>().is_some() {
            "HTMLInputElement"
        } else {
            return Err(HostError::Unsupported("native value setter"));
        };
        let ctor = Reflect::get(&self.window, &JsValue::from_str(class)).map_err(script_error)?;
        let proto = Reflect::get(&ctor, &JsValue::from_str("prototype"))
            .map_err(script_error)?
            .dyn_into::<Object>()
            .map_err(|_| HostError::Unsupported("element prototype"))?;
        let descriptor = Object::get_own_property_descriptor(&proto, &JsValue::from_str("value"));
        let setter = Reflect::get(&descriptor, &JsValue::from_str("set"))
            .map_err(script_error)?
            .dyn_into::<Function>()
            .map_err(|_| HostError::Unsupported("native value setter"))?;
        setter
            .call1(&el, &JsValue::from_str(value))
            .map(|_| ())
            .map_err(script_error)
    }

    fn assign_content(&mut self, id: ElementId, text: &str) -> Result<(), HostError> {
        let el = self.element(id)?;
        if let Some(input) = el.dyn_ref::<HtmlInputElement>() {
            input.set_value(text);
        } else if let Some(area) = el.dyn_ref::<HtmlTextAreaElement>() {
            area.set_value(text);
        } else {
            el.set_text_content(Some(text));
        }
        Ok(())
    }

    fn dispatch_event(&mut self, id: ElementId, event: &SyntheticEvent) -> Result<(), HostError> {
        let el = self.element(id)?;
        let kind = event.event_type();
        let dom_event: Event = match event {
            SyntheticEvent::KeyDown { key }
            | SyntheticEvent::KeyPress { key }
            | SyntheticEvent::KeyUp { key } => {
                let init = KeyboardEventInit::new();
                init.set_key(key);
                init.set_bubbles(true);
                init.set_cancelable(true);
                KeyboardEvent::new_with_keyboard_event_init_dict(kind, &init)
                    .map_err(script_error)?
                    .into()
            }
            SyntheticEvent::BeforeInput { data } => {
                let init = InputEventInit::new();
                init.set_data(Some(data));
                init.set_input_type("insertText");
                init.set_bubbles(true);
                init.set_cancelable(true);
                InputEvent::new_with_event_init_dict(kind, &init)
                    .map_err(script_error)?
                    .into()
            }
            SyntheticEvent::Input { data, input_type } => {
                let init = InputEventInit::new();
                init.set_data(Some(data));
                init.set_input_type(input_type);
                init.set_bubbles(true);
                InputEvent::new_with_event_init_dict(kind, &init)
                    .map_err(script_error)?
                    .into()
            }
            SyntheticEvent::Focus | SyntheticEvent::Change | SyntheticEvent::Blur => {
                let init = EventInit::new();
                init.set_bubbles(!matches!(event, SyntheticEvent::Focus | SyntheticEvent::Blur));
                Event::new_with_event_init_dict(kind, &init).map_err(script_error)?
            }
        };
        el.dispatch_event(&dom_event).map(|_| ()).map_err(script_error)
    }

    fn create_control(&mut self, spec: &ControlSpec) -> Result<ElementId, HostError> {
        let el = self
            .document
            .create_element("button")
            .map_err(script_error)?;
        el.set_attribute("type", "button").map_err(script_error)?;
        el.set_attribute(SESSION_ATTRIBUTE, spec.session.as_str())
            .map_err(script_error)?;
        el.set_attribute("aria-label", &spec.label)
            .map_err(script_error)?;
        el.set_attribute("title", &spec.label).map_err(script_error)?;
        el.set_class_name(&spec.class_name);
        let html = el
            .clone()
            .dyn_into::<HtmlElement>()
            .map_err(|_| HostError::Unsupported("control element"))?;
        let style = html.style();
        if let Some(z) = spec.z_index {
            style
                .set_property("z-index", &z.to_string())
                .map_err(script_error)?;
        }
        if spec.offset.x != 0.0 || spec.offset.y != 0.0 {
            style
                .set_property(
                    "transform",
                    &format!("translate({}px, {}px)", spec.offset.x, spec.offset.y),
                )
                .map_err(script_error)?;
        }
        if spec.floating {
            style.set_property("position", "fixed").map_err(script_error)?;
        }

        let id = self.register(&el);
        self.registry.borrow_mut().owned.insert(id.get());
        let on_click = pushing(&self.inbox, |event| {
            event.prevent_default();
            event.stop_propagation();
            Some(SessionEvent::TriggerActivated)
        });
        let listener = Listener::attach(el.into(), "click", false, on_click)?;
        self.control_listeners.insert(id.get(), listener);
        debug!(control = id.get(), floating = spec.floating, "control created");
        Ok(id)
    }

    fn insert_control(
        &mut self,
        control: ElementId,
        anchor: ElementId,
        placement: Placement,
    ) -> Result<(), HostError> {
        let control = self.element(control)?;
        let anchor_el = self.element(anchor)?;
        if !anchor_el.is_connected() {
            return Err(HostError::Detached(anchor));
        }
        let node: &Node = control.as_ref();
        match placement {
            Placement::Before => anchor_el.before_with_node_1(node),
            Placement::After => anchor_el.after_with_node_1(node),
            Placement::InsideStart => anchor_el.prepend_with_node_1(node),
            Placement::InsideEnd => anchor_el.append_with_node_1(node),
        }
        .map_err(script_error)
    }

    fn position_floating(
        &mut self,
        control: ElementId,
        position: FloatingPosition,
    ) -> Result<(), HostError> {
        let el = self.html(control)?;
        if !el.is_connected() {
            self.document
                .body()
                .ok_or(HostError::Unsupported("document body"))?
                .append_with_node_1(&el)
                .map_err(script_error)?;
        }
        let style = el.style();
        for (name, value) in [
            ("position", "fixed".to_string()),
            ("left", format!("{}px", position.left)),
            ("top", format!("{}px", position.top)),
            ("z-index", position.z_index.to_string()),
        ] {
            style.set_property(name, &value).map_err(script_error)?;
        }
        Ok(())
    }

    fn remove_element(&mut self, id: ElementId) -> Result<(), HostError> {
        let el = self.element(id)?;
        if let Some(listener) = self.control_listeners.remove(&id.get()) {
            listener.detach();
        }
        self.registry.borrow_mut().forget(id);
        if !el.is_connected() {
            return Err(HostError::Detached(id));
        }
        el.remove();
        Ok(())
    }

    fn tagged_controls(&self) -> Vec<TaggedControl> {
        let Ok(list) = self
            .document
            .query_selector_all(&format!("[{SESSION_ATTRIBUTE}]"))
        else {
            return Vec::new();
        };
        let mut registry = self.registry.borrow_mut();
        (0..list.length())
            .filter_map(|i| list.item(i))
            .filter_map(|node| node.dyn_into::<Element>().ok())
            .map(|el| TaggedControl {
                element: registry.id_of(&el),
                session: el.get_attribute(SESSION_ATTRIBUTE).unwrap_or_default(),
            })
            .collect()
    }

    fn render_panel(&mut self, view: &PanelView) -> Result<(), HostError> {
        if self.panel.is_none() {
            self.panel = Some(PanelDom::build(&self.document, &view.session, &self.inbox)?);
        }
        let viewport = self.viewport();
        match &self.panel {
            Some(panel) => panel.render(&self.document, view, viewport),
            None => Err(HostError::Unsupported("panel")),
        }
    }

    fn close_panel(&mut self) -> Result<(), HostError> {
        if let Some(panel) = self.panel.take() {
            panel.destroy();
        }
        Ok(())
    }

    fn focus_panel_search(&mut self) -> Result<(), HostError> {
        match &self.panel {
            Some(panel) => panel.search.focus().map_err(script_error),
            None => Err(HostError::Unsupported("panel")),
        }
    }

    fn observe_mutations(&mut self, filter: &MutationFilter) -> Result<(), HostError> {
        self.disconnect_mutations()?;
        let callback = self.mutation_callback();
        let observer =
            MutationObserver::new(callback.as_ref().unchecked_ref()).map_err(script_error)?;
        let init = MutationObserverInit::new();
        init.set_child_list(true);
        init.set_subtree(true);
        if !filter.attributes.is_empty() {
            init.set_attributes(true);
            let names = Array::new();
            for name in &filter.attributes {
                names.push(&JsValue::from_str(name));
            }
            init.set_attribute_filter(&names);
        }
        let root: Node = match filter.scope {
            Some(scope) => self.element(scope)?.into(),
            None => self
                .document
                .body()
                .ok_or(HostError::Unsupported("document body"))?
                .into(),
        };
        observer
            .observe_with_options(&root, &init)
            .map_err(script_error)?;
        self.mutation_observer = Some((observer, callback));
        Ok(())
    }

    fn disconnect_mutations(&mut self) -> Result<(), HostError> {
        if let Some((observer, _callback)) = self.mutation_observer.take() {
            observer.disconnect();
        }
        Ok(())
    }

    fn observe_intersection(&mut self, id: ElementId) -> Result<(), HostError> {
        self.disconnect_intersection()?;
        let el = self.element(id)?;
        let inbox = self.inbox();
        let callback = Closure::new(move |entries: Array, _observer: IntersectionObserver| {
            let visible = entries
                .iter()
                .filter_map(|e| e.dyn_into::<IntersectionObserverEntry>().ok())
                .last()
                .map(|e| e.is_intersecting());
            if let Some(visible) = visible {
                inbox.borrow_mut().push(SessionEvent::Intersection { visible });
            }
        });
        let observer =
            IntersectionObserver::new(callback.as_ref().unchecked_ref()).map_err(script_error)?;
        observer.observe(&el);
        self.intersection_observer = Some((observer, callback));
        Ok(())
    }

    fn disconnect_intersection(&mut self) -> Result<(), HostError> {
        if let Some((observer, _callback)) = self.intersection_observer.take() {
            observer.disconnect();
        }
        Ok(())
    }

    fn request_animation_frame(&mut self) -> Result<(), HostError> {
        self.window
            .request_animation_frame(self.frame_callback.as_ref().unchecked_ref())
            .map(|_| ())
            .map_err(script_error)
    }

    fn install_history_hooks(&mut self) -> Result<(), HostError> {
        if self.history_hooks.is_some() {
            return Ok(());
        }
        let history = self.window.history().map_err(script_error)?;
        let mut wrappers = Vec::with_capacity(2);
        let mut originals = Vec::with_capacity(2);
        for name in ["pushState", "replaceState"] {
            let original = Reflect::get(&history, &JsValue::from_str(name))
                .map_err(script_error)?
                .dyn_into::<Function>()
                .map_err(|_| HostError::Unsupported("history API"))?;
            let inbox = self.inbox();
            let target = history.clone();
            let forward = original.clone();
            let wrapper: Closure<dyn FnMut(JsValue, JsValue, JsValue) -> JsValue> =
                Closure::new(move |state: JsValue, unused: JsValue, url: JsValue| {
                    let out = forward
                        .call3(&target, &state, &unused, &url)
                        .unwrap_or(JsValue::UNDEFINED);
                    inbox.borrow_mut().push(SessionEvent::HistoryChanged);
                    out
                });
            Reflect::set(&history, &JsValue::from_str(name), wrapper.as_ref())
                .map_err(script_error)?;
            wrappers.push(wrapper);
            originals.push(JsValue::from(original));
        }
        let popstate = Listener::attach(
            self.window.clone().into(),
            "popstate",
            false,
            pushing(&self.inbox, |_| Some(SessionEvent::HistoryChanged)),
        )?;
        let replace_state = originals.pop().unwrap_or(JsValue::UNDEFINED);
        let push_state = originals.pop().unwrap_or(JsValue::UNDEFINED);
        self.history_hooks = Some(HistoryHooks {
            push_state,
            replace_state,
            wrappers,
            popstate,
        });
        Ok(())
    }

    fn remove_history_hooks(&mut self) -> Result<(), HostError> {
        let Some(hooks) = self.history_hooks.take() else {
            return Ok(());
        };
        hooks.popstate.detach();
        let history = self.window.history().map_err(script_error)?;
        Reflect::set(&history, &JsValue::from_str("pushState"), &hooks.push_state)
            .map_err(script_error)?;
        Reflect::set(
            &history,
            &JsValue::from_str("replaceState"),
            &hooks.replace_state,
        )
        .map_err(script_error)?;
        drop(hooks.wrappers);
        Ok(())
    }

    fn set_page_listeners(&mut self, enabled: bool) -> Result<(), HostError> {
        for listener in self.page_listeners.drain(..) {
            listener.detach();
        }
        if !enabled {
            return Ok(());
        }
        let window: EventTarget = self.window.clone().into();
        let document: EventTarget = self.document.clone().into();
        let visibility_doc = self.document.clone();
        self.page_listeners = vec![
            Listener::attach(
                window.clone(),
                "scroll",
                true,
                pushing(&self.inbox, |_| Some(SessionEvent::Scroll)),
            )?,
            Listener::attach(
                window.clone(),
                "resize",
                false,
                pushing(&self.inbox, |_| Some(SessionEvent::Resize)),
            )?,
            Listener::attach(
                window,
                "pagehide",
                false,
                pushing(&self.inbox, |_| Some(SessionEvent::Unload)),
            )?,
            Listener::attach(
                document.clone(),
                "visibilitychange",
                false,
                pushing(&self.inbox, move |_| {
                    Some(SessionEvent::VisibilityChanged {
                        visible: visibility_doc.visibility_state() == VisibilityState::Visible,
                    })
                }),
            )?,
            Listener::attach(
                document,
                "pointerdown",
                true,
                pushing(&self.inbox, |event| {
                    let target = event.target()?.dyn_into::<Element>().ok()?;
                    let inside = target
                        .closest(&format!("[{SESSION_ATTRIBUTE}], [{PANEL_ATTRIBUTE}]"))
                        .ok()
                        .flatten()
                        .is_some();
                    (!inside).then_some(SessionEvent::OutsideClick)
                }),
            )?,
        ];
        Ok(())
    }
}

// ============================================================================
// Exported runtime
// ============================================================================

/// Site gate for the page glue: built-in platforms need no custom entry.
#[wasm_bindgen(js_name = isBuiltinHost)]
pub fn is_builtin_host(hostname: &str) -> bool {
    snipline_engine::profile::is_builtin_host(hostname)
}

/// One engine session bound to the current page.
#[wasm_bindgen]
pub struct SniplineRuntime {
    session: EngineSession<WebHost>,
    inbox: Inbox,
}

#[wasm_bindgen]
impl SniplineRuntime {
    /// `config_json` is an optional partial [`EngineConfig`] in JSON.
    #[wasm_bindgen(constructor)]
    pub fn new(session_id: &str, config_json: Option<String>) -> Result<SniplineRuntime, JsValue> {
        let config = match config_json.as_deref() {
            Some(json) => EngineConfig::from_json_str(json)
                .map_err(|e| JsValue::from_str(&e.to_string()))?,
            None => EngineConfig::default(),
        };
        let host = WebHost::new()?;
        let inbox = host.inbox();
        Ok(Self {
            session: EngineSession::new(host, SessionId::new(session_id), config),
            inbox,
        })
    }

    /// Controller message in, `{"success":..}` out.
    #[wasm_bindgen(js_name = handleMessage)]
    pub fn handle_message(&mut self, json: &str) -> Result<String, JsValue> {
        let message = protocol::decode_message(json).map_err(|e| JsValue::from_str(&e.to_string()))?;
        let ack = self.session.handle_message(message);
        protocol::encode_ack(ack).map_err(|e| JsValue::from_str(&e.to_string()))
    }

    /// Forward one page callback; `true` when the engine consumed it and the
    /// page should suppress the default action.
    #[wasm_bindgen(js_name = pushEvent)]
    pub fn push_event(&mut self, json: &str) -> Result<bool, JsValue> {
        let event = protocol::decode_event(json).map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(self.session.dispatch(event))
    }

    /// Advance to `now_ms` (a monotonic page clock) and deliver queued
    /// observer and listener callbacks.
    pub fn tick(&mut self, now_ms: f64) {
        if let Some(now) = DeterministicClock::duration_from_millis_f64(now_ms) {
            self.session.advance_to(now);
        }
        let pending: Vec<SessionEvent> = self.inbox.borrow_mut().drain(..).collect();
        for event in pending {
            self.session.dispatch(event);
        }
    }

    /// Next timer deadline in page-clock milliseconds.
    #[wasm_bindgen(js_name = nextDeadlineMs)]
    pub fn next_deadline_ms(&self) -> Option<f64> {
        self.session
            .next_deadline()
            .map(|d| d.as_secs_f64() * 1_000.0)
    }

    /// Drain queued requests as a JSON array.
    #[wasm_bindgen(js_name = takeRequests)]
    pub fn take_requests(&mut self) -> Result<String, JsValue> {
        let requests = self.session.drain_requests();
        protocol::encode_requests(&requests).map_err(|e| JsValue::from_str(&e.to_string()))
    }

    /// Remove everything the session added; `true` when no step failed.
    pub fn teardown(&mut self) -> bool {
        let report = self.session.teardown();
        self.inbox.borrow_mut().clear();
        report.is_clean()
    }
}
