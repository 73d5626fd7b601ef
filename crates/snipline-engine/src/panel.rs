#![forbid(unsafe_code)]

//! Selection panel state: query, filtered list, selection, status.
//!
//! # Lifecycle
//!
//! closed → open (empty query) → filtering → closed, either by picking an
//! item, an explicit close, an outside interaction, or the page going hidden.
//!
//! # Selection
//!
//! The selected index is `-1` when nothing is selected and otherwise lies in
//! `[0, len)`. Opening or re-filtering selects the first result when there is
//! one. Down from the last item wraps to the first; Up from the first item or
//! from "nothing" goes to the last.
//!
//! The panel never touches the page itself; [`PanelState::view`] produces the
//! render model the session hands to the host.

use snipline_core::config::PanelConfig;
use snipline_core::geometry::Rect;
use snipline_core::host::{PanelItemView, PanelView, SessionId};
use snipline_core::key::{Key, KeyInput};
use snipline_core::snippet::Snippet;
use tracing::trace;

/// What the session should do after a key reached the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelAction {
    /// Nothing to do.
    None,
    /// The selection moved; re-render.
    Moved,
    /// Insert this snippet and close.
    Insert(Snippet),
    Close,
    /// Let the key reach the page (focus traversal).
    PassThrough,
    /// Move focus to the search field so the key lands there.
    FocusSearch,
}

/// Panel model. At most one per session.
#[derive(Debug, Clone, Default)]
pub struct PanelState {
    open: bool,
    snippets: Vec<Snippet>,
    query: String,
    filtered: Vec<usize>,
    selected: Option<usize>,
    anchor: Rect,
    status: Option<String>,
    busy: bool,
}

impl PanelState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Open with an empty query over `snippets`, anchored at `anchor`.
    pub fn open(&mut self, snippets: Vec<Snippet>, anchor: Rect) {
        self.open = true;
        self.snippets = snippets;
        self.anchor = anchor;
        self.query.clear();
        self.status = None;
        self.busy = false;
        self.refilter();
        trace!(items = self.filtered.len(), "panel opened");
    }

    /// Replace the library (store answered while open).
    pub fn set_snippets(&mut self, snippets: Vec<Snippet>) {
        self.snippets = snippets;
        self.refilter();
    }

    #[must_use]
    pub fn snippets(&self) -> &[Snippet] {
        &self.snippets
    }

    pub fn set_query(&mut self, query: &str) {
        self.query = query.to_string();
        self.refilter();
    }

    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    fn refilter(&mut self) {
        let needle = self.query.trim().to_lowercase();
        self.filtered = self
            .snippets
            .iter()
            .enumerate()
            .filter(|(_, s)| s.matches_lowercase(&needle))
            .map(|(i, _)| i)
            .collect();
        self.selected = (!self.filtered.is_empty()).then_some(0);
    }

    /// Snippets matching the current query, in library order.
    pub fn results(&self) -> impl Iterator<Item = &Snippet> {
        self.filtered.iter().filter_map(|i| self.snippets.get(*i))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.filtered.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filtered.is_empty()
    }

    /// Position within the filtered list, or `-1`.
    #[must_use]
    pub fn selected_index(&self) -> isize {
        self.selected
            .and_then(|i| isize::try_from(i).ok())
            .unwrap_or(-1)
    }

    #[must_use]
    pub fn selected_snippet(&self) -> Option<&Snippet> {
        let pos = self.selected?;
        self.snippets.get(*self.filtered.get(pos)?)
    }

    pub fn select_next(&mut self) {
        let len = self.filtered.len();
        if len == 0 {
            self.selected = None;
            return;
        }
        self.selected = Some(match self.selected {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        });
    }

    pub fn select_previous(&mut self) {
        let len = self.filtered.len();
        if len == 0 {
            self.selected = None;
            return;
        }
        self.selected = Some(match self.selected {
            Some(i) if i > 0 => i - 1,
            _ => len - 1,
        });
    }

    /// Keyboard handling while the panel is open.
    pub fn handle_key(&mut self, input: &KeyInput) -> PanelAction {
        if !self.open {
            return PanelAction::PassThrough;
        }
        match &input.key {
            Key::Down => {
                self.select_next();
                PanelAction::Moved
            }
            Key::Up => {
                self.select_previous();
                PanelAction::Moved
            }
            Key::Enter => self
                .selected_snippet()
                .cloned()
                .map_or(PanelAction::None, PanelAction::Insert),
            Key::Escape => PanelAction::Close,
            Key::Tab => PanelAction::PassThrough,
            Key::Backspace => PanelAction::FocusSearch,
            Key::Char(_) if input.is_printable() => PanelAction::FocusSearch,
            _ => PanelAction::None,
        }
    }

    /// Pointer activation of the item with `id`.
    pub fn pick(&mut self, id: &str) -> Option<Snippet> {
        let pos = self
            .filtered
            .iter()
            .position(|i| self.snippets.get(*i).is_some_and(|s| s.id == id))?;
        self.selected = Some(pos);
        self.selected_snippet().cloned()
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = Some(status.into());
    }

    pub fn clear_status(&mut self) {
        self.status = None;
    }

    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Close and forget the query. The library is kept for the next open.
    pub fn close(&mut self) {
        self.open = false;
        self.query.clear();
        self.filtered.clear();
        self.selected = None;
        self.status = None;
        self.busy = false;
    }

    /// Render model for the host.
    #[must_use]
    pub fn view(&self, session: &SessionId, config: &PanelConfig) -> PanelView {
        let items = self
            .filtered
            .iter()
            .enumerate()
            .filter_map(|(pos, i)| {
                let s = self.snippets.get(*i)?;
                Some(PanelItemView {
                    id: s.id.clone(),
                    title: s.title.clone(),
                    category: s.category.clone(),
                    preview: preview(&s.content, config.preview_chars),
                    selected: self.selected == Some(pos),
                })
            })
            .collect();
        PanelView {
            session: session.clone(),
            anchor: self.anchor,
            max_height: config.max_height,
            query: self.query.clone(),
            items,
            status: self.status.clone(),
            busy: self.busy,
        }
    }
}

/// Single-line preview of at most `max` characters.
#[must_use]
pub fn preview(content: &str, max: usize) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let mut out: String = flat.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
