#![forbid(unsafe_code)]

//! The currently acquired editing surface.

use snipline_core::geometry::Rect;
use snipline_core::host::{EditorTraits, ElementId, Host};

/// Which editing machinery a surface uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditorKind {
    /// `<textarea>` / text `<input>` without framework ownership.
    PlainField,
    /// Text field whose value is tracked by a UI framework.
    FrameworkField,
    /// Region with a transactional rich-editor API.
    RichRegion,
    /// `contenteditable` or `role="textbox"` region.
    EditableRegion,
}

impl EditorKind {
    /// Classify from probed traits; `None` if nothing can be typed into.
    #[must_use]
    pub fn classify(traits: EditorTraits) -> Option<Self> {
        if traits.contains(EditorTraits::RICH_TRANSACTIONAL) {
            Some(Self::RichRegion)
        } else if traits.contains(EditorTraits::TEXT_FIELD) {
            if traits.contains(EditorTraits::FRAMEWORK_CONTROLLED) {
                Some(Self::FrameworkField)
            } else {
                Some(Self::PlainField)
            }
        } else if traits.intersects(EditorTraits::CONTENT_EDITABLE | EditorTraits::TEXTBOX_ROLE) {
            Some(Self::EditableRegion)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlainField => "plain-field",
            Self::FrameworkField => "framework-field",
            Self::RichRegion => "rich-region",
            Self::EditableRegion => "editable-region",
        }
    }
}

/// Live reference to one acquired editing surface.
///
/// Handles are replaced on re-acquisition, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorHandle {
    element: ElementId,
    kind: EditorKind,
    epoch: u64,
    rect: Rect,
    pattern_index: usize,
}

impl EditorHandle {
    #[must_use]
    pub const fn new(
        element: ElementId,
        kind: EditorKind,
        epoch: u64,
        rect: Rect,
        pattern_index: usize,
    ) -> Self {
        Self {
            element,
            kind,
            epoch,
            rect,
            pattern_index,
        }
    }

    #[must_use]
    pub const fn element(&self) -> ElementId {
        self.element
    }

    #[must_use]
    pub const fn kind(&self) -> EditorKind {
        self.kind
    }

    /// Navigation epoch the handle was acquired in.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Rectangle at acquisition time.
    #[must_use]
    pub const fn rect(&self) -> Rect {
        self.rect
    }

    /// Index of the descriptor pattern that matched.
    #[must_use]
    pub const fn pattern_index(&self) -> usize {
        self.pattern_index
    }

    /// Re-validate that the element is still in the document.
    #[must_use]
    pub fn is_attached(&self, host: &dyn Host) -> bool {
        host.probe(self.element).is_some_and(|p| p.connected)
    }
}
