#![forbid(unsafe_code)]

//! Insertion techniques.
//!
//! A technique is one way of getting text into an editing surface so that the
//! page's own editing machinery accepts it as genuine input. Techniques are
//! mutually incompatible across frameworks: a rich editor ignores value
//! assignment, a framework-controlled field reverts it, and `execCommand` is a
//! no-op on anything that is not focused and editable.
//!
//! Every technique verifies its effect by reading the surface back. A host call
//! that "succeeds" while the page silently reverts the change is a failure, so
//! the next technique in the chain gets its turn. The read-back also runs when
//! a follow-up step (event dispatch) throws: content that landed counts as
//! landed, so no later technique writes it a second time.

use snipline_core::config::InsertMode;
use snipline_core::error::HostError;
use snipline_core::host::{ElementId, Host, SyntheticEvent};
use tracing::{debug, trace};

/// One insertion mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TechniqueKind {
    /// The rich editor's own transaction API.
    RichTransaction,
    /// `execCommand("insertText")` at the prepared selection.
    ExecCommand,
    /// Prototype value setter that bypasses a framework's value tracker, then
    /// `input` + `change`.
    NativeSetter,
    /// Plain value / text assignment followed by the full synthetic key,
    /// input and change event sequence.
    DirectAssignment,
}

impl TechniqueKind {
    /// Stable name reported as the method used.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RichTransaction => "rich-transaction",
            Self::ExecCommand => "exec-command",
            Self::NativeSetter => "native-setter",
            Self::DirectAssignment => "direct-assignment",
        }
    }
}

impl core::fmt::Display for TechniqueKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a technique did not land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TechniqueError {
    /// The mechanism does not exist on this element.
    Unavailable(&'static str),
    /// The page refused the command.
    Rejected,
    /// The host call returned but the text is not in the surface.
    NotApplied,
    /// The page threw or the element went away.
    Host(HostError),
}

impl core::fmt::Display for TechniqueError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unavailable(what) => write!(f, "{what} is not available"),
            Self::Rejected => f.write_str("page rejected the command"),
            Self::NotApplied => f.write_str("content did not land"),
            Self::Host(err) => write!(f, "host error: {err}"),
        }
    }
}

impl std::error::Error for TechniqueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Host(err) => Some(err),
            _ => None,
        }
    }
}

impl From<HostError> for TechniqueError {
    fn from(err: HostError) -> Self {
        Self::Host(err)
    }
}

/// Ordered, non-empty list of techniques a strategy tries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TechniqueChain {
    first: TechniqueKind,
    rest: Vec<TechniqueKind>,
}

impl TechniqueChain {
    #[must_use]
    pub fn new(first: TechniqueKind, rest: &[TechniqueKind]) -> Self {
        Self {
            first,
            rest: rest.to_vec(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = TechniqueKind> + '_ {
        core::iter::once(self.first).chain(self.rest.iter().copied())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        1 + self.rest.len()
    }

    /// Always `false`; a chain has at least one technique.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Run one technique against `el` and verify the result.
pub fn apply(
    kind: TechniqueKind,
    host: &mut dyn Host,
    el: ElementId,
    text: &str,
    mode: InsertMode,
) -> Result<(), TechniqueError> {
    let before = host.read_text(el)?;
    prepare(host, el, mode)?;
    let step = run(kind, host, el, text, &before, mode);
    let after = host.read_text(el)?;
    if landed(&before, &after, text, mode) {
        if let Err(err) = &step {
            debug!(
                method = kind.as_str(),
                error = %err,
                "content landed before a follow-up step failed"
            );
        }
        return Ok(());
    }
    step?;
    Err(TechniqueError::NotApplied)
}

fn run(
    kind: TechniqueKind,
    host: &mut dyn Host,
    el: ElementId,
    text: &str,
    before: &str,
    mode: InsertMode,
) -> Result<(), TechniqueError> {
    match kind {
        TechniqueKind::RichTransaction => {
            if !host.rich_insert(el, text)? {
                return Err(TechniqueError::Unavailable("rich editor transaction API"));
            }
        }
        TechniqueKind::ExecCommand => {
            if !host.exec_insert_text(el, text)? {
                return Err(TechniqueError::Rejected);
            }
        }
        TechniqueKind::NativeSetter => {
            host.set_value_native(el, &target_value(before, text, mode))?;
            host.dispatch_event(el, &input_event(text))?;
            host.dispatch_event(el, &SyntheticEvent::Change)?;
        }
        TechniqueKind::DirectAssignment => {
            host.assign_content(el, &target_value(before, text, mode))?;
            for event in synthetic_typing(text) {
                host.dispatch_event(el, &event)?;
            }
        }
    }
    Ok(())
}

/// Unverified best effort run after every strategy failed: `execCommand`,
/// then plain assignment if the text is still missing.
///
/// Returns whether the text can be read back afterwards.
pub fn legacy_insert(host: &mut dyn Host, el: ElementId, text: &str) -> bool {
    let before = host.read_text(el).unwrap_or_default();
    if let Err(err) = host.focus(el) {
        trace!(error = %err, "legacy insert: focus failed");
    }
    if let Err(err) = host.move_caret_to_end(el) {
        trace!(error = %err, "legacy insert: caret move failed");
    }
    match host.exec_insert_text(el, text) {
        Ok(true) => {}
        Ok(false) => trace!("legacy insert: execCommand refused"),
        Err(err) => trace!(error = %err, "legacy insert: execCommand threw"),
    }
    if !has_landed(&*host, el, &before, text) {
        if let Err(err) = host.assign_content(el, &format!("{before}{text}")) {
            trace!(error = %err, "legacy insert: assignment failed");
        }
        if let Err(err) = host.dispatch_event(el, &input_event(text)) {
            trace!(error = %err, "legacy insert: input event failed");
        }
    }
    has_landed(&*host, el, &before, text)
}

fn has_landed(host: &dyn Host, el: ElementId, before: &str, text: &str) -> bool {
    host.read_text(el)
        .is_ok_and(|after| landed(before, &after, text, InsertMode::Append))
}

fn prepare(host: &mut dyn Host, el: ElementId, mode: InsertMode) -> Result<(), HostError> {
    host.focus(el)?;
    match mode {
        InsertMode::Append => host.move_caret_to_end(el),
        InsertMode::Replace => host.select_all(el),
    }
}

fn target_value(before: &str, text: &str, mode: InsertMode) -> String {
    match mode {
        InsertMode::Append => format!("{before}{text}"),
        InsertMode::Replace => text.to_string(),
    }
}

fn input_event(text: &str) -> SyntheticEvent {
    SyntheticEvent::Input {
        data: text.to_string(),
        input_type: "insertText",
    }
}

fn synthetic_typing(text: &str) -> [SyntheticEvent; 6] {
    let key = text
        .chars()
        .last()
        .map_or_else(|| "Unidentified".to_string(), String::from);
    [
        SyntheticEvent::KeyDown { key: key.clone() },
        SyntheticEvent::KeyPress { key: key.clone() },
        SyntheticEvent::BeforeInput {
            data: text.to_string(),
        },
        input_event(text),
        SyntheticEvent::KeyUp { key },
        SyntheticEvent::Change,
    ]
}

/// Whitespace-insensitive check that `text` is now in the surface.
///
/// Rich editors re-flow whitespace into block structure, so only the
/// non-whitespace characters are compared.
pub(crate) fn landed(before: &str, after: &str, text: &str, mode: InsertMode) -> bool {
    let squash = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
    let (before, after, text) = (squash(before), squash(after), squash(text));
    if text.is_empty() {
        return true;
    }
    match mode {
        InsertMode::Append => after.contains(&text) && after != before,
        InsertMode::Replace => after.contains(&text),
    }
}
