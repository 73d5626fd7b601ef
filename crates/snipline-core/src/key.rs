#![forbid(unsafe_code)]

//! Keyboard input normalization for the selection panel.
//!
//! The host forwards DOM `KeyboardEvent.key` strings plus a compact modifier
//! bitset; this module maps them onto the small key vocabulary the panel
//! understands.

use bitflags::bitflags;

bitflags! {
    /// Modifier keys held during a key event (`mods` bitset on the wire).
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const ALT   = 0b0010;
        const CTRL  = 0b0100;
        const SUPER = 0b1000;
    }
}

/// Normalized key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Up,
    Down,
    Enter,
    Escape,
    Tab,
    Backspace,
    Char(char),
    /// Any other named key (`"F5"`, `"Home"`, …).
    Named(Box<str>),
}

impl Key {
    /// Map a DOM `KeyboardEvent.key` value.
    #[must_use]
    pub fn from_dom_key(key: &str) -> Self {
        match key {
            "ArrowUp" | "Up" => Self::Up,
            "ArrowDown" | "Down" => Self::Down,
            "Enter" => Self::Enter,
            "Escape" | "Esc" => Self::Escape,
            "Tab" => Self::Tab,
            "Backspace" => Self::Backspace,
            _ => {
                let mut chars = key.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Self::Char(c),
                    _ => Self::Named(key.into()),
                }
            }
        }
    }
}

/// One key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInput {
    pub key: Key,
    pub mods: Modifiers,
}

impl KeyInput {
    #[must_use]
    pub fn new(key: Key) -> Self {
        Self {
            key,
            mods: Modifiers::empty(),
        }
    }

    #[must_use]
    pub fn with_mods(mut self, mods: Modifiers) -> Self {
        self.mods = mods;
        self
    }

    /// A key that would type a visible character into a text field.
    ///
    /// Shift is allowed (capitals); Ctrl/Alt/Super chords are shortcuts.
    #[must_use]
    pub fn is_printable(&self) -> bool {
        let chord = self
            .mods
            .intersects(Modifiers::CTRL | Modifiers::ALT | Modifiers::SUPER);
        matches!(self.key, Key::Char(c) if !c.is_control()) && !chord
    }
}
