//! Key event model shared by the input decoder and the editor controller.

use smallvec::SmallVec;
use std::time::Instant;

bitflags::bitflags! {
    /// Modifier keys held during a key event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModMask: u8 {
        const CTRL  = 0b0001;
        const ALT   = 0b0010;
        const SHIFT = 0b0100;
        const SUPER = 0b1000;
    }
}

/// Keys with a name rather than a printable character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKey {
    Backspace,
    Enter,
    Tab,
    BackTab,
    Escape,
    Left,
    Right,
    Up,
    Down,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    F(u8),
}

/// The decoded identity of one key event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyToken {
    /// A printable character (including multi-byte UTF-8 input).
    Char(char),
    Named(NamedKey),
    /// An escape sequence the decoder did not recognize. The raw bytes are
    /// preserved on the event for logging.
    Unknown,
}

/// Longest raw byte echo retained on an event.
pub const MAX_RAW_BYTES: usize = 16;

/// One decoded key event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub token: KeyToken,
    pub mods: ModMask,
    /// The raw bytes that produced this event, capped at [`MAX_RAW_BYTES`].
    pub raw: SmallVec<[u8; MAX_RAW_BYTES]>,
    pub at: Instant,
}

impl KeyEvent {
    pub fn new(token: KeyToken, mods: ModMask, raw: &[u8]) -> Self {
        let mut echo = SmallVec::new();
        echo.extend_from_slice(&raw[..raw.len().min(MAX_RAW_BYTES)]);
        Self {
            token,
            mods,
            raw: echo,
            at: Instant::now(),
        }
    }

    pub fn char(c: char) -> Self {
        let mut buf = [0u8; 4];
        let s = c.encode_utf8(&mut buf);
        Self::new(KeyToken::Char(c), ModMask::empty(), s.as_bytes())
    }

    pub fn named(key: NamedKey) -> Self {
        Self::new(KeyToken::Named(key), ModMask::empty(), &[])
    }

    pub fn ctrl(c: char) -> Self {
        Self::new(KeyToken::Char(c), ModMask::CTRL, &[])
    }

    pub fn alt(c: char) -> Self {
        Self::new(KeyToken::Char(c), ModMask::ALT, &[])
    }

    pub fn is_ctrl(&self, c: char) -> bool {
        self.mods.contains(ModMask::CTRL) && self.token == KeyToken::Char(c)
    }

    pub fn is_alt(&self, c: char) -> bool {
        self.mods.contains(ModMask::ALT) && self.token == KeyToken::Char(c)
    }

    pub fn is_named(&self, key: NamedKey) -> bool {
        self.token == KeyToken::Named(key) && !self.mods.contains(ModMask::CTRL)
    }
}

/// What the input layer hands the controller each tick: a key, a pasted
/// block (bracketed paste), or a deferred resize signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Key(KeyEvent),
    Paste(String),
    Resize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_echo_is_capped() {
        let raw = [0x1bu8; 40];
        let ev = KeyEvent::new(KeyToken::Unknown, ModMask::empty(), &raw);
        assert_eq!(ev.raw.len(), MAX_RAW_BYTES);
    }

    #[test]
    fn predicate_helpers() {
        assert!(KeyEvent::ctrl('r').is_ctrl('r'));
        assert!(!KeyEvent::char('r').is_ctrl('r'));
        assert!(KeyEvent::alt('b').is_alt('b'));
        assert!(KeyEvent::named(NamedKey::Enter).is_named(NamedKey::Enter));
    }
}
