//! Input decoding: raw tty bytes to key events.
//!
//! One logical event per call. The first byte of an event blocks; any
//! continuation bytes (escape sequences, UTF-8 tails) are read with a short
//! timeout so a lone ESC key still decodes promptly. Sequences the tables
//! do not recognize come back as `Unknown` with their raw bytes preserved
//! for the trace log.

use line_events::{InputEvent, KeyEvent, KeyToken, ModMask, NamedKey};
use line_text::utf8;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

mod source;

pub use source::{ByteSource, ScriptSource, SourceEvent, TtySource};

pub const DEFAULT_ESCAPE_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum InputError {
    /// The input stream reached end of file (terminal fd closed).
    #[error("input stream closed")]
    Closed,
    #[error("input read failed: {0}")]
    Io(#[from] io::Error),
}

/// Decodes one key event at a time from a [`ByteSource`].
pub struct Decoder<S> {
    source: S,
    escape_timeout: Duration,
    /// When bracketed paste is active, `ESC [ 200 ~` opens a paste block
    /// that is delivered as a single event.
    paste_enabled: bool,
}

impl<S: ByteSource> Decoder<S> {
    pub fn new(source: S, escape_timeout: Duration, paste_enabled: bool) -> Self {
        Self {
            source,
            escape_timeout,
            paste_enabled,
        }
    }

    /// Read the next logical input event, blocking until one arrives.
    pub fn read_event(&mut self) -> Result<InputEvent, InputError> {
        match self.source.next_byte()? {
            SourceEvent::Eof => Err(InputError::Closed),
            SourceEvent::Resize => Ok(InputEvent::Resize),
            SourceEvent::Byte(b) => self.decode(b),
        }
    }

    fn decode(&mut self, first: u8) -> Result<InputEvent, InputError> {
        let event = match first {
            0x1B => return self.decode_escape(),
            0x08 | 0x7F => KeyEvent::new(KeyToken::Named(NamedKey::Backspace), ModMask::empty(), &[first]),
            0x09 => KeyEvent::new(KeyToken::Named(NamedKey::Tab), ModMask::empty(), &[first]),
            0x0A | 0x0D => KeyEvent::new(KeyToken::Named(NamedKey::Enter), ModMask::empty(), &[first]),
            0x1F => KeyEvent::new(KeyToken::Char('_'), ModMask::CTRL, &[first]),
            0x00..=0x1A => {
                // Ctrl-letter aliases: 0x01 is Ctrl-A and so on.
                if first == 0x00 {
                    KeyEvent::new(KeyToken::Unknown, ModMask::empty(), &[first])
                } else {
                    let c = (first + 0x60) as char;
                    KeyEvent::new(KeyToken::Char(c), ModMask::CTRL, &[first])
                }
            }
            0x1C..=0x1E => KeyEvent::new(KeyToken::Unknown, ModMask::empty(), &[first]),
            0x20..=0x7E => KeyEvent::new(KeyToken::Char(first as char), ModMask::empty(), &[first]),
            0xC0..=0xF4 => return Ok(self.decode_utf8(first)),
            _ => KeyEvent::new(KeyToken::Unknown, ModMask::empty(), &[first]),
        };
        Ok(InputEvent::Key(event))
    }

    /// Accumulate the continuation bytes of a multi-byte character.
    fn decode_utf8(&mut self, first: u8) -> InputEvent {
        let expected = utf8::expected_len(first);
        let mut raw = vec![first];
        for _ in 1..expected {
            match self.source.next_byte_within(self.escape_timeout) {
                Ok(Some(b)) if utf8::is_continuation(b) => raw.push(b),
                _ => {
                    debug!(target: "input", ?raw, "utf8_truncated");
                    return InputEvent::Key(KeyEvent::new(KeyToken::Unknown, ModMask::empty(), &raw));
                }
            }
        }
        match std::str::from_utf8(&raw).ok().and_then(|s| s.chars().next()) {
            Some(c) => InputEvent::Key(KeyEvent::new(KeyToken::Char(c), ModMask::empty(), &raw)),
            None => {
                debug!(target: "input", ?raw, "utf8_invalid");
                InputEvent::Key(KeyEvent::new(KeyToken::Unknown, ModMask::empty(), &raw))
            }
        }
    }

    fn decode_escape(&mut self) -> Result<InputEvent, InputError> {
        let Some(b1) = self.source.next_byte_within(self.escape_timeout)? else {
            // A lone ESC byte is the Escape key.
            return Ok(key(NamedKey::Escape, &[0x1B]));
        };
        match b1 {
            b'[' => self.decode_csi(),
            b'O' => Ok(self.decode_ss3()),
            0x7F => Ok(InputEvent::Key(KeyEvent::new(
                KeyToken::Named(NamedKey::Backspace),
                ModMask::ALT,
                &[0x1B, 0x7F],
            ))),
            0x0A | 0x0D => Ok(InputEvent::Key(KeyEvent::new(
                KeyToken::Named(NamedKey::Enter),
                ModMask::ALT,
                &[0x1B, b1],
            ))),
            0x1B => Ok(key(NamedKey::Escape, &[0x1B, 0x1B])),
            0x20..=0x7E => Ok(InputEvent::Key(KeyEvent::new(
                KeyToken::Char(b1 as char),
                ModMask::ALT,
                &[0x1B, b1],
            ))),
            _ => Ok(InputEvent::Key(KeyEvent::new(
                KeyToken::Unknown,
                ModMask::empty(),
                &[0x1B, b1],
            ))),
        }
    }

    /// `ESC O P..S`: the SS3 function keys.
    fn decode_ss3(&mut self) -> InputEvent {
        let Ok(Some(b2)) = self.source.next_byte_within(self.escape_timeout) else {
            return InputEvent::Key(KeyEvent::new(
                KeyToken::Unknown,
                ModMask::empty(),
                &[0x1B, b'O'],
            ));
        };
        let raw = [0x1B, b'O', b2];
        match b2 {
            b'P' => key(NamedKey::F(1), &raw),
            b'Q' => key(NamedKey::F(2), &raw),
            b'R' => key(NamedKey::F(3), &raw),
            b'S' => key(NamedKey::F(4), &raw),
            b'H' => key(NamedKey::Home, &raw),
            b'F' => key(NamedKey::End, &raw),
            _ => InputEvent::Key(KeyEvent::new(KeyToken::Unknown, ModMask::empty(), &raw)),
        }
    }

    /// `ESC [ <params> <final>`: accumulate parameter bytes until a final
    /// byte in 0x40..=0x7E arrives.
    fn decode_csi(&mut self) -> Result<InputEvent, InputError> {
        let mut raw = vec![0x1B, b'['];
        let mut params = Vec::new();
        loop {
            let Some(b) = self.source.next_byte_within(self.escape_timeout)? else {
                trace!(target: "input", ?raw, "csi_truncated");
                return Ok(InputEvent::Key(KeyEvent::new(
                    KeyToken::Unknown,
                    ModMask::empty(),
                    &raw,
                )));
            };
            raw.push(b);
            if (0x40..=0x7E).contains(&b) {
                return self.finish_csi(&raw, &params, b);
            }
            params.push(b);
            if raw.len() >= line_events::MAX_RAW_BYTES {
                return Ok(InputEvent::Key(KeyEvent::new(
                    KeyToken::Unknown,
                    ModMask::empty(),
                    &raw,
                )));
            }
        }
    }

    fn finish_csi(
        &mut self,
        raw: &[u8],
        params: &[u8],
        final_byte: u8,
    ) -> Result<InputEvent, InputError> {
        let params = std::str::from_utf8(params).unwrap_or("");
        let event = match (params, final_byte) {
            ("", b'A') => key(NamedKey::Up, raw),
            ("", b'B') => key(NamedKey::Down, raw),
            ("", b'C') => key(NamedKey::Right, raw),
            ("", b'D') => key(NamedKey::Left, raw),
            ("", b'H') => key(NamedKey::Home, raw),
            ("", b'F') => key(NamedKey::End, raw),
            ("", b'Z') => key(NamedKey::BackTab, raw),
            ("1;5", b'A') => ctrl_key(NamedKey::Up, raw),
            ("1;5", b'B') => ctrl_key(NamedKey::Down, raw),
            ("1;5", b'C') => ctrl_key(NamedKey::Right, raw),
            ("1;5", b'D') => ctrl_key(NamedKey::Left, raw),
            (n, b'~') => return self.finish_tilde(raw, n),
            _ => InputEvent::Key(KeyEvent::new(KeyToken::Unknown, ModMask::empty(), raw)),
        };
        Ok(event)
    }

    fn finish_tilde(&mut self, raw: &[u8], num: &str) -> Result<InputEvent, InputError> {
        let event = match num {
            "1" | "7" => key(NamedKey::Home, raw),
            "2" => key(NamedKey::Insert, raw),
            "3" => key(NamedKey::Delete, raw),
            "4" | "8" => key(NamedKey::End, raw),
            "5" => key(NamedKey::PageUp, raw),
            "6" => key(NamedKey::PageDown, raw),
            "11" => key(NamedKey::F(1), raw),
            "12" => key(NamedKey::F(2), raw),
            "13" => key(NamedKey::F(3), raw),
            "14" => key(NamedKey::F(4), raw),
            "15" => key(NamedKey::F(5), raw),
            "17" => key(NamedKey::F(6), raw),
            "18" => key(NamedKey::F(7), raw),
            "19" => key(NamedKey::F(8), raw),
            "20" => key(NamedKey::F(9), raw),
            "21" => key(NamedKey::F(10), raw),
            "23" => key(NamedKey::F(11), raw),
            "24" => key(NamedKey::F(12), raw),
            "200" if self.paste_enabled => return Ok(self.read_paste()),
            _ => InputEvent::Key(KeyEvent::new(KeyToken::Unknown, ModMask::empty(), raw)),
        };
        Ok(event)
    }

    /// Consume a bracketed paste block up to `ESC [ 201 ~`.
    fn read_paste(&mut self) -> InputEvent {
        const TERMINATOR: &[u8] = b"\x1b[201~";
        let mut content = Vec::new();
        loop {
            // Paste bytes stream in back to back; a stall means the
            // terminator got lost, so close the block rather than hang.
            match self.source.next_byte_within(self.escape_timeout) {
                Ok(Some(b)) => {
                    content.push(b);
                    if content.ends_with(TERMINATOR) {
                        content.truncate(content.len() - TERMINATOR.len());
                        break;
                    }
                }
                _ => break,
            }
        }
        let text = String::from_utf8_lossy(&content).into_owned();
        debug!(target: "input", bytes = text.len(), "paste_block");
        InputEvent::Paste(text)
    }
}

fn key(named: NamedKey, raw: &[u8]) -> InputEvent {
    InputEvent::Key(KeyEvent::new(KeyToken::Named(named), ModMask::empty(), raw))
}

fn ctrl_key(named: NamedKey, raw: &[u8]) -> InputEvent {
    InputEvent::Key(KeyEvent::new(KeyToken::Named(named), ModMask::CTRL, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(bytes: &[u8]) -> Decoder<ScriptSource> {
        Decoder::new(ScriptSource::new(bytes), DEFAULT_ESCAPE_TIMEOUT, true)
    }

    fn next_key(d: &mut Decoder<ScriptSource>) -> KeyEvent {
        match d.read_event().unwrap() {
            InputEvent::Key(k) => k,
            other => panic!("expected key, got {other:?}"),
        }
    }

    #[test]
    fn printable_ascii() {
        let mut d = decoder(b"hi");
        assert_eq!(next_key(&mut d).token, KeyToken::Char('h'));
        assert_eq!(next_key(&mut d).token, KeyToken::Char('i'));
    }

    #[test]
    fn control_letters_alias() {
        let mut d = decoder(&[0x01, 0x12, 0x0B]);
        let a = next_key(&mut d);
        assert!(a.is_ctrl('a'));
        assert!(next_key(&mut d).is_ctrl('r'));
        assert!(next_key(&mut d).is_ctrl('k'));
    }

    #[test]
    fn ctrl_underscore() {
        let mut d = decoder(&[0x1F]);
        assert!(next_key(&mut d).is_ctrl('_'));
    }

    #[test]
    fn backspace_variants() {
        let mut d = decoder(&[0x08, 0x7F]);
        assert_eq!(next_key(&mut d).token, KeyToken::Named(NamedKey::Backspace));
        assert_eq!(next_key(&mut d).token, KeyToken::Named(NamedKey::Backspace));
    }

    #[test]
    fn enter_from_cr_and_lf() {
        let mut d = decoder(&[0x0D, 0x0A]);
        assert_eq!(next_key(&mut d).token, KeyToken::Named(NamedKey::Enter));
        assert_eq!(next_key(&mut d).token, KeyToken::Named(NamedKey::Enter));
    }

    #[test]
    fn arrows_and_navigation() {
        let mut d = decoder(b"\x1b[A\x1b[B\x1b[C\x1b[D\x1b[H\x1b[F\x1b[Z");
        for expected in [
            NamedKey::Up,
            NamedKey::Down,
            NamedKey::Right,
            NamedKey::Left,
            NamedKey::Home,
            NamedKey::End,
            NamedKey::BackTab,
        ] {
            assert_eq!(next_key(&mut d).token, KeyToken::Named(expected));
        }
    }

    #[test]
    fn tilde_sequences() {
        let mut d = decoder(b"\x1b[1~\x1b[4~\x1b[5~\x1b[6~\x1b[2~\x1b[3~\x1b[7~\x1b[8~");
        for expected in [
            NamedKey::Home,
            NamedKey::End,
            NamedKey::PageUp,
            NamedKey::PageDown,
            NamedKey::Insert,
            NamedKey::Delete,
            NamedKey::Home,
            NamedKey::End,
        ] {
            assert_eq!(next_key(&mut d).token, KeyToken::Named(expected));
        }
    }

    #[test]
    fn function_keys() {
        let mut d = decoder(b"\x1bOP\x1bOQ\x1bOR\x1bOS\x1b[15~\x1b[24~");
        for expected in [1u8, 2, 3, 4, 5, 12] {
            assert_eq!(
                next_key(&mut d).token,
                KeyToken::Named(NamedKey::F(expected))
            );
        }
    }

    #[test]
    fn ctrl_arrows() {
        let mut d = decoder(b"\x1b[1;5C\x1b[1;5D");
        let right = next_key(&mut d);
        assert_eq!(right.token, KeyToken::Named(NamedKey::Right));
        assert!(right.mods.contains(ModMask::CTRL));
        let left = next_key(&mut d);
        assert_eq!(left.token, KeyToken::Named(NamedKey::Left));
        assert!(left.mods.contains(ModMask::CTRL));
    }

    #[test]
    fn alt_letters() {
        let mut d = decoder(b"\x1bb\x1bf\x1bd\x1b.\x1b_");
        for expected in ['b', 'f', 'd', '.', '_'] {
            let k = next_key(&mut d);
            assert_eq!(k.token, KeyToken::Char(expected));
            assert!(k.mods.contains(ModMask::ALT));
        }
    }

    #[test]
    fn alt_backspace() {
        let mut d = decoder(&[0x1B, 0x7F]);
        let k = next_key(&mut d);
        assert_eq!(k.token, KeyToken::Named(NamedKey::Backspace));
        assert!(k.mods.contains(ModMask::ALT));
    }

    #[test]
    fn lone_escape_decodes_without_continuation() {
        let mut d = decoder(&[0x1B]);
        assert_eq!(next_key(&mut d).token, KeyToken::Named(NamedKey::Escape));
    }

    #[test]
    fn utf8_two_byte_char() {
        let mut d = decoder("α".as_bytes());
        let k = next_key(&mut d);
        assert_eq!(k.token, KeyToken::Char('α'));
        assert_eq!(&k.raw[..], [0xCE, 0xB1]);
    }

    #[test]
    fn utf8_four_byte_char() {
        let mut d = decoder("𐍈".as_bytes());
        assert_eq!(next_key(&mut d).token, KeyToken::Char('𐍈'));
    }

    #[test]
    fn truncated_utf8_is_unknown() {
        let mut d = decoder(&[0xCE]);
        assert_eq!(next_key(&mut d).token, KeyToken::Unknown);
    }

    #[test]
    fn unmatched_csi_preserves_raw() {
        let mut d = decoder(b"\x1b[99q");
        let k = next_key(&mut d);
        assert_eq!(k.token, KeyToken::Unknown);
        assert_eq!(&k.raw[..], b"\x1b[99q");
    }

    #[test]
    fn bracketed_paste_is_one_event() {
        let mut d = decoder(b"\x1b[200~cargo build\x1b[201~x");
        assert_eq!(
            d.read_event().unwrap(),
            InputEvent::Paste("cargo build".into())
        );
        assert_eq!(next_key(&mut d).token, KeyToken::Char('x'));
    }

    #[test]
    fn paste_disabled_falls_through_to_unknown() {
        let mut d = Decoder::new(
            ScriptSource::new(b"\x1b[200~"),
            DEFAULT_ESCAPE_TIMEOUT,
            false,
        );
        assert_eq!(next_key(&mut d).token, KeyToken::Unknown);
    }

    #[test]
    fn eof_is_closed_error() {
        let mut d = decoder(b"");
        assert!(matches!(d.read_event(), Err(InputError::Closed)));
    }
}
