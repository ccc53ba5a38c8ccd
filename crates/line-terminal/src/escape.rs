//! The emission vocabulary: every escape sequence this crate ever writes.
//!
//! Sequences are either pre-compiled constants or built by the small
//! formatters below, so the set of bytes that can reach the terminal is
//! fixed at compile time.

use std::io::Write;

pub const RESET: &[u8] = b"\x1b[0m";
pub const CLEAR_EOL: &[u8] = b"\x1b[K";
pub const CLEAR_LINE: &[u8] = b"\x1b[2K";
pub const CLEAR_EOS: &[u8] = b"\x1b[J";
pub const CLEAR_SCREEN: &[u8] = b"\x1b[2J\x1b[H";
pub const CURSOR_QUERY: &[u8] = b"\x1b[6n";
pub const CARRIAGE_RETURN: &[u8] = b"\r";
pub const NEWLINE: &[u8] = b"\r\n";
pub const BELL: &[u8] = b"\x07";
pub const BRACKETED_PASTE_ON: &[u8] = b"\x1b[?2004h";
pub const BRACKETED_PASTE_OFF: &[u8] = b"\x1b[?2004l";
pub const REVERSE_VIDEO: &[u8] = b"\x1b[7m";

/// `ESC [ N A`: cursor up. N == 0 emits nothing.
pub fn cursor_up(buf: &mut Vec<u8>, n: u16) {
    if n > 0 {
        let _ = write!(buf, "\x1b[{n}A");
    }
}

/// `ESC [ N B`: cursor down.
pub fn cursor_down(buf: &mut Vec<u8>, n: u16) {
    if n > 0 {
        let _ = write!(buf, "\x1b[{n}B");
    }
}

/// `ESC [ N G`: move to 1-based column.
pub fn cursor_col(buf: &mut Vec<u8>, col_zero_based: u16) {
    let _ = write!(buf, "\x1b[{}G", col_zero_based + 1);
}

/// 16-color foreground, `idx` in 0..16 (8..16 select the bright row).
pub fn fg_16(buf: &mut Vec<u8>, idx: u8) {
    let code = if idx < 8 { 30 + idx as u16 } else { 90 + (idx - 8) as u16 };
    let _ = write!(buf, "\x1b[{code}m");
}

/// 256-color foreground.
pub fn fg_256(buf: &mut Vec<u8>, idx: u8) {
    let _ = write!(buf, "\x1b[38;5;{idx}m");
}

/// Truecolor foreground.
pub fn fg_rgb(buf: &mut Vec<u8>, r: u8, g: u8, b: u8) {
    let _ = write!(buf, "\x1b[38;2;{r};{g};{b}m");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatters_match_wire_format() {
        let mut b = Vec::new();
        cursor_up(&mut b, 3);
        assert_eq!(b, b"\x1b[3A");
        b.clear();
        cursor_col(&mut b, 0);
        assert_eq!(b, b"\x1b[1G");
        b.clear();
        fg_16(&mut b, 1);
        assert_eq!(b, b"\x1b[31m");
        b.clear();
        fg_16(&mut b, 9);
        assert_eq!(b, b"\x1b[91m");
        b.clear();
        fg_256(&mut b, 208);
        assert_eq!(b, b"\x1b[38;5;208m");
        b.clear();
        fg_rgb(&mut b, 1, 2, 3);
        assert_eq!(b, b"\x1b[38;2;1;2;3m");
    }

    #[test]
    fn zero_count_motion_is_silent() {
        let mut b = Vec::new();
        cursor_up(&mut b, 0);
        cursor_down(&mut b, 0);
        assert!(b.is_empty());
    }
}
