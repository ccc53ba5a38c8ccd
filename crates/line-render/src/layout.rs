//! Prompt measurement and cursor arithmetic.
//!
//! Rows here are relative to the first prompt row. The buffer starts on
//! the prompt's last row at column `prompt_last_width`; a `\n` moves to
//! the next row's column 0, and a character that would not fit wraps
//! first. All widths are terminal cells, not bytes.

use unicode_width::UnicodeWidthChar;

/// Terminal and prompt dimensions for one render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u16,
    pub height: u16,
    pub prompt_first_width: u16,
    pub prompt_last_width: u16,
    pub prompt_height: u16,
}

impl Geometry {
    pub fn new(width: u16, height: u16, prompt: &str) -> Self {
        let metrics = PromptMetrics::measure(prompt);
        Self {
            width: width.max(1),
            height: height.max(1),
            prompt_first_width: metrics.first_width,
            prompt_last_width: metrics.last_width,
            prompt_height: metrics.height,
        }
    }
}

/// Display widths of a prompt that may contain color escapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptMetrics {
    pub first_width: u16,
    pub last_width: u16,
    pub height: u16,
}

impl PromptMetrics {
    /// Measure cell widths with CSI/OSC sequences stripped.
    pub fn measure(prompt: &str) -> Self {
        let mut first_width = 0u16;
        let mut width = 0u16;
        let mut height = 1u16;
        let mut chars = prompt.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\x1b' => match chars.peek() {
                    Some('[') => {
                        chars.next();
                        for b in chars.by_ref() {
                            if ('\x40'..='\x7e').contains(&b) {
                                break;
                            }
                        }
                    }
                    Some(']') => {
                        chars.next();
                        while let Some(b) = chars.next() {
                            if b == '\x07' {
                                break;
                            }
                            if b == '\x1b' && chars.peek() == Some(&'\\') {
                                chars.next();
                                break;
                            }
                        }
                    }
                    _ => {
                        chars.next();
                    }
                },
                '\n' => {
                    if height == 1 {
                        first_width = width;
                    }
                    height += 1;
                    width = 0;
                }
                _ => {
                    width += c.width().unwrap_or(0) as u16;
                }
            }
        }
        if height == 1 {
            first_width = width;
        }
        Self {
            first_width,
            last_width: width,
            height,
        }
    }
}

/// Where the cursor lands, in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorPos {
    pub absolute_row: u16,
    pub absolute_col: u16,
    /// Row relative to the first prompt row.
    pub relative_row: u16,
    pub relative_col: u16,
    /// The cursor sits at column 0 because the previous character filled
    /// the row.
    pub at_boundary: bool,
    pub valid: bool,
}

/// The rectangular area one rendered prompt+buffer occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Footprint {
    pub rows_used: u16,
    pub end_col: u16,
    pub wrapped: bool,
}

struct Walk {
    row: u16,
    col: u16,
    after_wrap: bool,
    any_wrap: bool,
    valid: bool,
}

fn walk(bytes: &[u8], upto: usize, geom: &Geometry) -> Walk {
    let (text, valid) = match std::str::from_utf8(bytes) {
        Ok(s) => (s, true),
        Err(e) => {
            // Malformed tail: lay out the valid prefix and flag the result.
            let prefix = &bytes[..e.valid_up_to()];
            (std::str::from_utf8(prefix).unwrap_or(""), false)
        }
    };
    let upto = upto.min(text.len());

    let mut row = geom.prompt_height.saturating_sub(1);
    let mut col = geom.prompt_last_width;
    let mut after_wrap = false;
    let mut any_wrap = false;

    for (i, c) in text.char_indices() {
        if i >= upto {
            break;
        }
        if c == '\n' {
            row += 1;
            col = 0;
            after_wrap = false;
            continue;
        }
        let w = c.width().unwrap_or(0) as u16;
        if col >= geom.width || col + w > geom.width {
            row += 1;
            col = 0;
            after_wrap = true;
            any_wrap = true;
        }
        col += w;
        if w > 0 {
            after_wrap = false;
        }
    }
    // The position itself can sit exactly on the wrap boundary.
    if col >= geom.width {
        row += 1;
        col = 0;
        after_wrap = true;
        any_wrap = true;
    }
    Walk {
        row,
        col,
        after_wrap,
        any_wrap,
        valid,
    }
}

/// Cursor cell for `cursor_byte` within `bytes` under `geom`. Absolute
/// coordinates are filled in by the display, which knows the prompt
/// origin; they start equal to the relative ones.
pub fn cursor_position(bytes: &[u8], cursor_byte: usize, geom: &Geometry) -> CursorPos {
    let walk = walk(bytes, cursor_byte, geom);
    CursorPos {
        absolute_row: walk.row,
        absolute_col: walk.col,
        relative_row: walk.row,
        relative_col: walk.col,
        at_boundary: walk.after_wrap && walk.col == 0,
        valid: walk.valid,
    }
}

/// Footprint of the fully laid out prompt+content.
pub fn content_footprint(bytes: &[u8], geom: &Geometry) -> Footprint {
    let walk = walk(bytes, bytes.len(), geom);
    Footprint {
        rows_used: walk.row + 1,
        end_col: walk.col,
        wrapped: walk.any_wrap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom(width: u16, prompt: &str) -> Geometry {
        Geometry::new(width, 24, prompt)
    }

    #[test]
    fn prompt_metrics_plain() {
        let m = PromptMetrics::measure("$ ");
        assert_eq!(m.first_width, 2);
        assert_eq!(m.last_width, 2);
        assert_eq!(m.height, 1);
    }

    #[test]
    fn prompt_metrics_strip_csi() {
        let m = PromptMetrics::measure("\x1b[1;32m$\x1b[0m ");
        assert_eq!(m.last_width, 2);
    }

    #[test]
    fn prompt_metrics_multiline() {
        let m = PromptMetrics::measure("user@host\n> ");
        assert_eq!(m.first_width, 9);
        assert_eq!(m.last_width, 2);
        assert_eq!(m.height, 2);
    }

    #[test]
    fn cursor_starts_after_prompt() {
        let g = geom(80, "$ ");
        let pos = cursor_position(b"", 0, &g);
        assert_eq!((pos.relative_row, pos.relative_col), (0, 2));
        assert!(pos.valid);
        assert!(!pos.at_boundary);
    }

    #[test]
    fn cursor_wraps_at_width() {
        // Width 4, prompt 2: "ab" exactly fills the first row.
        let g = geom(4, "$ ");
        let pos = cursor_position(b"ab", 2, &g);
        assert_eq!((pos.relative_row, pos.relative_col), (1, 0));
        assert!(pos.at_boundary);

        let pos = cursor_position(b"abcd", 4, &g);
        assert_eq!((pos.relative_row, pos.relative_col), (1, 2));
        assert!(!pos.at_boundary);
    }

    #[test]
    fn newline_advances_row_without_boundary_flag() {
        let g = geom(40, "$ ");
        let pos = cursor_position(b"echo\nfoo", 8, &g);
        assert_eq!((pos.relative_row, pos.relative_col), (1, 3));
        let at_nl = cursor_position(b"echo\nfoo", 5, &g);
        assert_eq!((at_nl.relative_row, at_nl.relative_col), (1, 0));
        assert!(!at_nl.at_boundary);
    }

    #[test]
    fn wide_chars_wrap_early() {
        // Width 4, prompt 2: the two-cell character cannot split.
        let g = geom(4, "$ ");
        let text = "a漢".as_bytes();
        let pos = cursor_position(text, text.len(), &g);
        assert_eq!((pos.relative_row, pos.relative_col), (1, 2));
    }

    #[test]
    fn multiline_prompt_offsets_rows() {
        let g = geom(40, "user@host\n> ");
        let pos = cursor_position(b"ls", 2, &g);
        assert_eq!((pos.relative_row, pos.relative_col), (1, 4));
    }

    #[test]
    fn invalid_bytes_flagged() {
        let g = geom(40, "$ ");
        let pos = cursor_position(&[b'a', 0xFF, b'b'], 3, &g);
        assert!(!pos.valid);
    }

    #[test]
    fn footprint_counts_rows() {
        let g = geom(4, "$ ");
        assert_eq!(
            content_footprint(b"", &g),
            Footprint {
                rows_used: 1,
                end_col: 2,
                wrapped: false
            }
        );
        assert_eq!(
            content_footprint(b"abcd", &g),
            Footprint {
                rows_used: 2,
                end_col: 2,
                wrapped: true
            }
        );
        let f = content_footprint(b"ab", &g);
        assert_eq!(f.rows_used, 2);
        assert_eq!(f.end_col, 0);
        assert!(f.wrapped);
    }
}
