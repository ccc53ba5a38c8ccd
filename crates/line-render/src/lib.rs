//! Display model: turns (prompt, buffer, cursor, regions) into the smallest
//! correct byte sequence that moves the terminal from its last known state
//! to the target state.
//!
//! The model never queries the terminal during normal operation; it trusts
//! its own record of the last render (footprint, content copy, cursor) and
//! only the controller re-anchors it with a cursor query at session start.
//! All emission goes through the vocabulary in `line_terminal::escape`.

use line_syntax::Region;
use line_terminal::{escape, ColorLevel, TermSink};
use tracing::{debug, trace};

pub mod layout;
pub mod screen;
pub mod style;

pub use layout::{content_footprint, cursor_position, CursorPos, Footprint, Geometry, PromptMetrics};
pub use screen::{Cell, VirtualScreen};
pub use style::ColorState;

/// Which path a refresh took. Exposed for the observer and for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderKind {
    Full,
    CursorOnly,
    Incremental,
    /// Nothing changed at all.
    Skipped,
}

#[derive(Debug)]
pub struct Display {
    geom: Geometry,
    color_level: ColorLevel,
    color: ColorState,
    /// Absolute terminal row (0-based) of the prompt's first row, when a
    /// cursor query anchored it.
    origin_row: Option<u16>,
    last_footprint: Footprint,
    last_content: Vec<u8>,
    last_prompt: String,
    last_regions: Vec<Region>,
    last_cursor: CursorPos,
    last_extra_rows: u16,
    screen: VirtualScreen,
    rendered_once: bool,
    needs_full: bool,
    scrolled_for_bottom: bool,
}

impl Display {
    pub fn new(geom: Geometry, color_level: ColorLevel) -> Self {
        Self {
            geom,
            color_level,
            color: ColorState::new(),
            origin_row: None,
            last_footprint: Footprint::default(),
            last_content: Vec::new(),
            last_prompt: String::new(),
            last_regions: Vec::new(),
            last_cursor: CursorPos::default(),
            last_extra_rows: 0,
            screen: VirtualScreen::default(),
            rendered_once: false,
            needs_full: false,
            scrolled_for_bottom: false,
        }
    }

    /// The cell-level picture recorded at the last content render.
    pub fn screen(&self) -> &VirtualScreen {
        &self.screen
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geom
    }

    pub fn last_footprint(&self) -> Footprint {
        self.last_footprint
    }

    /// Anchor the prompt origin from a cursor query (1-based row).
    pub fn set_origin_row(&mut self, row_one_based: u16) {
        self.origin_row = Some(row_one_based.saturating_sub(1));
    }

    /// A width change invalidates every cached coordinate.
    pub fn set_geometry(&mut self, geom: Geometry) {
        if geom.width != self.geom.width {
            self.needs_full = true;
        }
        self.geom = geom;
    }

    /// Force the next refresh down the full path (resize, overlay teardown,
    /// failed write).
    pub fn mark_dirty(&mut self) {
        self.needs_full = true;
    }

    /// Bring the terminal to show `prompt` + `content` with the cursor at
    /// `cursor_byte`. Picks the cheapest correct path.
    pub fn refresh(
        &mut self,
        sink: &mut dyn TermSink,
        prompt: &str,
        content: &[u8],
        cursor_byte: usize,
        regions: &[Region],
    ) -> RenderKind {
        self.refresh_with_menu(sink, prompt, content, cursor_byte, regions, &[])
    }

    /// Refresh with extra rows (the completion menu) drawn below the
    /// content. Any extra rows force the full path.
    pub fn refresh_with_menu(
        &mut self,
        sink: &mut dyn TermSink,
        prompt: &str,
        content: &[u8],
        cursor_byte: usize,
        regions: &[Region],
        extra_rows: &[String],
    ) -> RenderKind {
        let kind = self.pick_mode(prompt, content, cursor_byte, regions, extra_rows);
        trace!(target: "render", ?kind, len = content.len(), cursor = cursor_byte, "refresh");
        match kind {
            RenderKind::Full => {
                self.render_full(sink, prompt, content, cursor_byte, regions, extra_rows);
            }
            RenderKind::CursorOnly => self.render_cursor_only(sink, content, cursor_byte),
            RenderKind::Incremental => {
                self.render_incremental(sink, content, cursor_byte, regions);
            }
            RenderKind::Skipped => {}
        }
        kind
    }

    /// Tear down the current footprint for an overlay transition: clear
    /// every row except the first, then clear the prompt row to its end,
    /// leaving the cursor at the start of the prompt row.
    pub fn clear_for_overlay(&mut self, sink: &mut dyn TermSink) {
        let mut out = Vec::new();
        let rows = self.last_footprint.rows_used.saturating_add(self.last_extra_rows);
        let bottom = rows.saturating_sub(1);
        escape::cursor_down(&mut out, bottom.saturating_sub(self.last_cursor.relative_row));
        for _ in 0..bottom {
            out.extend_from_slice(escape::CLEAR_LINE);
            escape::cursor_up(&mut out, 1);
        }
        out.extend_from_slice(escape::CARRIAGE_RETURN);
        out.extend_from_slice(escape::CLEAR_EOL);
        sink.write_bytes(&out);

        self.color.invalidate();
        self.last_content.clear();
        self.last_regions.clear();
        self.last_prompt.clear();
        self.screen = VirtualScreen::default();
        self.last_footprint = Footprint {
            rows_used: 1,
            end_col: 0,
            wrapped: false,
        };
        self.last_extra_rows = 0;
        self.last_cursor = CursorPos::default();
        self.needs_full = true;
        debug!(target: "render", rows, "overlay_clear");
    }

    fn pick_mode(
        &self,
        prompt: &str,
        content: &[u8],
        cursor_byte: usize,
        regions: &[Region],
        extra_rows: &[String],
    ) -> RenderKind {
        if self.needs_full
            || !self.rendered_once
            || prompt != self.last_prompt
            || !extra_rows.is_empty()
            || self.last_extra_rows > 0
        {
            return RenderKind::Full;
        }
        if content == self.last_content.as_slice() {
            let target = cursor_position(content, cursor_byte, &self.geom);
            if (target.relative_row, target.relative_col)
                == (self.last_cursor.relative_row, self.last_cursor.relative_col)
            {
                return RenderKind::Skipped;
            }
            return RenderKind::CursorOnly;
        }
        if self.incremental_applies(content, cursor_byte, regions) {
            return RenderKind::Incremental;
        }
        RenderKind::Full
    }

    /// Exact prefix extension by one character, cursor at the end, no wrap
    /// crossing, and no classification change of the existing prefix.
    fn incremental_applies(&self, content: &[u8], cursor_byte: usize, regions: &[Region]) -> bool {
        let old_len = self.last_content.len();
        if content.len() <= old_len || !content.starts_with(&self.last_content) {
            return false;
        }
        if cursor_byte != content.len() {
            return false;
        }
        let appended = &content[old_len..];
        let Ok(appended_str) = std::str::from_utf8(appended) else {
            return false;
        };
        if appended_str.chars().count() != 1 {
            return false;
        }
        // The previous render must have left the physical cursor at the end
        // of the old content.
        let old_end = cursor_position(&self.last_content, old_len, &self.geom);
        if (old_end.relative_row, old_end.relative_col)
            != (self.last_cursor.relative_row, self.last_cursor.relative_col)
        {
            return false;
        }
        // No wrap boundary crossed by the new character.
        let new_end = cursor_position(content, content.len(), &self.geom);
        if new_end.relative_row != old_end.relative_row || new_end.at_boundary {
            return false;
        }
        if appended_str == "\n" {
            return false;
        }
        // Classification of the prefix must be stable.
        clip_regions(regions, old_len) == clip_regions(&self.last_regions, old_len)
    }

    fn render_full(
        &mut self,
        sink: &mut dyn TermSink,
        prompt: &str,
        content: &[u8],
        cursor_byte: usize,
        regions: &[Region],
        extra_rows: &[String],
    ) {
        let mut out = Vec::with_capacity(prompt.len() + content.len() + 64);

        // Back to the prompt origin, then wipe the old footprint.
        if self.rendered_once {
            escape::cursor_up(&mut out, self.last_cursor.relative_row);
        }
        out.extend_from_slice(escape::CARRIAGE_RETURN);
        out.extend_from_slice(escape::CLEAR_EOS);
        if self.color_level != ColorLevel::None {
            out.extend_from_slice(escape::RESET);
        }
        self.color.invalidate();

        out.extend_from_slice(prompt.as_bytes());
        self.emit_content(&mut out, content, regions);
        self.color.reset(&mut out, self.color_level);

        let footprint = content_footprint(content, &self.geom);
        // Commit a pending wrap so the physical cursor matches the layout.
        if footprint.end_col == 0 && footprint.rows_used > 1 && !ends_with_newline(content) {
            out.extend_from_slice(escape::NEWLINE);
        }

        let mut end_row = footprint.rows_used.saturating_sub(1);
        for row in extra_rows {
            out.extend_from_slice(escape::NEWLINE);
            out.extend_from_slice(row.as_bytes());
            out.extend_from_slice(escape::CLEAR_EOL);
            end_row += 1;
        }

        self.track_scroll(footprint.rows_used + extra_rows.len() as u16);

        let mut cursor = cursor_position(content, cursor_byte, &self.geom);
        escape::cursor_up(&mut out, end_row.saturating_sub(cursor.relative_row));
        escape::cursor_col(&mut out, cursor.relative_col);
        sink.write_bytes(&out);

        if let Some(origin) = self.origin_row {
            cursor.absolute_row = origin + cursor.relative_row;
            cursor.absolute_col = cursor.relative_col;
        }
        self.screen = VirtualScreen::compose(
            prompt,
            std::str::from_utf8(content).unwrap_or(""),
            regions,
            &self.geom,
        );
        self.last_footprint = footprint;
        self.last_content = content.to_vec();
        self.last_prompt = prompt.to_string();
        self.last_regions = regions.to_vec();
        self.last_cursor = cursor;
        self.last_extra_rows = extra_rows.len() as u16;
        self.rendered_once = true;
        self.needs_full = false;
        debug!(
            target: "render",
            rows = footprint.rows_used,
            extras = extra_rows.len(),
            "full_render"
        );
    }

    fn render_cursor_only(&mut self, sink: &mut dyn TermSink, content: &[u8], cursor_byte: usize) {
        let mut cursor = cursor_position(content, cursor_byte, &self.geom);
        let mut out = Vec::with_capacity(16);
        if cursor.relative_row < self.last_cursor.relative_row {
            escape::cursor_up(&mut out, self.last_cursor.relative_row - cursor.relative_row);
        } else {
            escape::cursor_down(&mut out, cursor.relative_row - self.last_cursor.relative_row);
        }
        escape::cursor_col(&mut out, cursor.relative_col);
        sink.write_bytes(&out);
        if let Some(origin) = self.origin_row {
            cursor.absolute_row = origin + cursor.relative_row;
            cursor.absolute_col = cursor.relative_col;
        }
        self.last_cursor = cursor;
    }

    fn render_incremental(
        &mut self,
        sink: &mut dyn TermSink,
        content: &[u8],
        cursor_byte: usize,
        regions: &[Region],
    ) {
        let old_len = self.last_content.len();
        let appended = &content[old_len..];
        let mut out = Vec::with_capacity(appended.len() + 16);
        if self.color_level != ColorLevel::None {
            let kind = line_syntax::region_at(regions, old_len).map(|r| r.kind);
            self.color.set(&mut out, kind, self.color_level);
        }
        out.extend_from_slice(appended);
        self.color.reset(&mut out, self.color_level);
        sink.write_bytes(&out);

        self.last_content.extend_from_slice(appended);
        self.last_regions = regions.to_vec();
        self.last_footprint = content_footprint(content, &self.geom);
        self.screen = VirtualScreen::compose(
            &self.last_prompt,
            std::str::from_utf8(content).unwrap_or(""),
            regions,
            &self.geom,
        );
        let mut cursor = cursor_position(content, cursor_byte, &self.geom);
        if let Some(origin) = self.origin_row {
            cursor.absolute_row = origin + cursor.relative_row;
            cursor.absolute_col = cursor.relative_col;
        }
        self.last_cursor = cursor;
    }

    /// Colored emission of the buffer content. `\n` becomes CR+LF so the
    /// column resets regardless of output modes.
    fn emit_content(&mut self, out: &mut Vec<u8>, content: &[u8], regions: &[Region]) {
        let text = match std::str::from_utf8(content) {
            Ok(s) => s,
            Err(e) => {
                // Render only the valid prefix; the buffer invariant makes
                // this unreachable in practice.
                std::str::from_utf8(&content[..e.valid_up_to()]).unwrap_or("")
            }
        };
        let mut buf = [0u8; 4];
        for (i, c) in text.char_indices() {
            if c == '\n' {
                self.color.reset(out, self.color_level);
                out.extend_from_slice(escape::NEWLINE);
                continue;
            }
            if self.color_level != ColorLevel::None {
                let kind = line_syntax::region_at(regions, i).map(|r| r.kind);
                self.color.set(out, kind, self.color_level);
            }
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }

    /// One-time allowance for the prompt sliding up when the footprint
    /// reaches the bottom row: the terminal scrolls on write, this keeps
    /// the recorded origin honest.
    fn track_scroll(&mut self, rows_used: u16) {
        let Some(origin) = self.origin_row else {
            return;
        };
        let needed = u32::from(origin) + u32::from(rows_used);
        if needed > u32::from(self.geom.height) {
            let new_origin = self.geom.height.saturating_sub(rows_used);
            self.origin_row = Some(new_origin);
            if !self.scrolled_for_bottom {
                self.scrolled_for_bottom = true;
                debug!(target: "render", origin = new_origin, "bottom_scroll");
            }
        }
    }
}

fn ends_with_newline(content: &[u8]) -> bool {
    content.last() == Some(&b'\n')
}

/// Regions clipped to the first `upto` bytes, for prefix-stability checks.
fn clip_regions(regions: &[Region], upto: usize) -> Vec<Region> {
    regions
        .iter()
        .take_while(|r| r.start < upto)
        .map(|r| Region {
            start: r.start,
            len: r.len.min(upto - r.start),
            kind: r.kind,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use line_terminal::MemorySink;

    fn display(width: u16) -> Display {
        Display::new(Geometry::new(width, 24, "$ "), ColorLevel::None)
    }

    fn refresh(
        d: &mut Display,
        sink: &mut MemorySink,
        content: &str,
        cursor: usize,
    ) -> RenderKind {
        d.refresh(sink, "$ ", content.as_bytes(), cursor, &[])
    }

    #[test]
    fn first_refresh_is_full() {
        let mut d = display(80);
        let mut sink = MemorySink::default();
        assert_eq!(refresh(&mut d, &mut sink, "", 0), RenderKind::Full);
        let s = String::from_utf8_lossy(&sink.bytes);
        assert!(s.contains("$ "));
        assert!(s.contains("\x1b[J"));
    }

    #[test]
    fn ascii_append_is_incremental() {
        let mut d = display(80);
        let mut sink = MemorySink::default();
        refresh(&mut d, &mut sink, "h", 1);
        sink.bytes.clear();
        assert_eq!(refresh(&mut d, &mut sink, "hi", 2), RenderKind::Incremental);
        assert_eq!(sink.bytes, b"i");
    }

    #[test]
    fn append_landing_on_wrap_boundary_falls_back_to_full() {
        let mut d = display(4);
        let mut sink = MemorySink::default();
        refresh(&mut d, &mut sink, "a", 1);
        // "ab" exactly fills the first row: the cursor lands on the wrap
        // boundary, so the cheap path is refused.
        assert_eq!(refresh(&mut d, &mut sink, "ab", 2), RenderKind::Full);
        // The full render committed the wrap; appending on the second row
        // is cheap again.
        assert_eq!(refresh(&mut d, &mut sink, "abc", 3), RenderKind::Incremental);
        assert_eq!(refresh(&mut d, &mut sink, "abcd", 4), RenderKind::Incremental);
    }

    #[test]
    fn mid_buffer_insert_is_full() {
        let mut d = display(80);
        let mut sink = MemorySink::default();
        refresh(&mut d, &mut sink, "ac", 2);
        assert_eq!(refresh(&mut d, &mut sink, "abc", 2), RenderKind::Full);
    }

    #[test]
    fn cursor_move_without_edit_is_cursor_only() {
        let mut d = display(80);
        let mut sink = MemorySink::default();
        refresh(&mut d, &mut sink, "hello", 5);
        sink.bytes.clear();
        assert_eq!(refresh(&mut d, &mut sink, "hello", 0), RenderKind::CursorOnly);
        // Only a column move: ESC [ 3 G (prompt is two cells wide).
        assert_eq!(sink.bytes, b"\x1b[3G");
    }

    #[test]
    fn unmoved_cursor_skips() {
        let mut d = display(80);
        let mut sink = MemorySink::default();
        refresh(&mut d, &mut sink, "x", 1);
        sink.bytes.clear();
        assert_eq!(refresh(&mut d, &mut sink, "x", 1), RenderKind::Skipped);
        assert!(sink.bytes.is_empty());
    }

    #[test]
    fn prompt_change_forces_full() {
        let mut d = display(80);
        let mut sink = MemorySink::default();
        refresh(&mut d, &mut sink, "x", 1);
        assert_eq!(
            d.refresh(&mut sink, "(reverse-i-search)`': ", b"", 0, &[]),
            RenderKind::Full
        );
    }

    #[test]
    fn width_change_forces_full() {
        let mut d = display(80);
        let mut sink = MemorySink::default();
        refresh(&mut d, &mut sink, "ab", 2);
        d.set_geometry(Geometry::new(40, 24, "$ "));
        assert_eq!(refresh(&mut d, &mut sink, "ab", 2), RenderKind::Full);
    }

    #[test]
    fn classification_shift_forces_full() {
        let mut d = Display::new(Geometry::new(80, 24, "$ "), ColorLevel::Ansi16);
        let mut sink = MemorySink::default();
        let open = "echo \"ab";
        d.refresh(
            &mut sink,
            "$ ",
            open.as_bytes(),
            open.len(),
            &line_syntax::classify(open),
        );
        // The closing quote reclassifies the string region behind it.
        let closed = "echo \"ab\"";
        assert_eq!(
            d.refresh(
                &mut sink,
                "$ ",
                closed.as_bytes(),
                closed.len(),
                &line_syntax::classify(closed),
            ),
            RenderKind::Full
        );
    }

    #[test]
    fn stable_classification_stays_incremental() {
        let mut d = Display::new(Geometry::new(80, 24, "$ "), ColorLevel::Ansi16);
        let mut sink = MemorySink::default();
        d.refresh(&mut sink, "$ ", b"gre", 3, &line_syntax::classify("gre"));
        sink.bytes.clear();
        assert_eq!(
            d.refresh(&mut sink, "$ ", b"grep", 4, &line_syntax::classify("grep")),
            RenderKind::Incremental
        );
        let s = String::from_utf8_lossy(&sink.bytes);
        assert!(s.contains('p'));
    }

    #[test]
    fn becoming_a_builtin_reclassifies_and_forces_full() {
        // "ech" colors as a plain command; the fourth letter turns the
        // whole word into a builtin, so the prefix must repaint.
        let mut d = Display::new(Geometry::new(80, 24, "$ "), ColorLevel::Ansi16);
        let mut sink = MemorySink::default();
        d.refresh(&mut sink, "$ ", b"ech", 3, &line_syntax::classify("ech"));
        assert_eq!(
            d.refresh(&mut sink, "$ ", b"echo", 4, &line_syntax::classify("echo")),
            RenderKind::Full
        );
    }

    #[test]
    fn overlay_clear_counts_rows() {
        let mut d = display(4);
        let mut sink = MemorySink::default();
        // "abcd" wraps to two rows under width 4 with prompt 2.
        refresh(&mut d, &mut sink, "abcd", 4);
        sink.bytes.clear();
        d.clear_for_overlay(&mut sink);
        let s = String::from_utf8_lossy(&sink.bytes);
        // One clear-line-and-up pair (rows_used - 1 == 1), then CR + EOL.
        assert_eq!(s.matches("\x1b[2K").count(), 1);
        assert_eq!(s.matches("\x1b[1A").count(), 1);
        assert!(s.ends_with("\r\x1b[K"));
        // The next refresh redraws from the prompt row without moving up.
        sink.bytes.clear();
        assert_eq!(refresh(&mut d, &mut sink, "", 0), RenderKind::Full);
        assert!(!String::from_utf8_lossy(&sink.bytes).contains("\x1b[1A"));
    }

    #[test]
    fn menu_rows_render_below_and_cursor_returns() {
        let mut d = display(40);
        let mut sink = MemorySink::default();
        let rows = vec!["foo/  foo.txt".to_string()];
        let kind = d.refresh_with_menu(&mut sink, "$ ", b"fo", 2, &[], &rows);
        assert_eq!(kind, RenderKind::Full);
        let s = String::from_utf8_lossy(&sink.bytes);
        assert!(s.contains("foo/  foo.txt"));
        // The cursor climbs back above the menu row.
        assert!(s.contains("\x1b[1A"));
    }

    #[test]
    fn full_render_positions_cursor_mid_line() {
        let mut d = display(80);
        let mut sink = MemorySink::default();
        refresh(&mut d, &mut sink, "hello", 5);
        sink.bytes.clear();
        refresh(&mut d, &mut sink, "hxello", 2);
        let s = String::from_utf8_lossy(&sink.bytes);
        // Column 2 of content plus the prompt width, 1-based: ESC[5G.
        assert!(s.ends_with("\x1b[5G"), "got {s:?}");
    }

    #[test]
    fn absolute_rows_follow_origin() {
        let mut d = display(80);
        d.set_origin_row(10); // 1-based row 10
        let mut sink = MemorySink::default();
        refresh(&mut d, &mut sink, "x", 1);
        // origin stored 0-based: absolute row 9.
        assert_eq!(d.last_cursor_absolute().0, 9);
    }
}

impl Display {
    /// Test and observer hook: the absolute (row, col) recorded at the last
    /// render.
    pub fn last_cursor_absolute(&self) -> (u16, u16) {
        (self.last_cursor.absolute_row, self.last_cursor.absolute_col)
    }

    /// The relative cursor recorded at the last render.
    pub fn last_cursor(&self) -> CursorPos {
        self.last_cursor
    }
}
