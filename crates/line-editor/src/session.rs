//! One edit session: the tick loop, Normal-mode dispatch, and the editing
//! helpers shared with the overlay modules.
//!
//! Within a tick one input event is fully processed and the display is
//! consistent again before the next event is read. Signals arrive as
//! pseudo-events from the decoder, never asynchronously.

use crate::complete::CompletionOverlay;
use crate::observer::StateObserver;
use crate::search::SearchOverlay;
use crate::{EditorError, ReadOutcome};
use line_config::Config;
use line_events::{InputEvent, KeyEvent, KeyToken, ModMask, NamedKey};
use line_history::History;
use line_input::{ByteSource, Decoder, InputError};
use line_render::{Display, Geometry, RenderKind};
use line_state::{KillRing, UndoAction, UndoLog};
use line_terminal::{escape, ColorLevel, TermSink};
use line_text::{utf8, Buffer};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Modal state; overlay variants own their session data.
#[derive(Debug)]
pub(crate) enum Mode {
    Normal,
    Completion(CompletionOverlay),
    ReverseSearch(SearchOverlay),
}

/// Per-event verdict of the dispatchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tick {
    Continue,
    Submit,
    Interrupt,
    Eof,
}

pub struct Session<'a, S: ByteSource> {
    decoder: Decoder<S>,
    pub(crate) sink: &'a mut dyn TermSink,
    pub(crate) display: Display,
    pub(crate) buffer: Buffer,
    pub(crate) undo: UndoLog,
    pub(crate) kill_ring: &'a mut KillRing,
    pub(crate) history: &'a mut History,
    pub(crate) engine: &'a line_complete::CompletionEngine,
    config: &'a Config,
    prompt: String,
    pub(crate) mode: Mode,
    /// History navigation: current recall index and the stashed
    /// in-progress line.
    nav_index: Option<usize>,
    nav_stash: String,
    observer: StateObserver,
    /// Events queued for re-dispatch after an overlay exits.
    pending: VecDeque<InputEvent>,
    last_exit_status: i32,
}

impl<'a, S: ByteSource> Session<'a, S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        decoder: Decoder<S>,
        sink: &'a mut dyn TermSink,
        history: &'a mut History,
        kill_ring: &'a mut KillRing,
        engine: &'a line_complete::CompletionEngine,
        config: &'a Config,
        prompt: &str,
        geometry: Geometry,
        color: ColorLevel,
        last_exit_status: i32,
    ) -> Self {
        Self {
            decoder,
            sink,
            display: Display::new(geometry, color),
            buffer: Buffer::new(),
            undo: UndoLog::new(config.undo.max_actions, config.undo_merge_timeout()),
            kill_ring,
            history,
            engine,
            config,
            prompt: prompt.to_string(),
            mode: Mode::Normal,
            nav_index: None,
            nav_stash: String::new(),
            observer: StateObserver::from_env(),
            pending: VecDeque::new(),
            last_exit_status,
        }
    }

    pub fn set_origin_row(&mut self, row_one_based: u16) {
        self.display.set_origin_row(row_one_based);
    }

    /// Run until the line is finished.
    pub fn run(&mut self) -> Result<ReadOutcome, EditorError> {
        debug!(
            target: "editor.session",
            prompt = self.prompt.as_str(),
            last_exit_status = self.last_exit_status,
            "session_start"
        );
        let kind = self.render();
        self.observe("session_start", Some(kind));
        self.flush()?;

        loop {
            let event = match self.pending.pop_front() {
                Some(ev) => ev,
                None => match self.decoder.read_event() {
                    Ok(ev) => ev,
                    Err(InputError::Closed) => return Ok(ReadOutcome::Eof),
                    Err(err) => return Err(err.into()),
                },
            };
            let tick = self.handle_event(event)?;
            self.flush()?;
            match tick {
                Tick::Continue => {}
                Tick::Submit => {
                    let line = self.buffer.as_str().to_string();
                    debug!(target: "editor.session", len = line.len(), "submit");
                    return Ok(ReadOutcome::Submitted(line));
                }
                Tick::Interrupt => {
                    debug!(target: "editor.session", "interrupt");
                    return Ok(ReadOutcome::Interrupted);
                }
                Tick::Eof => {
                    debug!(target: "editor.session", "eof");
                    return Ok(ReadOutcome::Eof);
                }
            }
        }
    }

    fn handle_event(&mut self, event: InputEvent) -> Result<Tick, EditorError> {
        match event {
            InputEvent::Resize => {
                if let Some((w, h)) = self.sink.dimensions() {
                    let prompt = self.current_prompt();
                    self.display.set_geometry(Geometry::new(w, h, &prompt));
                }
                self.display.mark_dirty();
                let kind = self.render();
                self.observe("resize", Some(kind));
                Ok(Tick::Continue)
            }
            InputEvent::Paste(text) => {
                // An overlay accepts its current state before the paste
                // lands, matching the any-other-key rule.
                match std::mem::replace(&mut self.mode, Mode::Normal) {
                    Mode::Completion(ov) => {
                        self.record_completion(&ov);
                        self.leave_completion("complete_accept_paste");
                    }
                    Mode::ReverseSearch(_) => {
                        self.clear_overlay_footprint();
                    }
                    Mode::Normal => {}
                }
                let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
                self.insert_text(&normalized, "paste")?;
                Ok(Tick::Continue)
            }
            InputEvent::Key(key) => {
                trace!(target: "editor.session", token = ?key.token, mods = ?key.mods, "key");
                match std::mem::replace(&mut self.mode, Mode::Normal) {
                    Mode::Normal => self.dispatch_normal(key),
                    Mode::ReverseSearch(ov) => {
                        let (kept, tick) = self.search_key(ov, key)?;
                        if let Some(ov) = kept {
                            self.mode = Mode::ReverseSearch(ov);
                        }
                        Ok(tick)
                    }
                    Mode::Completion(ov) => {
                        let (kept, tick) = self.completion_key(ov, key)?;
                        if let Some(ov) = kept {
                            self.mode = Mode::Completion(ov);
                        }
                        Ok(tick)
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Normal-mode dispatch
    // -----------------------------------------------------------------

    fn dispatch_normal(&mut self, key: KeyEvent) -> Result<Tick, EditorError> {
        let ctrl = key.mods.contains(ModMask::CTRL);
        let alt = key.mods.contains(ModMask::ALT);

        match (&key.token, ctrl, alt) {
            // Session outcomes.
            (KeyToken::Named(NamedKey::Enter), false, false) => return Ok(Tick::Submit),
            (KeyToken::Char('c'), true, _) => {
                self.buffer.clear();
                return Ok(Tick::Interrupt);
            }
            (KeyToken::Char('d'), true, false) => {
                if self.buffer.is_empty() {
                    return Ok(Tick::Eof);
                }
                self.delete_forward()?;
            }
            // Overlay entries.
            (KeyToken::Named(NamedKey::Tab), false, false) => return self.enter_completion(),
            (KeyToken::Char('r'), true, _) => return self.enter_reverse_search(),
            // Plain edits.
            (KeyToken::Char(c), false, false) => {
                let mut buf = [0u8; 4];
                let s = c.encode_utf8(&mut buf).to_string();
                self.insert_text(&s, "insert")?;
            }
            (KeyToken::Named(NamedKey::Enter), false, true) => {
                self.insert_text("\n", "newline")?;
            }
            (KeyToken::Named(NamedKey::Backspace), false, false) => self.backspace()?,
            (KeyToken::Named(NamedKey::Backspace), _, true) => self.kill_word_back()?,
            (KeyToken::Named(NamedKey::Delete), _, _) => self.delete_forward()?,
            // Motions.
            (KeyToken::Named(NamedKey::Left), false, false) | (KeyToken::Char('b'), true, false) => {
                self.buffer.move_left();
                self.motion("left");
            }
            (KeyToken::Named(NamedKey::Right), false, false)
            | (KeyToken::Char('f'), true, false) => {
                self.buffer.move_right();
                self.motion("right");
            }
            (KeyToken::Named(NamedKey::Home), _, _) | (KeyToken::Char('a'), true, false) => {
                let target = self.buffer.line_start();
                self.set_cursor_checked(target);
                self.motion("home");
            }
            (KeyToken::Named(NamedKey::End), _, _) | (KeyToken::Char('e'), true, false) => {
                let target = self.buffer.line_end();
                self.set_cursor_checked(target);
                self.motion("end");
            }
            (KeyToken::Char('b'), false, true) | (KeyToken::Named(NamedKey::Left), true, _) => {
                let target = self.buffer.word_start_before(self.buffer.cursor());
                self.set_cursor_checked(target);
                self.motion("word_left");
            }
            (KeyToken::Char('f'), false, true) | (KeyToken::Named(NamedKey::Right), true, _) => {
                let target = self.buffer.word_end_after(self.buffer.cursor());
                self.set_cursor_checked(target);
                self.motion("word_right");
            }
            (KeyToken::Named(NamedKey::Up), _, _) | (KeyToken::Char('p'), true, false) => {
                self.up()?;
            }
            (KeyToken::Named(NamedKey::Down), _, _) | (KeyToken::Char('n'), true, false) => {
                self.down()?;
            }
            // Kills and yank.
            (KeyToken::Char('k'), true, false) => self.kill_to_line_end()?,
            (KeyToken::Char('u'), true, false) => self.kill_to_line_start()?,
            (KeyToken::Char('w'), true, false) => self.kill_big_word_back()?,
            (KeyToken::Char('d'), false, true) => self.kill_word_forward()?,
            (KeyToken::Char('y'), true, false) => self.yank()?,
            // Misc editing.
            (KeyToken::Char('t'), true, false) => self.transpose()?,
            (KeyToken::Char('l'), true, false) => {
                self.sink.write_bytes(escape::CLEAR_SCREEN);
                self.display.set_origin_row(1);
                self.display.mark_dirty();
                let kind = self.render();
                self.observe("clear_screen", Some(kind));
            }
            (KeyToken::Char('_'), true, false) => self.undo_edit(),
            (KeyToken::Char('_'), false, true) => self.redo_edit(),
            (KeyToken::Char('.'), false, true) => self.insert_last_argument()?,
            // Everything else is deliberately inert.
            _ => {
                trace!(target: "editor.session", token = ?key.token, "ignored");
                self.observe("ignored", None);
            }
        }
        Ok(Tick::Continue)
    }

    // -----------------------------------------------------------------
    // Editing helpers (shared with the overlays)
    // -----------------------------------------------------------------

    pub(crate) fn insert_text(&mut self, s: &str, op: &str) -> Result<(), EditorError> {
        if s.is_empty() {
            return Ok(());
        }
        let before = self.buffer.cursor();
        self.buffer.insert(before, s)?;
        self.undo.record(UndoAction::Insert {
            offset: before,
            text: s.to_string(),
            before_cursor: before,
            after_cursor: self.buffer.cursor(),
            at: Instant::now(),
        });
        self.nav_index = None;
        let kind = self.render();
        self.observe(op, Some(kind));
        Ok(())
    }

    fn backspace(&mut self) -> Result<(), EditorError> {
        match self.buffer.backspace() {
            Some((offset, removed)) => {
                self.undo.record(UndoAction::Delete {
                    offset,
                    text: removed.clone(),
                    before_cursor: offset + removed.len(),
                    after_cursor: offset,
                });
                self.nav_index = None;
                let kind = self.render();
                self.observe("backspace", Some(kind));
            }
            None => self.ring_bell(),
        }
        Ok(())
    }

    fn delete_forward(&mut self) -> Result<(), EditorError> {
        match self.buffer.delete_forward() {
            Some((offset, removed)) => {
                self.undo.record(UndoAction::Delete {
                    offset,
                    text: removed,
                    before_cursor: offset,
                    after_cursor: offset,
                });
                self.nav_index = None;
                let kind = self.render();
                self.observe("delete", Some(kind));
            }
            None => self.ring_bell(),
        }
        Ok(())
    }

    /// Remove `[start, end)`, record it, and optionally feed the kill ring.
    fn kill_range(&mut self, start: usize, end: usize, op: &str) -> Result<(), EditorError> {
        if start >= end {
            self.ring_bell();
            return Ok(());
        }
        let before = self.buffer.cursor();
        let removed = self.buffer.delete(start, end - start)?;
        self.undo.record(UndoAction::Delete {
            offset: start,
            text: removed.clone(),
            before_cursor: before,
            after_cursor: self.buffer.cursor(),
        });
        self.kill_ring.push(removed);
        self.nav_index = None;
        let kind = self.render();
        self.observe(op, Some(kind));
        Ok(())
    }

    fn kill_to_line_end(&mut self) -> Result<(), EditorError> {
        let start = self.buffer.cursor();
        let mut end = self.buffer.line_end();
        // At end of line the newline itself is the kill.
        if end == start && end < self.buffer.byte_len() {
            end = utf8::next_boundary(self.buffer.as_bytes(), end);
        }
        self.kill_range(start, end, "kill_line_end")
    }

    fn kill_to_line_start(&mut self) -> Result<(), EditorError> {
        let start = self.buffer.line_start();
        let end = self.buffer.cursor();
        self.kill_range(start, end, "kill_line_start")
    }

    fn kill_big_word_back(&mut self) -> Result<(), EditorError> {
        let end = self.buffer.cursor();
        let start = self.buffer.big_word_start_before(end);
        self.kill_range(start, end, "kill_big_word")
    }

    fn kill_word_back(&mut self) -> Result<(), EditorError> {
        let end = self.buffer.cursor();
        let start = self.buffer.word_start_before(end);
        self.kill_range(start, end, "kill_word_back")
    }

    fn kill_word_forward(&mut self) -> Result<(), EditorError> {
        let start = self.buffer.cursor();
        let end = self.buffer.word_end_after(start);
        self.kill_range(start, end, "kill_word_forward")
    }

    fn yank(&mut self) -> Result<(), EditorError> {
        match self.kill_ring.yank() {
            Some(text) => {
                let text = text.to_string();
                self.insert_text(&text, "yank")
            }
            None => {
                self.ring_bell();
                Ok(())
            }
        }
    }

    /// Swap the characters around the cursor, readline style.
    fn transpose(&mut self) -> Result<(), EditorError> {
        let len = self.buffer.byte_len();
        let cur = self.buffer.cursor();
        if cur == 0 || self.buffer.char_count() < 2 {
            self.ring_bell();
            return Ok(());
        }
        let bytes_owned = self.buffer.as_bytes().to_vec();
        let bytes = bytes_owned.as_slice();
        let (a_start, b_start, b_end, target) = if cur >= len {
            let b_start = utf8::prev_boundary(bytes, len);
            (utf8::prev_boundary(bytes, b_start), b_start, len, len)
        } else {
            let b_end = utf8::next_boundary(bytes, cur);
            (utf8::prev_boundary(bytes, cur), cur, b_end, b_end)
        };
        if a_start == b_start {
            self.ring_bell();
            return Ok(());
        }
        let old = self.buffer.as_str()[a_start..b_end].to_string();
        let mut new = self.buffer.as_str()[b_start..b_end].to_string();
        new.push_str(&self.buffer.as_str()[a_start..b_start]);

        self.buffer.delete(a_start, b_end - a_start)?;
        self.buffer.insert(a_start, &new)?;
        self.set_cursor_checked(target);
        self.undo.record(UndoAction::Replace {
            offset: a_start,
            old,
            new,
            before_cursor: cur,
            after_cursor: target,
        });
        self.nav_index = None;
        let kind = self.render();
        self.observe("transpose", Some(kind));
        Ok(())
    }

    fn undo_edit(&mut self) {
        if self.undo.undo(&mut self.buffer) {
            let kind = self.render();
            self.observe("undo", Some(kind));
        } else {
            self.ring_bell();
        }
    }

    fn redo_edit(&mut self) {
        if self.undo.redo(&mut self.buffer) {
            let kind = self.render();
            self.observe("redo", Some(kind));
        } else {
            self.ring_bell();
        }
    }

    /// Insert the final whitespace-separated token of the newest history
    /// entry.
    fn insert_last_argument(&mut self) -> Result<(), EditorError> {
        let arg = self
            .history
            .get(self.history.len().wrapping_sub(1))
            .and_then(|e| e.command.split_whitespace().last())
            .map(str::to_string);
        match arg {
            Some(arg) => self.insert_text(&arg, "last_argument"),
            None => {
                self.ring_bell();
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------
    // History navigation and vertical motion
    // -----------------------------------------------------------------

    fn up(&mut self) -> Result<(), EditorError> {
        if self.move_vertical(true) {
            self.motion("line_up");
            return Ok(());
        }
        self.history_prev()
    }

    fn down(&mut self) -> Result<(), EditorError> {
        if self.move_vertical(false) {
            self.motion("line_down");
            return Ok(());
        }
        self.history_next()
    }

    /// Move the cursor between the buffer's logical lines, preserving the
    /// character column where possible. Returns false at the edge rows.
    fn move_vertical(&mut self, up: bool) -> bool {
        let text = self.buffer.as_str().to_string();
        let cur = self.buffer.cursor();
        let line_start = self.buffer.line_start();
        let col_chars = text[line_start..cur].chars().count();
        if up {
            if line_start == 0 {
                return false;
            }
            let prev_start = match text[..line_start - 1].rfind('\n') {
                Some(i) => i + 1,
                None => 0,
            };
            let prev_line = &text[prev_start..line_start - 1];
            let offset = utf8::bytes_for_n_chars(prev_line.as_bytes(), col_chars);
            self.set_cursor_checked(prev_start + offset);
            true
        } else {
            let line_end = self.buffer.line_end();
            if line_end >= text.len() {
                return false;
            }
            let next_start = line_end + 1;
            let next_end = match text[next_start..].find('\n') {
                Some(i) => next_start + i,
                None => text.len(),
            };
            let next_line = &text[next_start..next_end];
            let offset = utf8::bytes_for_n_chars(next_line.as_bytes(), col_chars);
            self.set_cursor_checked(next_start + offset);
            true
        }
    }

    fn history_prev(&mut self) -> Result<(), EditorError> {
        if self.history.is_empty() {
            self.ring_bell();
            return Ok(());
        }
        let next_index = match self.nav_index {
            None => {
                self.nav_stash = self.buffer.as_str().to_string();
                self.history.len() - 1
            }
            Some(0) => {
                self.ring_bell();
                return Ok(());
            }
            Some(i) => i - 1,
        };
        self.nav_index = Some(next_index);
        let cmd = self.history.command(next_index).map(str::to_string);
        if let Some(cmd) = cmd {
            self.replace_buffer_recorded(&cmd, "history_prev")?;
        }
        Ok(())
    }

    fn history_next(&mut self) -> Result<(), EditorError> {
        let Some(i) = self.nav_index else {
            self.ring_bell();
            return Ok(());
        };
        if i + 1 < self.history.len() {
            self.nav_index = Some(i + 1);
            let cmd = self.history.command(i + 1).map(str::to_string);
            if let Some(cmd) = cmd {
                self.replace_buffer_recorded(&cmd, "history_next")?;
            }
        } else {
            // Past the newest entry: back to the stashed line.
            self.nav_index = None;
            let stash = std::mem::take(&mut self.nav_stash);
            self.replace_buffer_recorded(&stash, "history_exit")?;
        }
        Ok(())
    }

    /// Whole-buffer replacement recorded as one undoable action. History
    /// navigation keeps the nav index, so it resets it itself.
    fn replace_buffer_recorded(&mut self, new_text: &str, op: &str) -> Result<(), EditorError> {
        let old = self.buffer.as_str().to_string();
        let before_cursor = self.buffer.cursor();
        if old == new_text {
            return Ok(());
        }
        self.buffer.replace_all(new_text);
        self.undo.record(UndoAction::Replace {
            offset: 0,
            old,
            new: new_text.to_string(),
            before_cursor,
            after_cursor: self.buffer.cursor(),
        });
        let kind = self.render();
        self.observe(op, Some(kind));
        Ok(())
    }

    // -----------------------------------------------------------------
    // Plumbing shared with overlay modules
    // -----------------------------------------------------------------

    /// Replace `[start, end)` with `text`, leaving the cursor after it.
    /// Used by the completion overlay; records nothing.
    pub(crate) fn replace_span(
        &mut self,
        start: usize,
        end: usize,
        text: &str,
    ) -> Result<(), EditorError> {
        if end > start {
            self.buffer.delete(start, end - start)?;
        }
        self.buffer.insert(start, text)?;
        Ok(())
    }

    pub(crate) fn motion(&mut self, op: &str) {
        let kind = self.render();
        self.observe(op, Some(kind));
    }

    fn set_cursor_checked(&mut self, offset: usize) {
        if self.buffer.set_cursor(offset).is_err() {
            warn!(target: "editor.session", offset, "cursor_target_off_boundary");
        }
    }

    pub(crate) fn redispatch(&mut self, key: KeyEvent) {
        self.pending.push_back(InputEvent::Key(key));
    }

    pub(crate) fn ring_bell(&mut self) {
        if self.config.display.bell {
            self.sink.write_bytes(escape::BELL);
        }
    }

    pub(crate) fn clear_overlay_footprint(&mut self) {
        self.display.clear_for_overlay(&mut *self.sink);
    }

    pub(crate) fn set_normal_mode(&mut self) {
        self.mode = Mode::Normal;
    }

    pub(crate) fn set_search_mode(&mut self, ov: SearchOverlay) {
        self.mode = Mode::ReverseSearch(ov);
    }

    pub(crate) fn take_search_mode(&mut self) -> Option<SearchOverlay> {
        match std::mem::replace(&mut self.mode, Mode::Normal) {
            Mode::ReverseSearch(ov) => Some(ov),
            other => {
                self.mode = other;
                None
            }
        }
    }

    pub(crate) fn set_completion_mode(&mut self, ov: CompletionOverlay) {
        self.mode = Mode::Completion(ov);
    }

    pub(crate) fn take_completion_mode(&mut self) -> Option<CompletionOverlay> {
        match std::mem::replace(&mut self.mode, Mode::Normal) {
            Mode::Completion(ov) => Some(ov),
            other => {
                self.mode = other;
                None
            }
        }
    }

    pub(crate) fn observe(&mut self, op: &str, render: Option<RenderKind>) {
        let boundary = self.display.last_cursor().at_boundary;
        self.observer.observe(op, &self.buffer, render, boundary);
    }

    /// Redraw for the current mode. The display picks the cheapest path.
    pub(crate) fn render(&mut self) -> RenderKind {
        let prompt = self.current_prompt();
        let geom = *self.display.geometry();
        self.display
            .set_geometry(Geometry::new(geom.width, geom.height, &prompt));
        let regions = line_syntax::classify(self.buffer.as_str());
        let cursor = self.buffer.cursor();
        match &self.mode {
            Mode::Completion(ov) => {
                let menu = crate::complete::menu_layout(&ov.list, geom.width);
                self.display.refresh_with_menu(
                    &mut *self.sink,
                    &prompt,
                    self.buffer.as_bytes(),
                    cursor,
                    &regions,
                    &menu,
                )
            }
            _ => self.display.refresh(
                &mut *self.sink,
                &prompt,
                self.buffer.as_bytes(),
                cursor,
                &regions,
            ),
        }
    }

    fn current_prompt(&self) -> String {
        match &self.mode {
            Mode::ReverseSearch(ov) => ov.prompt(),
            _ => self.prompt.clone(),
        }
    }

    /// A failed flush poisons the recorded display state; the session is
    /// over either way.
    fn flush(&mut self) -> Result<(), EditorError> {
        if let Err(err) = self.sink.flush() {
            self.display.mark_dirty();
            warn!(target: "editor.session", %err, "flush_failed");
            return Err(err.into());
        }
        Ok(())
    }
}
