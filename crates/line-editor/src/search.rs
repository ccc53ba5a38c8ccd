//! Reverse incremental search over history (Ctrl-R).
//!
//! The overlay owns the saved original line. Accepting (Enter or any
//! motion key) keeps the matched command in the buffer; cancelling
//! (Ctrl-G / Escape) restores the saved bytes exactly.

use crate::session::{Session, Tick};
use crate::EditorError;
use line_events::{KeyEvent, KeyToken, ModMask, NamedKey};
use line_input::ByteSource;
use tracing::debug;

#[derive(Debug)]
pub(crate) struct SearchOverlay {
    saved: String,
    saved_cursor: usize,
    query: String,
    match_index: Option<usize>,
    failed: bool,
}

impl SearchOverlay {
    pub(crate) fn new(saved: String, saved_cursor: usize) -> Self {
        Self {
            saved,
            saved_cursor,
            query: String::new(),
            match_index: None,
            failed: false,
        }
    }

    pub(crate) fn prompt(&self) -> String {
        if self.failed {
            format!("(failed reverse-i-search)`{}': ", self.query)
        } else {
            format!("(reverse-i-search)`{}': ", self.query)
        }
    }
}

/// Keys that end the search with "accept" and then run in Normal mode.
fn is_motion(key: &KeyEvent) -> bool {
    match &key.token {
        KeyToken::Named(
            NamedKey::Left | NamedKey::Right | NamedKey::Up | NamedKey::Down | NamedKey::Home
            | NamedKey::End,
        ) => true,
        KeyToken::Char(c) if key.mods.contains(ModMask::CTRL) => {
            matches!(c, 'a' | 'e' | 'b' | 'f')
        }
        KeyToken::Char(c) if key.mods.contains(ModMask::ALT) => matches!(c, 'b' | 'f'),
        _ => false,
    }
}

impl<S: ByteSource> Session<'_, S> {
    /// Enter reverse search from Normal mode.
    pub(crate) fn enter_reverse_search(&mut self) -> Result<Tick, EditorError> {
        let overlay = SearchOverlay::new(self.buffer.as_str().to_string(), self.buffer.cursor());
        self.buffer.clear();
        self.clear_overlay_footprint();
        self.set_search_mode(overlay);
        let kind = self.render();
        self.observe("search_enter", Some(kind));
        Ok(Tick::Continue)
    }

    /// One key in ReverseSearch mode. Returns the overlay to keep, or
    /// `None` when the session dropped back to Normal.
    pub(crate) fn search_key(
        &mut self,
        mut ov: SearchOverlay,
        key: KeyEvent,
    ) -> Result<(Option<SearchOverlay>, Tick), EditorError> {
        let ctrl = key.mods.contains(ModMask::CTRL);
        let alt = key.mods.contains(ModMask::ALT);

        // Accept and submit.
        if key.is_named(NamedKey::Enter) && !alt {
            self.exit_search(true, &ov);
            return Ok((None, Tick::Submit));
        }
        // Cancel: restore the original line byte for byte.
        if key.is_named(NamedKey::Escape) || (ctrl && key.token == KeyToken::Char('g')) {
            self.exit_search(false, &ov);
            return Ok((None, Tick::Continue));
        }
        if ctrl && key.token == KeyToken::Char('c') {
            self.buffer.clear();
            return Ok((None, Tick::Interrupt));
        }
        // Motion accepts, then the motion runs in Normal mode.
        if is_motion(&key) {
            self.exit_search(true, &ov);
            self.redispatch(key);
            return Ok((None, Tick::Continue));
        }

        match (&key.token, ctrl, alt) {
            (KeyToken::Char('r'), true, _) => {
                // Next match further back; no wraparound.
                match ov.match_index {
                    Some(i) if i > 0 => self.search_apply(&mut ov, i - 1, true),
                    _ => {
                        ov.failed = true;
                        self.ring_bell();
                    }
                }
            }
            (KeyToken::Char('s'), true, _) => match ov.match_index {
                Some(i) => self.search_apply(&mut ov, i + 1, false),
                None => {
                    ov.failed = true;
                    self.ring_bell();
                }
            },
            (KeyToken::Named(NamedKey::Backspace), _, _) => {
                ov.query.pop();
                if ov.query.is_empty() {
                    self.buffer.clear();
                    ov.match_index = None;
                    ov.failed = false;
                } else if !self.history.is_empty() {
                    let from = self.history.len() - 1;
                    self.search_apply(&mut ov, from, true);
                }
            }
            (KeyToken::Char(c), false, false) => {
                ov.query.push(*c);
                if self.history.is_empty() {
                    ov.failed = true;
                } else {
                    let from = self.history.len() - 1;
                    self.search_apply(&mut ov, from, true);
                }
            }
            _ => {
                // Anything else accepts the current match and re-dispatches.
                self.exit_search(true, &ov);
                self.redispatch(key);
                return Ok((None, Tick::Continue));
            }
        }

        // Park the overlay in the mode so the render sees its prompt, then
        // take it back for the caller.
        self.set_search_mode(ov);
        let kind = self.render();
        self.observe("search_key", Some(kind));
        Ok((self.take_search_mode(), Tick::Continue))
    }

    fn search_apply(&mut self, ov: &mut SearchOverlay, from: usize, backward: bool) {
        let hit = if backward {
            self.history.search_backward(&ov.query, from)
        } else {
            self.history.search_forward(&ov.query, from)
        };
        match hit {
            Some(i) => {
                ov.match_index = Some(i);
                ov.failed = false;
                if let Some(cmd) = self.history.command(i) {
                    let cmd = cmd.to_string();
                    self.buffer.replace_all(&cmd);
                }
                debug!(target: "editor.search", index = i, query = ov.query.as_str(), "match");
            }
            None => {
                ov.failed = true;
                self.ring_bell();
                debug!(target: "editor.search", query = ov.query.as_str(), "miss");
            }
        }
    }

    /// Leave ReverseSearch. Accepting keeps the matched buffer; cancelling
    /// restores the saved line and cursor.
    fn exit_search(&mut self, accept: bool, ov: &SearchOverlay) {
        if !accept {
            self.buffer.replace_all(&ov.saved);
            let cursor = ov.saved_cursor.min(self.buffer.byte_len());
            let _ = self.buffer.set_cursor(cursor);
        }
        self.set_normal_mode();
        self.clear_overlay_footprint();
        let kind = self.render();
        self.observe(if accept { "search_accept" } else { "search_cancel" }, Some(kind));
    }
}
