//! Tab completion session: entry from Normal, menu cycling, accept and
//! cancel semantics.

use crate::session::{Session, Tick};
use crate::EditorError;
use line_complete::CompletionList;
use line_events::{KeyEvent, KeyToken, ModMask, NamedKey};
use line_input::ByteSource;
use line_state::UndoAction;
use line_terminal::escape;
use tracing::debug;

/// Rows the menu may occupy before it truncates with a summary line.
const MENU_MAX_ROWS: usize = 10;

#[derive(Debug)]
pub(crate) struct CompletionOverlay {
    pub(crate) list: CompletionList,
    word_start: usize,
    /// End of the text currently substituted for the word.
    word_end: usize,
    original_word: String,
}

impl<S: ByteSource> Session<'_, S> {
    /// First Tab in Normal mode.
    pub(crate) fn enter_completion(&mut self) -> Result<Tick, EditorError> {
        let (ctx, list) = self
            .engine
            .complete(self.buffer.as_str(), self.buffer.cursor());
        if list.is_empty() {
            self.ring_bell();
            self.observe("complete_none", None);
            return Ok(Tick::Continue);
        }
        let mut overlay = CompletionOverlay {
            list,
            word_start: ctx.word_start,
            word_end: ctx.word_end,
            original_word: ctx.word.clone(),
        };
        if overlay.list.len() == 1 {
            // A single candidate applies immediately, no session.
            self.apply_candidate(&mut overlay)?;
            self.record_completion(&overlay);
            let kind = self.render();
            self.observe("complete_single", Some(kind));
            return Ok(Tick::Continue);
        }
        // Preview the first candidate and open the menu.
        self.apply_candidate(&mut overlay)?;
        debug!(target: "editor.complete", candidates = overlay.list.len(), "menu_open");
        self.set_completion_mode(overlay);
        let kind = self.render();
        self.observe("complete_enter", Some(kind));
        Ok(Tick::Continue)
    }

    /// One key in Completion mode. Returns the overlay to keep, or `None`
    /// after dropping back to Normal.
    pub(crate) fn completion_key(
        &mut self,
        mut ov: CompletionOverlay,
        key: KeyEvent,
    ) -> Result<(Option<CompletionOverlay>, Tick), EditorError> {
        let ctrl = key.mods.contains(ModMask::CTRL);
        let columns = menu_columns(&ov.list, self.display.geometry().width);

        // Cancel: the original word comes back exactly.
        if key.is_named(NamedKey::Escape) || (ctrl && key.token == KeyToken::Char('g')) {
            let original = ov.original_word.clone();
            self.replace_span(ov.word_start, ov.word_end, &original)?;
            self.leave_completion("complete_cancel");
            return Ok((None, Tick::Continue));
        }
        if ctrl && key.token == KeyToken::Char('c') {
            self.buffer.clear();
            return Ok((None, Tick::Interrupt));
        }
        // Accept without re-dispatch.
        if key.is_named(NamedKey::Enter) {
            self.record_completion(&ov);
            self.leave_completion("complete_accept");
            return Ok((None, Tick::Continue));
        }

        let moved = match &key.token {
            KeyToken::Named(NamedKey::Tab) => {
                ov.list.select_next();
                true
            }
            KeyToken::Named(NamedKey::BackTab) => {
                ov.list.select_prev();
                true
            }
            KeyToken::Named(NamedKey::Right) => {
                ov.list.select_next();
                true
            }
            KeyToken::Named(NamedKey::Left) => {
                ov.list.select_prev();
                true
            }
            KeyToken::Named(NamedKey::Down) => {
                let target = ov.list.selected_index() + columns;
                if target < ov.list.len() {
                    ov.list.select(target);
                }
                true
            }
            KeyToken::Named(NamedKey::Up) => {
                let idx = ov.list.selected_index();
                if idx >= columns {
                    ov.list.select(idx - columns);
                }
                true
            }
            _ => false,
        };

        if moved {
            self.apply_candidate(&mut ov)?;
            self.set_completion_mode(ov);
            let kind = self.render();
            self.observe("complete_cycle", Some(kind));
            return Ok((self.take_completion_mode(), Tick::Continue));
        }

        // Any other key accepts the current candidate and then runs in
        // Normal mode, so typing continues seamlessly after the word.
        self.record_completion(&ov);
        self.leave_completion("complete_accept_redispatch");
        self.redispatch(key);
        Ok((None, Tick::Continue))
    }

    /// Substitute the selected candidate for the word span.
    fn apply_candidate(&mut self, ov: &mut CompletionOverlay) -> Result<(), EditorError> {
        let Some(item) = ov.list.selected() else {
            return Ok(());
        };
        let text = item.text.clone();
        self.replace_span(ov.word_start, ov.word_end, &text)?;
        ov.word_end = ov.word_start + text.len();
        Ok(())
    }

    /// One undo action for the whole completion session: original word to
    /// accepted candidate.
    pub(crate) fn record_completion(&mut self, ov: &CompletionOverlay) {
        let Some(item) = ov.list.selected() else {
            return;
        };
        if item.text == ov.original_word {
            return;
        }
        self.undo.record(UndoAction::Replace {
            offset: ov.word_start,
            old: ov.original_word.clone(),
            new: item.text.clone(),
            before_cursor: ov.word_start + ov.original_word.len(),
            after_cursor: ov.word_start + item.text.len(),
        });
    }

    pub(crate) fn leave_completion(&mut self, op: &str) {
        self.set_normal_mode();
        self.clear_overlay_footprint();
        let kind = self.render();
        self.observe(op, Some(kind));
    }
}

/// Menu grid column count for the current width.
pub(crate) fn menu_columns(list: &CompletionList, width: u16) -> usize {
    let cell = list
        .iter()
        .map(|i| i.text.chars().count())
        .max()
        .unwrap_or(1)
        + 2;
    ((width as usize) / cell).max(1)
}

/// Lay the candidates out row-major, highlighting the selection with
/// reverse video. Truncates past [`MENU_MAX_ROWS`] with a summary row.
pub(crate) fn menu_layout(list: &CompletionList, width: u16) -> Vec<String> {
    if list.is_empty() {
        return Vec::new();
    }
    let columns = menu_columns(list, width);
    let cell = list
        .iter()
        .map(|i| i.text.chars().count())
        .max()
        .unwrap_or(1)
        + 2;
    let total_rows = list.len().div_ceil(columns);
    let shown_rows = total_rows.min(MENU_MAX_ROWS);

    let mut rows = Vec::with_capacity(shown_rows + 1);
    for row in 0..shown_rows {
        let mut line = String::new();
        for col in 0..columns {
            let idx = row * columns + col;
            let Some(item) = list.get(idx) else {
                break;
            };
            let selected = idx == list.selected_index();
            if selected {
                line.push_str(std::str::from_utf8(escape::REVERSE_VIDEO).unwrap_or(""));
            }
            line.push_str(&item.text);
            if selected {
                line.push_str(std::str::from_utf8(escape::RESET).unwrap_or(""));
            }
            let pad = cell.saturating_sub(item.text.chars().count());
            for _ in 0..pad {
                line.push(' ');
            }
        }
        rows.push(line.trim_end().to_string());
    }
    if total_rows > shown_rows {
        let hidden = list.len() - shown_rows * columns;
        rows.push(format!("... and {hidden} more"));
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use line_complete::CompletionItem;

    fn list(names: &[&str]) -> CompletionList {
        let mut l = CompletionList::new();
        for n in names {
            l.add(CompletionItem {
                text: (*n).to_string(),
                description: String::new(),
                priority: 0,
            });
        }
        l.sort();
        l
    }

    #[test]
    fn layout_is_row_major_and_padded() {
        let l = list(&["aa", "bb", "cc", "dd"]);
        let rows = menu_layout(&l, 10);
        // Cell width 4, two columns across 10 cells.
        assert_eq!(rows.len(), 2);
        assert!(rows[0].contains("aa"));
        assert!(rows[0].contains("bb"));
        assert!(rows[1].contains("cc"));
    }

    #[test]
    fn selection_is_highlighted() {
        let mut l = list(&["one", "two"]);
        l.select(1);
        let rows = menu_layout(&l, 40);
        assert!(rows[0].contains("\x1b[7mtwo\x1b[0m"));
        assert!(!rows[0].contains("\x1b[7mone"));
    }

    #[test]
    fn long_lists_truncate_with_summary() {
        let names: Vec<String> = (0..100).map(|i| format!("item{i:03}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let l = list(&refs);
        let rows = menu_layout(&l, 20);
        assert!(rows.len() <= MENU_MAX_ROWS + 1);
        assert!(rows.last().unwrap().starts_with("... and"));
    }
}
