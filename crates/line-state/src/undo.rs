//! Bounded undo log of inverse-applicable edit actions.
//!
//! Every mutation the controller performs on the buffer is paired with one
//! action recorded here. Undo walks `current` down and applies inverses;
//! redo re-applies forward. Recording while `current` is below the top
//! drops the tail, and the stack evicts from the bottom at capacity.

use line_text::Buffer;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

pub const DEFAULT_MAX_ACTIONS: usize = 100;
pub const MIN_MAX_ACTIONS: usize = 10;
pub const MAX_MAX_ACTIONS: usize = 1000;
pub const DEFAULT_MERGE_TIMEOUT: Duration = Duration::from_millis(1000);

/// One recorded mutation with enough context to run it in either direction.
#[derive(Debug, Clone)]
pub enum UndoAction {
    Insert {
        offset: usize,
        text: String,
        before_cursor: usize,
        after_cursor: usize,
        at: Instant,
    },
    Delete {
        offset: usize,
        text: String,
        before_cursor: usize,
        after_cursor: usize,
    },
    CursorMove {
        before_cursor: usize,
        after_cursor: usize,
    },
    Replace {
        offset: usize,
        old: String,
        new: String,
        before_cursor: usize,
        after_cursor: usize,
    },
}

#[derive(Debug)]
pub struct UndoLog {
    actions: Vec<UndoAction>,
    /// Number of actions currently applied; the redo tail starts here.
    current: usize,
    max_actions: usize,
    merge_timeout: Duration,
}

impl Default for UndoLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ACTIONS, DEFAULT_MERGE_TIMEOUT)
    }
}

impl UndoLog {
    pub fn new(max_actions: usize, merge_timeout: Duration) -> Self {
        Self {
            actions: Vec::new(),
            current: 0,
            max_actions: max_actions.clamp(MIN_MAX_ACTIONS, MAX_MAX_ACTIONS),
            merge_timeout,
        }
    }

    pub fn depth(&self) -> usize {
        self.current
    }

    pub fn redo_depth(&self) -> usize {
        self.actions.len() - self.current
    }

    pub fn clear(&mut self) {
        self.actions.clear();
        self.current = 0;
    }

    /// Heap footprint of the log including owned action text.
    pub fn memory_bytes(&self) -> usize {
        let slots = self.actions.capacity() * std::mem::size_of::<UndoAction>();
        let text: usize = self
            .actions
            .iter()
            .map(|a| match a {
                UndoAction::Insert { text, .. } | UndoAction::Delete { text, .. } => {
                    text.capacity()
                }
                UndoAction::Replace { old, new, .. } => old.capacity() + new.capacity(),
                UndoAction::CursorMove { .. } => 0,
            })
            .sum();
        slots + text
    }

    /// Record a new action at `current`, dropping any redo tail.
    pub fn record(&mut self, action: UndoAction) {
        self.actions.truncate(self.current);

        if let Some(merged) = self.try_merge(&action) {
            if merged {
                trace!(target: "state.undo", depth = self.current, "merge_insert");
                return;
            }
        }

        self.actions.push(action);
        self.current += 1;
        if self.actions.len() > self.max_actions {
            self.actions.remove(0);
            self.current -= 1;
            trace!(target: "state.undo", "evicted_bottom");
        }
        trace!(target: "state.undo", depth = self.current, "record");
    }

    /// Merge a new insert into the previous one when it directly extends it
    /// within the merge window. Returns `Some(true)` when merged,
    /// `Some(false)` when both are inserts but not mergeable, `None`
    /// otherwise.
    fn try_merge(&mut self, action: &UndoAction) -> Option<bool> {
        let UndoAction::Insert {
            offset: new_offset,
            text: new_text,
            after_cursor: new_after,
            at: new_at,
            ..
        } = action
        else {
            return None;
        };
        let Some(UndoAction::Insert {
            offset,
            text,
            after_cursor,
            at,
            ..
        }) = self.actions.last_mut()
        else {
            return None;
        };
        let extends = *new_offset == *offset + text.len();
        let within_window = new_at.duration_since(*at) < self.merge_timeout;
        if extends && within_window {
            text.push_str(new_text);
            *after_cursor = *new_after;
            *at = *new_at;
            Some(true)
        } else {
            Some(false)
        }
    }

    /// Apply the inverse of the most recent applied action. Returns false
    /// when there is nothing to undo.
    pub fn undo(&mut self, buffer: &mut Buffer) -> bool {
        if self.current == 0 {
            return false;
        }
        self.current -= 1;
        let action = self.actions[self.current].clone();
        if let Err(err) = Self::apply_inverse(&action, buffer) {
            warn!(target: "state.undo", %err, "undo_apply_failed");
            self.current += 1;
            return false;
        }
        trace!(target: "state.undo", depth = self.current, "undo");
        true
    }

    /// Re-apply the next undone action. Returns false when the redo tail is
    /// empty.
    pub fn redo(&mut self, buffer: &mut Buffer) -> bool {
        if self.current >= self.actions.len() {
            return false;
        }
        let action = self.actions[self.current].clone();
        if let Err(err) = Self::apply_forward(&action, buffer) {
            warn!(target: "state.undo", %err, "redo_apply_failed");
            return false;
        }
        self.current += 1;
        trace!(target: "state.undo", depth = self.current, "redo");
        true
    }

    fn apply_inverse(action: &UndoAction, buffer: &mut Buffer) -> Result<(), line_text::BufferError> {
        match action {
            UndoAction::Insert {
                offset,
                text,
                before_cursor,
                ..
            } => {
                buffer.delete(*offset, text.len())?;
                buffer.set_cursor(*before_cursor)
            }
            UndoAction::Delete {
                offset,
                text,
                before_cursor,
                ..
            } => {
                buffer.insert(*offset, text)?;
                buffer.set_cursor(*before_cursor)
            }
            UndoAction::CursorMove { before_cursor, .. } => buffer.set_cursor(*before_cursor),
            UndoAction::Replace {
                offset,
                old,
                new,
                before_cursor,
                ..
            } => {
                buffer.delete(*offset, new.len())?;
                buffer.insert(*offset, old)?;
                buffer.set_cursor(*before_cursor)
            }
        }
    }

    fn apply_forward(action: &UndoAction, buffer: &mut Buffer) -> Result<(), line_text::BufferError> {
        match action {
            UndoAction::Insert {
                offset,
                text,
                after_cursor,
                ..
            } => {
                buffer.insert(*offset, text)?;
                buffer.set_cursor(*after_cursor)
            }
            UndoAction::Delete {
                offset,
                text,
                after_cursor,
                ..
            } => {
                buffer.delete(*offset, text.len())?;
                buffer.set_cursor(*after_cursor)
            }
            UndoAction::CursorMove { after_cursor, .. } => buffer.set_cursor(*after_cursor),
            UndoAction::Replace {
                offset,
                old,
                new,
                after_cursor,
                ..
            } => {
                buffer.delete(*offset, old.len())?;
                buffer.insert(*offset, new)?;
                buffer.set_cursor(*after_cursor)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(log: &mut UndoLog, buf: &mut Buffer, s: &str) {
        let before = buf.cursor();
        let offset = buf.cursor();
        buf.insert(offset, s).unwrap();
        log.record(UndoAction::Insert {
            offset,
            text: s.to_string(),
            before_cursor: before,
            after_cursor: buf.cursor(),
            at: Instant::now(),
        });
    }

    #[test]
    fn undo_redo_round_trip() {
        let mut log = UndoLog::default();
        let mut buf = Buffer::new();
        insert(&mut log, &mut buf, "echo ");
        insert(&mut log, &mut buf, "hi");
        let final_text = buf.as_str().to_string();

        while log.undo(&mut buf) {}
        assert_eq!(buf.as_str(), "");
        while log.redo(&mut buf) {}
        assert_eq!(buf.as_str(), final_text);
    }

    #[test]
    fn undo_restores_deleted_text_and_cursor() {
        let mut log = UndoLog::default();
        let mut buf = Buffer::from_str("hello world");
        let removed = buf.delete(5, 6).unwrap();
        log.record(UndoAction::Delete {
            offset: 5,
            text: removed,
            before_cursor: 11,
            after_cursor: buf.cursor(),
        });
        assert!(log.undo(&mut buf));
        assert_eq!(buf.as_str(), "hello world");
        assert_eq!(buf.cursor(), 11);
    }

    #[test]
    fn record_drops_redo_tail() {
        let mut log = UndoLog::default();
        let mut buf = Buffer::from_str("abc");
        log.record(UndoAction::CursorMove {
            before_cursor: 3,
            after_cursor: 0,
        });
        log.record(UndoAction::CursorMove {
            before_cursor: 0,
            after_cursor: 2,
        });
        assert!(log.undo(&mut buf));
        assert_eq!(log.redo_depth(), 1);
        log.record(UndoAction::CursorMove {
            before_cursor: 0,
            after_cursor: 1,
        });
        assert_eq!(log.redo_depth(), 0);
        assert_eq!(log.depth(), 2);
    }

    #[test]
    fn eviction_keeps_depth_consistent() {
        let mut log = UndoLog::new(10, Duration::ZERO);
        let mut buf = Buffer::new();
        for _ in 0..25 {
            insert(&mut log, &mut buf, "x");
        }
        assert_eq!(log.depth(), 10);
        let mut undone = 0;
        while log.undo(&mut buf) {
            undone += 1;
        }
        assert_eq!(undone, 10);
        assert_eq!(buf.char_count(), 15);
    }

    #[test]
    fn adjacent_inserts_merge_within_window() {
        let mut log = UndoLog::new(100, Duration::from_secs(60));
        let mut buf = Buffer::new();
        insert(&mut log, &mut buf, "a");
        insert(&mut log, &mut buf, "b");
        insert(&mut log, &mut buf, "c");
        assert_eq!(log.depth(), 1);
        assert!(log.undo(&mut buf));
        assert_eq!(buf.as_str(), "");
    }

    #[test]
    fn non_adjacent_inserts_do_not_merge() {
        let mut log = UndoLog::new(100, Duration::from_secs(60));
        let mut buf = Buffer::from_str("ab");
        buf.set_cursor(0).unwrap();
        let offset = 0;
        buf.insert(offset, "x").unwrap();
        log.record(UndoAction::Insert {
            offset,
            text: "x".into(),
            before_cursor: 0,
            after_cursor: 1,
            at: Instant::now(),
        });
        // Insert at the end: offsets are not contiguous with the previous
        // action's end.
        let offset = buf.byte_len();
        buf.insert(offset, "y").unwrap();
        log.record(UndoAction::Insert {
            offset,
            text: "y".into(),
            before_cursor: 3,
            after_cursor: 4,
            at: Instant::now(),
        });
        assert_eq!(log.depth(), 2);
    }

    #[test]
    fn memory_accounts_for_owned_text() {
        let mut log = UndoLog::default();
        let before = log.memory_bytes();
        log.record(UndoAction::Delete {
            offset: 0,
            text: "0123456789".repeat(10),
            before_cursor: 0,
            after_cursor: 0,
        });
        assert!(log.memory_bytes() >= before + 100);
    }

    #[test]
    fn replace_round_trips() {
        let mut log = UndoLog::default();
        let mut buf = Buffer::from_str("foo baz");
        let old = buf.delete(4, 3).unwrap();
        buf.insert(4, "bar").unwrap();
        log.record(UndoAction::Replace {
            offset: 4,
            old,
            new: "bar".into(),
            before_cursor: 7,
            after_cursor: buf.cursor(),
        });
        assert!(log.undo(&mut buf));
        assert_eq!(buf.as_str(), "foo baz");
        assert!(log.redo(&mut buf));
        assert_eq!(buf.as_str(), "foo bar");
    }
}

#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn apply_undo_all_redo_all_is_identity(
            inserts in proptest::collection::vec("\\PC{1,5}", 1..12),
        ) {
            // Zero merge window so every action stays discrete.
            let mut log = UndoLog::new(1000, Duration::ZERO);
            let mut buf = Buffer::new();
            for s in &inserts {
                let offset = buf.cursor();
                let before = buf.cursor();
                buf.insert(offset, s).unwrap();
                log.record(UndoAction::Insert {
                    offset,
                    text: s.clone(),
                    before_cursor: before,
                    after_cursor: buf.cursor(),
                    at: Instant::now(),
                });
            }
            let applied = buf.as_str().to_string();
            while log.undo(&mut buf) {}
            prop_assert_eq!(buf.as_str(), "");
            while log.redo(&mut buf) {}
            prop_assert_eq!(buf.as_str(), applied);
        }
    }
}
