//! Command history: a bounded, ordered store with substring search.
//!
//! Index 0 is the oldest entry. Lookups are linear scans, which is adequate
//! at interactive sizes. Persistence is delegated: a [`HistoryBackend`]
//! loads entries at session start and appends at session end; the store
//! itself never touches the filesystem.

use std::time::SystemTime;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub command: String,
    pub timestamp: SystemTime,
    pub use_count: u32,
}

/// Delegated persistence interface, called only at session boundaries.
pub trait HistoryBackend {
    fn load(&mut self) -> std::io::Result<Vec<String>>;
    fn append(&mut self, command: &str) -> std::io::Result<()>;
}

#[derive(Debug)]
pub struct History {
    entries: Vec<HistoryEntry>,
    max_entries: usize,
}

impl History {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    pub fn command(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.command.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Append `command`. An exact duplicate of the most recent entry only
    /// bumps its use count; empty commands are dropped.
    pub fn add(&mut self, command: &str) {
        if command.is_empty() {
            return;
        }
        if let Some(last) = self.entries.last_mut() {
            if last.command == command {
                last.use_count += 1;
                last.timestamp = SystemTime::now();
                return;
            }
        }
        self.entries.push(HistoryEntry {
            command: command.to_string(),
            timestamp: SystemTime::now(),
            use_count: 1,
        });
        if self.entries.len() > self.max_entries {
            let overflow = self.entries.len() - self.max_entries;
            self.entries.drain(..overflow);
        }
        debug!(target: "history", len = self.entries.len(), "add");
    }

    /// Most recent index whose command contains `query`, scanning backward
    /// from `from` inclusive. No wraparound.
    pub fn search_backward(&self, query: &str, from: usize) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let from = from.min(self.entries.len() - 1);
        (0..=from)
            .rev()
            .find(|&i| self.entries[i].command.contains(query))
    }

    /// Oldest index at or after `from` whose command contains `query`.
    pub fn search_forward(&self, query: &str, from: usize) -> Option<usize> {
        (from..self.entries.len()).find(|&i| self.entries[i].command.contains(query))
    }

    /// Replace the store content from a backend load.
    pub fn load_from(&mut self, backend: &mut dyn HistoryBackend) -> std::io::Result<()> {
        let commands = backend.load()?;
        self.entries.clear();
        for command in commands {
            self.add(&command);
        }
        debug!(target: "history", len = self.entries.len(), "loaded");
        Ok(())
    }
}
