//! Completion: word extraction, providers, and the candidate list.
//!
//! The engine is stateless; the controller owns the cycling session. Each
//! provider decides from the context whether it applies, so the engine
//! always consults all of them and the list ends up sorted by
//! (priority descending, text ascending).

use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::{debug, trace};

mod providers;

pub use providers::{CommandProvider, FileProvider, VariableProvider};

/// Priority bands: exact matches first, then directories, then the rest.
pub const PRIORITY_EXACT: i32 = 100;
pub const PRIORITY_DIRECTORY: i32 = 10;
pub const PRIORITY_COMMAND: i32 = 8;
pub const PRIORITY_VARIABLE: i32 = 8;
pub const PRIORITY_FILE: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionItem {
    /// Full replacement for the word under completion.
    pub text: String,
    pub description: String,
    pub priority: i32,
}

/// Candidate list with a selection cursor.
#[derive(Debug, Default)]
pub struct CompletionList {
    items: Vec<CompletionItem>,
    selected: usize,
    sorted: bool,
}

impl CompletionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, item: CompletionItem) {
        self.items.push(item);
        self.sorted = false;
    }

    pub fn sort(&mut self) {
        self.items
            .sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.text.cmp(&b.text)));
        self.sorted = true;
        self.selected = 0;
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CompletionItem> {
        self.items.get(index)
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn selected(&self) -> Option<&CompletionItem> {
        self.items.get(self.selected)
    }

    pub fn select(&mut self, index: usize) {
        if index < self.items.len() {
            self.selected = index;
        }
    }

    /// Advance the selection, wrapping past the end.
    pub fn select_next(&mut self) {
        if !self.items.is_empty() {
            self.selected = (self.selected + 1) % self.items.len();
        }
    }

    /// Retreat the selection, wrapping past the start.
    pub fn select_prev(&mut self) {
        if !self.items.is_empty() {
            self.selected = (self.selected + self.items.len() - 1) % self.items.len();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompletionItem> {
        self.items.iter()
    }
}

/// Everything a provider needs to know about the completion point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionContext {
    pub input: String,
    pub cursor: usize,
    pub word_start: usize,
    pub word_end: usize,
    pub word: String,
    pub at_command_start: bool,
    pub in_quotes: bool,
}

/// Word boundaries for completion purposes.
fn is_word_boundary(c: u8) -> bool {
    c.is_ascii_whitespace() || matches!(c, b'|' | b'&' | b';' | b'<' | b'>' | b'(' | b')')
}

impl CompletionContext {
    /// Extract the word being completed at `cursor`.
    pub fn extract(input: &str, cursor: usize) -> Self {
        let bytes = input.as_bytes();
        let cursor = cursor.min(input.len());
        let mut word_start = cursor;
        while word_start > 0 && !is_word_boundary(bytes[word_start - 1]) {
            word_start -= 1;
        }
        // The word under completion runs up to the cursor; anything after
        // it is left alone.
        let word_end = cursor;
        let word = input[word_start..word_end].to_string();

        let mut at_command_start = true;
        let mut i = word_start;
        while i > 0 {
            let c = bytes[i - 1];
            if c.is_ascii_whitespace() {
                i -= 1;
                continue;
            }
            at_command_start = matches!(c, b'|' | b'&' | b';' | b'(');
            break;
        }

        let mut in_quotes = false;
        let mut quote = 0u8;
        let mut j = 0;
        while j < cursor {
            let c = bytes[j];
            if in_quotes {
                if quote == b'"' && c == b'\\' {
                    j += 2;
                    continue;
                }
                if c == quote {
                    in_quotes = false;
                }
            } else if c == b'"' || c == b'\'' {
                in_quotes = true;
                quote = c;
            }
            j += 1;
        }

        trace!(
            target: "complete",
            word = word.as_str(),
            word_start,
            at_command_start,
            in_quotes,
            "context"
        );
        Self {
            input: input.to_string(),
            cursor,
            word_start,
            word_end,
            word,
            at_command_start,
            in_quotes,
        }
    }
}

pub trait CompletionProvider {
    fn name(&self) -> &'static str;
    /// Add candidates for `ctx`. Providers self-gate: a non-applicable
    /// provider adds nothing.
    fn provide(&self, ctx: &CompletionContext, out: &mut CompletionList);
}

/// The provider stack in invocation order.
pub struct CompletionEngine {
    providers: Vec<Box<dyn CompletionProvider>>,
}

impl Default for CompletionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionEngine {
    pub fn new() -> Self {
        Self {
            providers: vec![
                Box::new(VariableProvider),
                Box::new(CommandProvider),
                Box::new(FileProvider),
            ],
        }
    }

    pub fn with_providers(providers: Vec<Box<dyn CompletionProvider>>) -> Self {
        Self { providers }
    }

    /// Build the sorted candidate list for `input` at `cursor`.
    pub fn complete(&self, input: &str, cursor: usize) -> (CompletionContext, CompletionList) {
        let ctx = CompletionContext::extract(input, cursor);
        let mut list = CompletionList::new();
        for provider in &self.providers {
            let before = list.len();
            provider.provide(&ctx, &mut list);
            trace!(
                target: "complete",
                provider = provider.name(),
                added = list.len() - before,
                "provider_run"
            );
        }
        list.sort();
        debug!(target: "complete", candidates = list.len(), word = ctx.word.as_str(), "complete");
        (ctx, list)
    }
}

/// True when `path` has any execute bit set and is a regular file.
pub(crate) fn is_executable(path: &Path) -> bool {
    match path.metadata() {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// PATH entries, deduplicated in order.
pub(crate) fn path_dirs() -> Vec<std::path::PathBuf> {
    let mut seen = HashSet::new();
    std::env::var_os("PATH")
        .map(|path| {
            std::env::split_paths(&path)
                .filter(|p| seen.insert(p.clone()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_orders_by_priority_then_text() {
        let mut list = CompletionList::new();
        for (text, priority) in [("food.txt", 5), ("foo/", 10), ("foo.txt", 5)] {
            list.add(CompletionItem {
                text: text.into(),
                description: String::new(),
                priority,
            });
        }
        assert!(!list.is_sorted());
        list.sort();
        assert!(list.is_sorted());
        let texts: Vec<_> = list.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, ["foo/", "foo.txt", "food.txt"]);
    }

    #[test]
    fn selection_wraps_both_ways() {
        let mut list = CompletionList::new();
        for t in ["a", "b", "c"] {
            list.add(CompletionItem {
                text: t.into(),
                description: String::new(),
                priority: 0,
            });
        }
        list.sort();
        list.select_next();
        list.select_next();
        assert_eq!(list.selected().unwrap().text, "c");
        list.select_next();
        assert_eq!(list.selected().unwrap().text, "a");
        list.select_prev();
        assert_eq!(list.selected().unwrap().text, "c");
    }

    #[test]
    fn context_word_spans_back_to_boundary() {
        let ctx = CompletionContext::extract("cat foo/ba", 10);
        assert_eq!(ctx.word, "foo/ba");
        assert_eq!(ctx.word_start, 4);
        assert_eq!(ctx.word_end, 10);
        assert!(!ctx.at_command_start);
    }

    #[test]
    fn context_first_word_is_command_start() {
        let ctx = CompletionContext::extract("gre", 3);
        assert!(ctx.at_command_start);
        assert_eq!(ctx.word, "gre");
    }

    #[test]
    fn context_after_pipe_is_command_start() {
        let ctx = CompletionContext::extract("ls | gre", 8);
        assert!(ctx.at_command_start);
        let ctx = CompletionContext::extract("ls; w", 5);
        assert!(ctx.at_command_start);
        let ctx = CompletionContext::extract("echo a b", 8);
        assert!(!ctx.at_command_start);
    }

    #[test]
    fn context_detects_quotes() {
        let ctx = CompletionContext::extract("echo \"some", 10);
        assert!(ctx.in_quotes);
        let ctx = CompletionContext::extract("echo \"done\" x", 13);
        assert!(!ctx.in_quotes);
    }

    #[test]
    fn context_word_stops_at_operators() {
        let ctx = CompletionContext::extract("cat<fo", 6);
        assert_eq!(ctx.word, "fo");
        assert_eq!(ctx.word_start, 4);
    }

    #[test]
    fn mid_word_cursor_completes_prefix_only() {
        let ctx = CompletionContext::extract("cat food", 6);
        assert_eq!(ctx.word, "fo");
        assert_eq!(ctx.word_end, 6);
    }
}
