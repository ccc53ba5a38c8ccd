//! The built-in providers: files, commands on PATH, environment variables.

use crate::{
    is_executable, path_dirs, CompletionContext, CompletionItem, CompletionList,
    CompletionProvider, PRIORITY_COMMAND, PRIORITY_DIRECTORY, PRIORITY_EXACT, PRIORITY_FILE,
    PRIORITY_VARIABLE,
};
use std::collections::HashSet;
use tracing::trace;

/// Completes directory entries against the word's dir part and name
/// prefix. Hidden entries only appear when the prefix itself is hidden;
/// directories get a trailing slash and outrank plain files; an exact name
/// match outranks everything.
pub struct FileProvider;

impl CompletionProvider for FileProvider {
    fn name(&self) -> &'static str {
        "file"
    }

    fn provide(&self, ctx: &CompletionContext, out: &mut CompletionList) {
        if ctx.word.starts_with('$') {
            return;
        }
        let (dir_part, prefix) = match ctx.word.rfind('/') {
            Some(i) => (&ctx.word[..=i], &ctx.word[i + 1..]),
            None => ("", ctx.word.as_str()),
        };
        let dir = if dir_part.is_empty() { "." } else { dir_part };
        let show_hidden = prefix.starts_with('.');

        let Ok(entries) = std::fs::read_dir(dir) else {
            trace!(target: "complete", dir, "dir_unreadable");
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.starts_with(prefix) {
                continue;
            }
            if name.starts_with('.') && !show_hidden {
                continue;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let priority = if name == prefix && !prefix.is_empty() {
                PRIORITY_EXACT
            } else if is_dir {
                PRIORITY_DIRECTORY
            } else {
                PRIORITY_FILE
            };
            let mut text = String::with_capacity(dir_part.len() + name.len() + 1);
            text.push_str(dir_part);
            text.push_str(name);
            if is_dir {
                text.push('/');
            }
            out.add(CompletionItem {
                text,
                description: if is_dir { "directory" } else { "file" }.to_string(),
                priority,
            });
        }
    }
}

/// Completes executable names from PATH when the word is in command
/// position and not already a path.
pub struct CommandProvider;

impl CompletionProvider for CommandProvider {
    fn name(&self) -> &'static str {
        "command"
    }

    fn provide(&self, ctx: &CompletionContext, out: &mut CompletionList) {
        if !ctx.at_command_start || ctx.word.is_empty() {
            return;
        }
        if ctx.word.contains('/') || ctx.word.starts_with('$') {
            return;
        }
        let mut seen = HashSet::new();
        for dir in path_dirs() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                if !name.starts_with(ctx.word.as_str()) || !seen.insert(name.to_string()) {
                    continue;
                }
                if !is_executable(&entry.path()) {
                    continue;
                }
                out.add(CompletionItem {
                    text: name.to_string(),
                    description: "command".to_string(),
                    priority: if name == ctx.word {
                        PRIORITY_EXACT
                    } else {
                        PRIORITY_COMMAND
                    },
                });
            }
        }
    }
}

/// Completes environment variable names for `$`-prefixed words.
pub struct VariableProvider;

impl CompletionProvider for VariableProvider {
    fn name(&self) -> &'static str {
        "variable"
    }

    fn provide(&self, ctx: &CompletionContext, out: &mut CompletionList) {
        let Some(prefix) = ctx.word.strip_prefix('$') else {
            return;
        };
        for (name, value) in std::env::vars() {
            if !name.starts_with(prefix) {
                continue;
            }
            let mut shown = value;
            if shown.len() > 24 {
                shown.truncate(24);
                shown.push_str("...");
            }
            out.add(CompletionItem {
                text: format!("${name}"),
                description: shown,
                priority: PRIORITY_VARIABLE,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn complete_word(word: &str) -> CompletionList {
        let input = format!("cat {word}");
        let ctx = CompletionContext::extract(&input, input.len());
        let mut list = CompletionList::new();
        FileProvider.provide(&ctx, &mut list);
        list.sort();
        list
    }

    #[test]
    fn file_provider_orders_dirs_first() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("foo.txt"), b"").unwrap();
        fs::write(root.join("food.txt"), b"").unwrap();
        fs::create_dir(root.join("foo")).unwrap();

        let list = complete_word(&format!("{}/fo", root.display()));
        let base = format!("{}/", root.display());
        let endings: Vec<_> = list
            .iter()
            .map(|i| i.text.strip_prefix(&base).unwrap_or(&i.text).to_string())
            .collect();
        assert_eq!(endings, ["foo/", "foo.txt", "food.txt"]);
    }

    #[test]
    fn file_provider_exact_match_outranks() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("make"), b"").unwrap();
        fs::write(root.join("makefile"), b"").unwrap();

        let list = complete_word(&format!("{}/make", root.display()));
        assert_eq!(list.get(0).unwrap().priority, crate::PRIORITY_EXACT);
        assert!(list.get(0).unwrap().text.ends_with("/make"));
    }

    #[test]
    fn file_provider_hides_dotfiles_unless_asked() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join(".hidden"), b"").unwrap();
        fs::write(root.join("visible"), b"").unwrap();

        let all = complete_word(&format!("{}/", root.display()));
        assert_eq!(all.len(), 1);
        let hidden = complete_word(&format!("{}/.h", root.display()));
        assert_eq!(hidden.len(), 1);
        assert!(hidden.get(0).unwrap().text.ends_with(".hidden"));
    }

    #[test]
    fn command_provider_skips_argument_position() {
        let ctx = CompletionContext::extract("echo ls", 7);
        let mut list = CompletionList::new();
        CommandProvider.provide(&ctx, &mut list);
        assert!(list.is_empty());
    }

    #[test]
    fn command_provider_finds_path_executables() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("zqtool");
        fs::write(&bin, b"#!/bin/sh\n").unwrap();
        let mut perms = fs::metadata(&bin).unwrap().permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o755);
        fs::set_permissions(&bin, perms).unwrap();
        // Non-executable neighbor must not appear.
        fs::write(tmp.path().join("zqdata"), b"").unwrap();

        let old_path = std::env::var_os("PATH");
        std::env::set_var("PATH", tmp.path());
        let ctx = CompletionContext::extract("zq", 2);
        let mut list = CompletionList::new();
        CommandProvider.provide(&ctx, &mut list);
        if let Some(p) = old_path {
            std::env::set_var("PATH", p);
        }

        assert_eq!(list.len(), 1);
        assert_eq!(list.get(0).unwrap().text, "zqtool");
    }

    #[test]
    fn variable_provider_matches_env_names() {
        std::env::set_var("SHLINE_TEST_VARIABLE", "42");
        let ctx = CompletionContext::extract("echo $SHLINE_TEST_VAR", 21);
        let mut list = CompletionList::new();
        VariableProvider.provide(&ctx, &mut list);
        assert!(list
            .iter()
            .any(|i| i.text == "$SHLINE_TEST_VARIABLE"));
    }

    #[test]
    fn variable_provider_ignores_plain_words() {
        let ctx = CompletionContext::extract("echo PATH", 9);
        let mut list = CompletionList::new();
        VariableProvider.provide(&ctx, &mut list);
        assert!(list.is_empty());
    }
}
