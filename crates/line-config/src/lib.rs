//! Runtime configuration parsed from `shline.toml`.
//!
//! Discovery order: an explicit path from the caller, `./shline.toml`, then
//! `<config dir>/shline/shline.toml`. A missing file yields defaults;
//! unknown fields are tolerated so older binaries accept newer files.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// When to emit color escape sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorChoice {
    /// Follow the capability probe.
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistorySection {
    pub max_entries: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self { max_entries: 1000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UndoSection {
    pub max_actions: usize,
    pub merge_timeout_ms: u64,
}

impl Default for UndoSection {
    fn default() -> Self {
        Self {
            max_actions: 100,
            merge_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputSection {
    /// Wait for escape-sequence continuation bytes, in milliseconds.
    pub escape_timeout_ms: u64,
    /// Wait for a cursor-position report, in milliseconds.
    pub query_timeout_ms: u64,
}

impl Default for InputSection {
    fn default() -> Self {
        Self {
            escape_timeout_ms: 50,
            query_timeout_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DisplaySection {
    pub color: ColorChoice,
    /// Audible bell on rejected input (empty completion, failed search).
    pub bell: bool,
}

/// Parsed file contents with defaults filled in.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub history: HistorySection,
    pub undo: UndoSection,
    pub input: InputSection,
    pub display: DisplaySection,
}

impl Config {
    pub fn escape_timeout(&self) -> Duration {
        Duration::from_millis(self.input.escape_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.input.query_timeout_ms)
    }

    pub fn undo_merge_timeout(&self) -> Duration {
        Duration::from_millis(self.undo.merge_timeout_ms)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(target: "config", path = %path.display(), "loaded");
        Ok(config)
    }

    /// Discover and load the configuration, falling back to defaults when
    /// no file exists.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        for candidate in Self::candidates() {
            if candidate.is_file() {
                return Self::load_from(&candidate);
            }
        }
        debug!(target: "config", "no config file, using defaults");
        Ok(Self::default())
    }

    fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("shline.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("shline").join("shline.toml"));
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let c = Config::default();
        assert_eq!(c.history.max_entries, 1000);
        assert_eq!(c.undo.max_actions, 100);
        assert_eq!(c.escape_timeout(), Duration::from_millis(50));
        assert_eq!(c.query_timeout(), Duration::from_millis(100));
        assert_eq!(c.display.color, ColorChoice::Auto);
    }

    #[test]
    fn parses_partial_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[undo]\nmax_actions = 500").unwrap();
        let c = Config::load_from(f.path()).unwrap();
        assert_eq!(c.undo.max_actions, 500);
        assert_eq!(c.undo.merge_timeout_ms, 1000); // untouched default
        assert_eq!(c.history.max_entries, 1000);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[future]\nshiny = true\n[display]\nbell = true").unwrap();
        let c = Config::load_from(f.path()).unwrap();
        assert!(c.display.bell);
    }

    #[test]
    fn color_choice_parses_lowercase() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[display]\ncolor = \"never\"").unwrap();
        let c = Config::load_from(f.path()).unwrap();
        assert_eq!(c.display.color, ColorChoice::Never);
    }

    #[test]
    fn missing_file_is_an_error_when_explicit() {
        let err = Config::load_from(Path::new("/nonexistent/shline.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
