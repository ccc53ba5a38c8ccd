//! The editor controller: modal state machine, key dispatch, and the
//! blocking `read_line` surface the shell calls.
//!
//! One `Editor` lives for the whole shell process and owns the pieces that
//! outlive a single line (history, kill ring, completion providers,
//! capabilities). Each `read_line` call builds a `Session` that owns the
//! per-line state (buffer, undo log, display, overlay mode) and runs the
//! tick loop until the line is submitted, interrupted, or the stream ends.

use line_config::{ColorChoice, Config};
use line_history::History;
use line_input::{Decoder, InputError, TtySource};
use line_render::Geometry;
use line_state::KillRing;
use line_terminal::{
    escape, Capabilities, ColorLevel, InteractiveMode, RawModeGuard, TermError, TermSink,
    Terminal,
};
use thiserror::Error;
use tracing::{debug, info};

mod complete;
mod observer;
mod search;
mod session;

pub use observer::StateObserver;
pub use session::Session;

/// What a finished edit session hands back to the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Enter: the composed command.
    Submitted(String),
    /// Ctrl-C: the line was discarded.
    Interrupted,
    /// Ctrl-D on an empty buffer, or the input stream closed.
    Eof,
}

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("terminal error: {0}")]
    Terminal(#[from] TermError),
    #[error("input error: {0}")]
    Input(#[from] InputError),
    #[error("buffer error: {0}")]
    Buffer(#[from] line_text::BufferError),
    #[error("standard streams are not interactive")]
    NotInteractive,
}

pub struct Editor {
    config: Config,
    caps: Capabilities,
    history: History,
    kill_ring: KillRing,
    engine: line_complete::CompletionEngine,
    terminal: Terminal,
}

impl Editor {
    /// Probe capabilities once and build the editor.
    pub fn new(config: Config) -> Self {
        let caps = Capabilities::probe();
        Self::with_capabilities(config, caps)
    }

    pub fn with_capabilities(config: Config, caps: Capabilities) -> Self {
        info!(target: "editor", ?caps, "editor_created");
        let history = History::new(config.history.max_entries);
        Self {
            config,
            caps,
            history,
            kill_ring: KillRing::new(),
            engine: line_complete::CompletionEngine::new(),
            terminal: Terminal::new(),
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    fn color_level(&self) -> ColorLevel {
        match self.config.display.color {
            ColorChoice::Never => ColorLevel::None,
            ColorChoice::Always if self.caps.color == ColorLevel::None => ColorLevel::Ansi16,
            _ => self.caps.color,
        }
    }

    /// Own the terminal until the user finishes one line.
    ///
    /// `last_exit_status` is carried into the session for diagnostics; the
    /// shell composes it into the prompt if it wants it shown.
    pub fn read_line(
        &mut self,
        prompt: &str,
        last_exit_status: i32,
    ) -> Result<ReadOutcome, EditorError> {
        if self.caps.preferred_mode == InteractiveMode::None {
            return Err(EditorError::NotInteractive);
        }
        let guard = RawModeGuard::acquire(&self.caps)?;
        let (width, height) = self.terminal.size();
        let geometry = Geometry::new(width, height, prompt);

        // Anchor the prompt origin once per session; everything after runs
        // query-free. A silent terminal just leaves the origin unknown.
        let origin = if self.caps.supports_cursor_query {
            let timeout = if self.caps.slow_response {
                self.config.query_timeout() * 2
            } else {
                self.config.query_timeout()
            };
            match self.terminal.query_cursor_position(timeout) {
                Ok(pos) => Some(pos),
                Err(TermError::Timeout) => {
                    debug!(target: "editor", "cursor_query_unavailable");
                    None
                }
                Err(err) => return Err(err.into()),
            }
        } else {
            None
        };
        // A leftover partial line would skew every wrap computation; step
        // to a fresh line and account for it in the anchored origin.
        let origin_row = origin.map(|(row, col)| {
            if col > 1 {
                self.terminal.write_bytes(escape::NEWLINE);
                // On the bottom row the newline scrolls instead of moving.
                row.saturating_add(1).min(height)
            } else {
                row
            }
        });

        let decoder = Decoder::new(
            TtySource::new(),
            self.config.escape_timeout(),
            self.caps.supports_bracketed_paste,
        );
        let color = self.color_level();
        let outcome = {
            let mut session = Session::new(
                decoder,
                &mut self.terminal,
                &mut self.history,
                &mut self.kill_ring,
                &self.engine,
                &self.config,
                prompt,
                geometry,
                color,
                last_exit_status,
            );
            if let Some(row) = origin_row {
                session.set_origin_row(row);
            }
            session.run()
        };

        // Leave the cursor on a fresh line below the content and restore
        // cooked mode before the shell takes over.
        self.terminal.write_bytes(escape::NEWLINE);
        let flush_result = self.terminal.flush();
        drop(guard);
        flush_result?;
        let outcome = outcome?;

        if let ReadOutcome::Submitted(command) = &outcome {
            self.history.add(command);
        }
        debug!(target: "editor", ?outcome, "read_line_done");
        Ok(outcome)
    }

    /// Drive one session from a scripted byte stream into `sink`, without
    /// touching the real terminal. This is the contract the integration
    /// tests (and any embedding without a tty) exercise.
    pub fn read_line_scripted(
        &mut self,
        prompt: &str,
        script: &[u8],
        sink: &mut dyn TermSink,
        width: u16,
        height: u16,
    ) -> Result<ReadOutcome, EditorError> {
        let decoder = Decoder::new(
            line_input::ScriptSource::new(script),
            self.config.escape_timeout(),
            true,
        );
        let geometry = Geometry::new(width, height, prompt);
        let color = self.color_level();
        let outcome = {
            let mut session = Session::new(
                decoder,
                sink,
                &mut self.history,
                &mut self.kill_ring,
                &self.engine,
                &self.config,
                prompt,
                geometry,
                color,
                0,
            );
            session.run()?
        };
        if let ReadOutcome::Submitted(command) = &outcome {
            self.history.add(command);
        }
        Ok(outcome)
    }
}

impl std::fmt::Debug for Editor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("caps", &self.caps)
            .field("history_len", &self.history.len())
            .finish()
    }
}

/// A fatal error leaves a one-line message for the shell to print after
/// the terminal is restored; never a stack trace on the user's screen.
pub fn describe_fatal(err: &EditorError) -> String {
    match err {
        EditorError::Terminal(e) => format!("shline: terminal failure: {e}"),
        EditorError::Input(e) => format!("shline: input failure: {e}"),
        EditorError::Buffer(e) => format!("shline: internal buffer fault: {e}"),
        EditorError::NotInteractive => "shline: standard streams are not interactive".to_string(),
    }
}
