//! Terminal capability discovery.
//!
//! Runs once per process from the environment and the tty state of the
//! standard streams; the result is an immutable record consulted by the
//! renderer, the input decoder, and the raw-mode guard. Active probing
//! (cursor query round-trip) is deliberately left to the session code,
//! which owns the file descriptors.

use std::os::fd::RawFd;

/// How many colors the terminal accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ColorLevel {
    None,
    Ansi16,
    Ansi256,
    TrueColor,
}

/// How the editor should drive the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractiveMode {
    /// Not interactive (dumb terminal, redirected streams).
    None,
    /// A plain tty.
    Native,
    /// An editor-embedded terminal recognized by signature; full features
    /// even when stdin reports non-tty.
    Enhanced,
    /// Running under tmux or GNU screen.
    Multiplexed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub color: ColorLevel,
    pub supports_cursor_query: bool,
    pub supports_bracketed_paste: bool,
    pub supports_mouse: bool,
    pub supports_focus: bool,
    pub supports_alt_screen: bool,
    pub is_multiplexer: bool,
    pub preferred_mode: InteractiveMode,
    /// Multiplexers and remote sessions answer queries slowly; stretch the
    /// cursor-query timeout for them.
    pub slow_response: bool,
}

/// Environment snapshot feeding the probe, separable for tests.
#[derive(Debug, Default, Clone)]
pub struct ProbeInput {
    pub term: Option<String>,
    pub term_program: Option<String>,
    pub colorterm: Option<String>,
    pub iterm_session: Option<String>,
    pub tmux: Option<String>,
    pub sty: Option<String>,
    pub ssh_connection: Option<String>,
    pub stdin_tty: bool,
    pub stdout_tty: bool,
    pub stderr_tty: bool,
}

impl ProbeInput {
    pub fn from_environment() -> Self {
        Self {
            term: std::env::var("TERM").ok(),
            term_program: std::env::var("TERM_PROGRAM").ok(),
            colorterm: std::env::var("COLORTERM").ok(),
            iterm_session: std::env::var("ITERM_SESSION_ID").ok(),
            tmux: std::env::var("TMUX").ok(),
            sty: std::env::var("STY").ok(),
            ssh_connection: std::env::var("SSH_CONNECTION").ok(),
            stdin_tty: is_tty(libc::STDIN_FILENO),
            stdout_tty: is_tty(libc::STDOUT_FILENO),
            stderr_tty: is_tty(libc::STDERR_FILENO),
        }
    }
}

fn is_tty(fd: RawFd) -> bool {
    unsafe { libc::isatty(fd) != 0 }
}

/// Terminal programs embedded in editors: interactive even when stdin is
/// not reported as a tty (their pty plumbing confuses isatty).
const EMBEDDED_SIGNATURES: &[&str] = &["vscode", "zed", "jetbrains", "jedi"];

const DUMB_TERMS: &[&str] = &["dumb", "cons25", "emacs"];

impl Capabilities {
    /// Probe from the live environment.
    pub fn probe() -> Self {
        Self::from_input(&ProbeInput::from_environment())
    }

    pub fn from_input(input: &ProbeInput) -> Self {
        let term = input.term.as_deref().unwrap_or("");
        let term_lower = term.to_ascii_lowercase();
        let program_lower = input
            .term_program
            .as_deref()
            .unwrap_or("")
            .to_ascii_lowercase();

        let dumb = term.is_empty() || DUMB_TERMS.iter().any(|d| term_lower == *d);
        let is_multiplexer = input.tmux.is_some() || input.sty.is_some();
        let embedded = EMBEDDED_SIGNATURES
            .iter()
            .any(|sig| program_lower.contains(sig));

        let preferred_mode = if dumb && !embedded {
            InteractiveMode::None
        } else if embedded {
            InteractiveMode::Enhanced
        } else if !input.stdin_tty || !input.stdout_tty {
            InteractiveMode::None
        } else if is_multiplexer {
            InteractiveMode::Multiplexed
        } else {
            InteractiveMode::Native
        };

        let interactive = preferred_mode != InteractiveMode::None;

        let colorterm = input.colorterm.as_deref().unwrap_or("");
        let color = if !interactive {
            ColorLevel::None
        } else if colorterm.contains("truecolor")
            || colorterm.contains("24bit")
            || input.iterm_session.is_some()
        {
            ColorLevel::TrueColor
        } else if term_lower.contains("256color") || is_multiplexer {
            ColorLevel::Ansi256
        } else {
            ColorLevel::Ansi16
        };

        let alt_screen = interactive
            && ["xterm", "screen", "tmux", "rxvt", "alacritty", "st", "foot", "kitty"]
                .iter()
                .any(|p| term_lower.starts_with(p));

        Self {
            color,
            supports_cursor_query: interactive && input.stdin_tty,
            supports_bracketed_paste: interactive,
            supports_mouse: interactive && !is_multiplexer,
            supports_focus: interactive && !is_multiplexer,
            supports_alt_screen: alt_screen,
            is_multiplexer,
            preferred_mode,
            slow_response: is_multiplexer || input.ssh_connection.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tty_input() -> ProbeInput {
        ProbeInput {
            term: Some("xterm-256color".into()),
            stdin_tty: true,
            stdout_tty: true,
            stderr_tty: true,
            ..Default::default()
        }
    }

    #[test]
    fn plain_xterm_is_native_256() {
        let caps = Capabilities::from_input(&tty_input());
        assert_eq!(caps.preferred_mode, InteractiveMode::Native);
        assert_eq!(caps.color, ColorLevel::Ansi256);
        assert!(caps.supports_cursor_query);
        assert!(caps.supports_bracketed_paste);
        assert!(!caps.slow_response);
    }

    #[test]
    fn dumb_term_disables_everything() {
        let input = ProbeInput {
            term: Some("dumb".into()),
            stdin_tty: true,
            stdout_tty: true,
            ..Default::default()
        };
        let caps = Capabilities::from_input(&input);
        assert_eq!(caps.preferred_mode, InteractiveMode::None);
        assert_eq!(caps.color, ColorLevel::None);
        assert!(!caps.supports_cursor_query);
    }

    #[test]
    fn tmux_is_multiplexed_and_slow() {
        let mut input = tty_input();
        input.tmux = Some("/tmp/tmux-0/default,123,0".into());
        let caps = Capabilities::from_input(&input);
        assert_eq!(caps.preferred_mode, InteractiveMode::Multiplexed);
        assert!(caps.is_multiplexer);
        assert!(caps.slow_response);
    }

    #[test]
    fn embedded_terminal_is_enhanced_without_tty() {
        let input = ProbeInput {
            term: Some("xterm-256color".into()),
            term_program: Some("vscode".into()),
            stdin_tty: false,
            stdout_tty: true,
            ..Default::default()
        };
        let caps = Capabilities::from_input(&input);
        assert_eq!(caps.preferred_mode, InteractiveMode::Enhanced);
        // No stdin tty: the cursor query round-trip cannot work.
        assert!(!caps.supports_cursor_query);
    }

    #[test]
    fn truecolor_via_colorterm() {
        let mut input = tty_input();
        input.colorterm = Some("truecolor".into());
        let caps = Capabilities::from_input(&input);
        assert_eq!(caps.color, ColorLevel::TrueColor);
    }

    #[test]
    fn redirected_output_is_not_interactive() {
        let mut input = tty_input();
        input.stdout_tty = false;
        let caps = Capabilities::from_input(&input);
        assert_eq!(caps.preferred_mode, InteractiveMode::None);
    }
}
