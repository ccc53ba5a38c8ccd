//! Terminal ownership: raw-mode lifecycle, batched output, size tracking,
//! and the cursor-position query.
//!
//! The guard saves the termios state on acquisition and restores it on
//! every exit path. Process-fatal signals restore through an
//! async-signal-safe handler and re-raise; SIGWINCH only sets a flag that
//! the editor drains at the top of its tick.

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::termios::{self, ControlFlags, InputFlags, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use std::io;
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Once, OnceLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace, warn};

pub mod capabilities;
pub mod escape;

pub use capabilities::{Capabilities, ColorLevel, InteractiveMode, ProbeInput};

#[derive(Debug, Error)]
pub enum TermError {
    #[error("stdin is not a terminal")]
    NotATty,
    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("terminal did not answer within the timeout")]
    Timeout,
}

impl From<nix::errno::Errno> for TermError {
    fn from(errno: nix::errno::Errno) -> Self {
        TermError::Io(io::Error::from_raw_os_error(errno as i32))
    }
}

// ---------------------------------------------------------------------------
// Signal plumbing
// ---------------------------------------------------------------------------

static WINCH_PENDING: AtomicBool = AtomicBool::new(false);
static SAVED_TERMIOS: OnceLock<libc::termios> = OnceLock::new();
static INSTALL_HANDLERS: Once = Once::new();

extern "C" fn on_sigwinch(_: libc::c_int) {
    WINCH_PENDING.store(true, Ordering::Relaxed);
}

/// Restore the terminal and re-raise with the default disposition. Only
/// async-signal-safe calls are made here.
extern "C" fn on_fatal_signal(sig: libc::c_int) {
    if let Some(saved) = SAVED_TERMIOS.get() {
        unsafe {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSAFLUSH, saved);
        }
    }
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
        libc::raise(sig);
    }
}

fn install_signal_handlers() {
    INSTALL_HANDLERS.call_once(|| {
        // No SA_RESTART: a resize must wake blocking reads with EINTR.
        let winch = SigAction::new(
            SigHandler::Handler(on_sigwinch),
            SaFlags::empty(),
            SigSet::empty(),
        );
        let fatal = SigAction::new(
            SigHandler::Handler(on_fatal_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        unsafe {
            if let Err(err) = signal::sigaction(Signal::SIGWINCH, &winch) {
                warn!(target: "terminal", %err, "sigwinch_handler_install_failed");
            }
            for sig in [Signal::SIGTERM, Signal::SIGQUIT, Signal::SIGHUP] {
                if let Err(err) = signal::sigaction(sig, &fatal) {
                    warn!(target: "terminal", ?sig, %err, "fatal_handler_install_failed");
                }
            }
        }
    });
}

/// Consume the pending-resize flag.
pub fn take_resize_flag() -> bool {
    WINCH_PENDING.swap(false, Ordering::Relaxed)
}

/// Peek at the pending-resize flag without consuming it.
pub fn resize_pending() -> bool {
    WINCH_PENDING.load(Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Raw mode
// ---------------------------------------------------------------------------

/// Scoped raw-mode acquisition. Restores the saved attributes (and turns
/// bracketed paste back off) when dropped, on success and failure alike.
pub struct RawModeGuard {
    saved: Termios,
    bracketed_paste: bool,
}

impl RawModeGuard {
    pub fn acquire(caps: &Capabilities) -> Result<Self, TermError> {
        let stdin = io::stdin();
        let stdin_tty = unsafe { libc::isatty(libc::STDIN_FILENO) != 0 };
        if !stdin_tty && caps.preferred_mode != InteractiveMode::Enhanced {
            return Err(TermError::NotATty);
        }

        let saved = termios::tcgetattr(stdin.as_fd())?;

        // Snapshot for the fatal-signal restore path before any handler can
        // fire.
        let mut raw_saved: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(libc::STDIN_FILENO, &mut raw_saved) } == 0 {
            let _ = SAVED_TERMIOS.set(raw_saved);
        }
        install_signal_handlers();

        let mut raw = saved.clone();
        raw.input_flags &= !(InputFlags::BRKINT
            | InputFlags::ICRNL
            | InputFlags::INPCK
            | InputFlags::ISTRIP
            | InputFlags::IXON);
        raw.control_flags |= ControlFlags::CS8;
        raw.local_flags &=
            !(LocalFlags::ECHO | LocalFlags::ICANON | LocalFlags::IEXTEN | LocalFlags::ISIG);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(stdin.as_fd(), SetArg::TCSADRAIN, &raw)?;

        let bracketed_paste = caps.supports_bracketed_paste;
        if bracketed_paste {
            if let Err(err) = write_all_retry(libc::STDOUT_FILENO, escape::BRACKETED_PASTE_ON) {
                debug!(target: "terminal", %err, "bracketed_paste_enable_failed");
            }
        }
        debug!(target: "terminal", bracketed_paste, "raw_mode_acquired");
        Ok(Self {
            saved,
            bracketed_paste,
        })
    }

    /// Restore the saved attributes. Also called by drop; explicit calls
    /// let the caller observe errors.
    pub fn restore(&self) -> Result<(), TermError> {
        if self.bracketed_paste {
            let _ = write_all_retry(libc::STDOUT_FILENO, escape::BRACKETED_PASTE_OFF);
        }
        termios::tcsetattr(io::stdin().as_fd(), SetArg::TCSADRAIN, &self.saved)?;
        debug!(target: "terminal", "raw_mode_restored");
        Ok(())
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Where render output goes. The live terminal batches and writes to
/// stdout; tests capture into memory.
pub trait TermSink {
    fn write_bytes(&mut self, bytes: &[u8]);
    fn flush(&mut self) -> Result<(), TermError>;

    /// Current (columns, rows) when the sink knows them; capture sinks
    /// return `None` and callers keep their configured geometry.
    fn dimensions(&mut self) -> Option<(u16, u16)> {
        None
    }
}

/// Capture sink for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub bytes: Vec<u8>,
}

impl TermSink for MemorySink {
    fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    fn flush(&mut self) -> Result<(), TermError> {
        Ok(())
    }
}

/// The live terminal: output batch, cached size, cursor query.
#[derive(Debug, Default)]
pub struct Terminal {
    batch: Vec<u8>,
    size: Option<(u16, u16)>,
}

impl Terminal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns and rows, cached between resize signals.
    pub fn size(&mut self) -> (u16, u16) {
        if take_resize_flag() {
            self.size = None;
        }
        match self.size {
            Some(wh) => wh,
            None => {
                let wh = probe_winsize();
                self.size = Some(wh);
                trace!(target: "terminal", cols = wh.0, rows = wh.1, "size_probed");
                wh
            }
        }
    }

    pub fn invalidate_size(&mut self) {
        self.size = None;
    }

    /// Ask the terminal where the cursor is (`ESC [ 6 n`). Returns 1-based
    /// (row, col). A quiet terminal yields [`TermError::Timeout`]; callers
    /// must have a query-free fallback.
    pub fn query_cursor_position(&mut self, timeout: Duration) -> Result<(u16, u16), TermError> {
        self.write_bytes(escape::CURSOR_QUERY);
        self.flush()?;

        let deadline = Instant::now() + timeout;
        let mut response = Vec::with_capacity(16);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(target: "terminal", "cursor_query_timeout");
                return Err(TermError::Timeout);
            }
            if !poll_stdin(remaining)? {
                warn!(target: "terminal", "cursor_query_timeout");
                return Err(TermError::Timeout);
            }
            let mut byte = [0u8; 1];
            let n = read_retry(libc::STDIN_FILENO, &mut byte)?;
            if n == 0 {
                return Err(TermError::Io(io::ErrorKind::UnexpectedEof.into()));
            }
            response.push(byte[0]);
            if byte[0] == b'R' {
                return parse_cursor_report(&response)
                    .ok_or_else(|| TermError::Io(io::ErrorKind::InvalidData.into()));
            }
            if response.len() > 32 {
                return Err(TermError::Io(io::ErrorKind::InvalidData.into()));
            }
        }
    }
}

impl TermSink for Terminal {
    fn write_bytes(&mut self, bytes: &[u8]) {
        self.batch.extend_from_slice(bytes);
    }

    fn flush(&mut self) -> Result<(), TermError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let result = write_all_retry(libc::STDOUT_FILENO, &self.batch);
        self.batch.clear();
        result
    }

    fn dimensions(&mut self) -> Option<(u16, u16)> {
        Some(self.size())
    }
}

/// Parse `ESC [ row ; col R`. Leading noise before the final `ESC [` is
/// ignored (type-ahead can precede the report).
pub fn parse_cursor_report(bytes: &[u8]) -> Option<(u16, u16)> {
    let s = std::str::from_utf8(bytes).ok()?;
    let start = s.rfind("\x1b[")?;
    let body = s[start + 2..].strip_suffix('R')?;
    let (row, col) = body.split_once(';')?;
    Some((row.parse().ok()?, col.parse().ok()?))
}

/// Wait for readable stdin. True when input is available, false on timeout.
fn poll_stdin(timeout: Duration) -> Result<bool, TermError> {
    let stdin = io::stdin();
    let ms = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    loop {
        let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(ms)) {
            Ok(0) => return Ok(false),
            Ok(_) => return Ok(true),
            Err(nix::errno::Errno::EINTR) => {
                if resize_pending() {
                    return Ok(false);
                }
            }
            Err(errno) => return Err(errno.into()),
        }
    }
}

fn read_retry(fd: libc::c_int, buf: &mut [u8]) -> Result<usize, TermError> {
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(TermError::Io(err));
        }
        if resize_pending() {
            // Let the caller drain the resize instead of blocking again.
            return Ok(0);
        }
    }
}

/// Write the whole buffer, retrying short writes and EINTR.
fn write_all_retry(fd: libc::c_int, buf: &[u8]) -> Result<(), TermError> {
    let mut written = 0;
    while written < buf.len() {
        let n = unsafe {
            libc::write(
                fd,
                buf[written..].as_ptr().cast(),
                buf.len() - written,
            )
        };
        if n >= 0 {
            written += n as usize;
            continue;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(TermError::Io(err));
        }
    }
    Ok(())
}

fn probe_winsize() -> (u16, u16) {
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) };
    if rc == 0 && ws.ws_col > 0 && ws.ws_row > 0 {
        (ws.ws_col, ws.ws_row)
    } else {
        (80, 24)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_report_parses() {
        assert_eq!(parse_cursor_report(b"\x1b[12;40R"), Some((12, 40)));
        assert_eq!(parse_cursor_report(b"\x1b[1;1R"), Some((1, 1)));
    }

    #[test]
    fn cursor_report_skips_leading_noise() {
        assert_eq!(parse_cursor_report(b"ab\x1b[3;7R"), Some((3, 7)));
    }

    #[test]
    fn cursor_report_rejects_garbage() {
        assert_eq!(parse_cursor_report(b"\x1b[12R"), None);
        assert_eq!(parse_cursor_report(b"12;40R"), None);
        assert_eq!(parse_cursor_report(b""), None);
    }

    #[test]
    fn memory_sink_accumulates() {
        let mut sink = MemorySink::default();
        sink.write_bytes(b"ab");
        sink.write_bytes(b"c");
        sink.flush().unwrap();
        assert_eq!(sink.bytes, b"abc");
    }

    #[test]
    fn resize_flag_is_consumed_once() {
        WINCH_PENDING.store(true, Ordering::Relaxed);
        assert!(take_resize_flag());
        assert!(!take_resize_flag());
    }
}
