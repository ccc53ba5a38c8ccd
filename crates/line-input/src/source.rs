//! Byte sources feeding the decoder: the live tty and a scripted source
//! for tests.

use crate::InputError;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::collections::VecDeque;
use std::io;
use std::os::fd::AsFd;
use std::time::Duration;

/// Outcome of a blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEvent {
    Byte(u8),
    /// End of stream (fd closed).
    Eof,
    /// A window-size change interrupted the read.
    Resize,
}

pub trait ByteSource {
    /// Block until one byte arrives.
    fn next_byte(&mut self) -> Result<SourceEvent, InputError>;

    /// Read one byte if it arrives within `timeout`; `None` on timeout.
    fn next_byte_within(&mut self, timeout: Duration) -> Result<Option<u8>, InputError>;
}

/// The interactive source: raw reads on stdin, waking for SIGWINCH.
#[derive(Debug, Default)]
pub struct TtySource;

impl TtySource {
    pub fn new() -> Self {
        Self
    }

    fn read_one(&self) -> Result<SourceEvent, InputError> {
        let mut byte = [0u8; 1];
        loop {
            let n = unsafe { libc::read(libc::STDIN_FILENO, byte.as_mut_ptr().cast(), 1) };
            if n == 1 {
                return Ok(SourceEvent::Byte(byte[0]));
            }
            if n == 0 {
                return Ok(SourceEvent::Eof);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(InputError::Io(err));
            }
            if line_terminal::resize_pending() {
                return Ok(SourceEvent::Resize);
            }
        }
    }

    /// True when stdin is readable within `timeout`.
    fn wait_readable(&self, timeout: Duration) -> Result<bool, InputError> {
        let stdin = io::stdin();
        let ms = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        loop {
            let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(ms)) {
                Ok(0) => return Ok(false),
                Ok(_) => return Ok(true),
                Err(nix::errno::Errno::EINTR) => {
                    if line_terminal::resize_pending() {
                        return Ok(false);
                    }
                }
                Err(errno) => {
                    return Err(InputError::Io(io::Error::from_raw_os_error(errno as i32)))
                }
            }
        }
    }
}

impl ByteSource for TtySource {
    fn next_byte(&mut self) -> Result<SourceEvent, InputError> {
        // Resize may already be pending from between ticks.
        if line_terminal::resize_pending() {
            return Ok(SourceEvent::Resize);
        }
        self.read_one()
    }

    fn next_byte_within(&mut self, timeout: Duration) -> Result<Option<u8>, InputError> {
        if !self.wait_readable(timeout)? {
            return Ok(None);
        }
        match self.read_one()? {
            SourceEvent::Byte(b) => Ok(Some(b)),
            _ => Ok(None),
        }
    }
}

/// Scripted byte stream for tests: yields the bytes in order, then EOF.
#[derive(Debug, Default)]
pub struct ScriptSource {
    bytes: VecDeque<u8>,
}

impl ScriptSource {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.iter().copied().collect(),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.bytes.extend(bytes.iter().copied());
    }
}

impl ByteSource for ScriptSource {
    fn next_byte(&mut self) -> Result<SourceEvent, InputError> {
        Ok(match self.bytes.pop_front() {
            Some(b) => SourceEvent::Byte(b),
            None => SourceEvent::Eof,
        })
    }

    fn next_byte_within(&mut self, _timeout: Duration) -> Result<Option<u8>, InputError> {
        Ok(self.bytes.pop_front())
    }
}
