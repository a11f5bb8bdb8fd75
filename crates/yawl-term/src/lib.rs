// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
//! Portable terminal compatibility layer.
//!
//! Direct termios syscalls rather than shelling out to `stty`: fewer
//! processes and signal-safe.  Raw mode is a scoped resource — every entry
//! pairs with a restore on drop, so no exit path can leave the terminal raw.

use std::io::Read;

#[cfg(unix)]
use std::os::unix::io::RawFd;

/// Saved-and-restored raw mode.  `Drop` restores the original termios state,
/// covering early returns and unwinds.
#[cfg(unix)]
pub struct RawModeGuard {
    fd: RawFd,
    saved: libc::termios,
}

#[cfg(unix)]
impl RawModeGuard {
    /// Switch `fd` (a tty) into raw mode, remembering the previous state.
    pub fn enter(fd: RawFd) -> std::io::Result<Self> {
        let mut saved: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut saved) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        let mut raw = saved;
        unsafe { libc::cfmakeraw(&mut raw) };
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self { fd, saved })
    }
}

#[cfg(unix)]
impl Drop for RawModeGuard {
    fn drop(&mut self) {
        unsafe {
            libc::tcsetattr(self.fd, libc::TCSANOW, &self.saved);
        }
    }
}

/// Force the terminal back to sane cooked mode (echo + canonical input).
/// Used before spawning detached children and from signal-exit paths where
/// the guard's saved state is unavailable.
#[cfg(unix)]
pub fn reset_cooked(fd: RawFd) -> std::io::Result<()> {
    let mut t: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut t) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    t.c_lflag |= libc::ICANON | libc::ECHO | libc::ISIG;
    t.c_iflag |= libc::ICRNL;
    t.c_oflag |= libc::OPOST;
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &t) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Terminal size as (columns, rows), when `fd` is a tty.
#[cfg(unix)]
pub fn terminal_size(fd: RawFd) -> Option<(u16, u16)> {
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    let ok = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws) } == 0;
    (ok && ws.ws_col > 0 && ws.ws_row > 0).then_some((ws.ws_col, ws.ws_row))
}

/// Whether `fd` refers to a terminal.
#[cfg(unix)]
pub fn is_tty(fd: RawFd) -> bool {
    unsafe { libc::isatty(fd) != 0 }
}

/// UTF-8-aware reader over a byte source: buffers partial sequences across
/// reads and yields complete scalar values.  An invalid byte yields U+FFFD
/// and resynchronizes, so garbage input cannot wedge the reader.
pub struct Utf8Reader<R: Read> {
    inner: R,
    pending: [u8; 4],
    pending_len: usize,
}

impl<R: Read> Utf8Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: [0u8; 4],
            pending_len: 0,
        }
    }

    /// Next complete character, or `None` at end of input.
    pub fn next_char(&mut self) -> std::io::Result<Option<char>> {
        loop {
            if self.pending_len > 0 {
                let want = utf8_sequence_len(self.pending[0]);
                match want {
                    None => {
                        // Invalid lead byte: emit a replacement and shift.
                        self.shift(1);
                        return Ok(Some(char::REPLACEMENT_CHARACTER));
                    }
                    Some(want) if self.pending_len >= want => {
                        match std::str::from_utf8(&self.pending[..want]) {
                            Ok(s) => {
                                let c = s.chars().next().unwrap_or(char::REPLACEMENT_CHARACTER);
                                self.shift(want);
                                return Ok(Some(c));
                            }
                            Err(_) => {
                                self.shift(1);
                                return Ok(Some(char::REPLACEMENT_CHARACTER));
                            }
                        }
                    }
                    Some(_) => {}
                }
            }
            let mut byte = [0u8; 1];
            match self.inner.read(&mut byte)? {
                0 => {
                    if self.pending_len > 0 {
                        // Truncated trailing sequence.
                        self.pending_len = 0;
                        return Ok(Some(char::REPLACEMENT_CHARACTER));
                    }
                    return Ok(None);
                }
                _ => {
                    self.pending[self.pending_len] = byte[0];
                    self.pending_len += 1;
                }
            }
        }
    }

    fn shift(&mut self, n: usize) {
        self.pending.copy_within(n..self.pending_len, 0);
        self.pending_len -= n;
    }
}

/// Expected sequence length from a UTF-8 lead byte; `None` for a byte that
/// cannot start a sequence.
fn utf8_sequence_len(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7F => Some(1),
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
