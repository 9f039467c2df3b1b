//! Owned OS handle primitives for the tether transport layer.
//!
//! [`OsHandle`] is the unit of currency for every handle-carrying
//! operation above it: one raw OS handle (file descriptor on unix,
//! HANDLE on windows), owned exclusively, moved and never copied. The
//! raw value is stored widened to `i64` so a handle can round-trip
//! through the 64-bit wire encoding on either platform.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(windows)]
pub use windows::{duplicate_from_process, duplicate_to_process};

use std::fmt;
use std::mem;

#[cfg(unix)]
use std::os::fd::RawFd;

const RAW_INVALID: i64 = -1;

/// Sole owner of one raw OS handle.
///
/// The handle is closed on drop. Transfer is by move: [`take`] empties
/// the source, [`into_raw`] releases ownership without closing (the
/// value then belongs to whoever receives it).
///
/// [`take`]: OsHandle::take
/// [`into_raw`]: OsHandle::into_raw
pub struct OsHandle {
    raw: i64,
}

impl OsHandle {
    /// An empty box; owns nothing, closes nothing.
    pub const fn invalid() -> Self {
        OsHandle { raw: RAW_INVALID }
    }

    /// Adopt a raw handle value. The new box owns it and will close it.
    pub fn from_raw(raw: i64) -> Self {
        OsHandle { raw }
    }

    /// Adopt a raw file descriptor.
    #[cfg(unix)]
    pub fn from_raw_fd(fd: RawFd) -> Self {
        OsHandle { raw: fd as i64 }
    }

    /// The underlying descriptor, still owned by this box.
    #[cfg(unix)]
    pub fn as_raw_fd(&self) -> RawFd {
        self.raw as RawFd
    }

    /// The raw value, ownership untouched.
    pub fn raw(&self) -> i64 {
        self.raw
    }

    /// Adopt a handle value received off the wire.
    pub fn from_wire_value(value: u64) -> Self {
        OsHandle { raw: value as i64 }
    }

    /// Release ownership and yield the 64-bit wire encoding. The handle
    /// is not closed; the receiver of the value now owns it.
    pub fn into_wire_value(self) -> u64 {
        self.into_raw() as u64
    }

    /// Whether this box holds a live handle.
    #[cfg(unix)]
    pub fn is_valid(&self) -> bool {
        self.raw >= 0
    }

    /// Whether this box holds a live handle.
    #[cfg(windows)]
    pub fn is_valid(&self) -> bool {
        self.raw != 0 && self.raw != RAW_INVALID
    }

    /// Move the handle out, leaving this box empty.
    pub fn take(&mut self) -> OsHandle {
        mem::replace(self, OsHandle::invalid())
    }

    /// Release ownership without closing and return the raw value.
    pub fn into_raw(mut self) -> i64 {
        mem::replace(&mut self.raw, RAW_INVALID)
    }
}

impl Drop for OsHandle {
    fn drop(&mut self) {
        if self.is_valid() {
            sys_close(self.raw);
        }
    }
}

impl fmt::Debug for OsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "OsHandle({})", self.raw)
        } else {
            write!(f, "OsHandle(invalid)")
        }
    }
}

#[cfg(unix)]
fn sys_close(raw: i64) {
    unix::close(raw as RawFd);
}

#[cfg(windows)]
fn sys_close(raw: i64) {
    windows::close(raw);
}

/// The current process's identity, as the relay layer names processes.
pub fn current_pid() -> u32 {
    std::process::id()
}
