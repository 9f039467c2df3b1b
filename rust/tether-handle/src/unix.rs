//! Unix backing: file descriptors, closed via libc.

use std::os::fd::RawFd;

pub(crate) fn close(fd: RawFd) {
    // EBADF here means a bookkeeping bug upstream, but close is called
    // from Drop and must not panic.
    unsafe { libc::close(fd) };
}
