//! Windows backing: kernel handles, closed and duplicated via Win32.
//!
//! Handle values are process-relative integers on Windows, so moving one
//! to another process means duplicating it into that process's handle
//! table. The target is identified by pid and opened on demand; the
//! source handle is consumed by the duplication.

use std::io;

use windows_sys::Win32::Foundation::{
    CloseHandle, DuplicateHandle, DUPLICATE_CLOSE_SOURCE, DUPLICATE_SAME_ACCESS, HANDLE,
};
use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcess, PROCESS_DUP_HANDLE};

use crate::OsHandle;

pub(crate) fn close(raw: i64) {
    unsafe { CloseHandle(raw as usize as HANDLE) };
}

struct ProcessHandle(HANDLE);

impl ProcessHandle {
    fn open(pid: u32) -> io::Result<Self> {
        let handle = unsafe { OpenProcess(PROCESS_DUP_HANDLE, 0, pid) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(ProcessHandle(handle))
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

/// Duplicate `handle` into the process identified by `target_pid`,
/// closing the local source, and return the value as it reads in the
/// target's handle table.
pub fn duplicate_to_process(handle: OsHandle, target_pid: u32) -> io::Result<u64> {
    let target = ProcessHandle::open(target_pid)?;
    let mut duplicated: HANDLE = std::ptr::null_mut();
    let ok = unsafe {
        DuplicateHandle(
            GetCurrentProcess(),
            handle.into_raw() as usize as HANDLE,
            target.0,
            &mut duplicated,
            0,
            0,
            DUPLICATE_SAME_ACCESS | DUPLICATE_CLOSE_SOURCE,
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(duplicated as usize as u64)
}

/// Duplicate a handle value out of the process identified by
/// `source_pid` into our own handle table, closing the remote source.
pub fn duplicate_from_process(value: u64, source_pid: u32) -> io::Result<OsHandle> {
    let source = ProcessHandle::open(source_pid)?;
    let mut duplicated: HANDLE = std::ptr::null_mut();
    let ok = unsafe {
        DuplicateHandle(
            source.0,
            value as usize as HANDLE,
            GetCurrentProcess(),
            &mut duplicated,
            0,
            0,
            DUPLICATE_SAME_ACCESS | DUPLICATE_CLOSE_SOURCE,
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(OsHandle::from_raw(duplicated as usize as i64))
}
