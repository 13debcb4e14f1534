//! Pluggable read/write/flush hooks, so a transport layer (TLS, a test
//! double, a rate limiter) can interpose on a connection's raw bytes.
//!
//! The C-shaped "four function pointers, missing ones filled with defaults"
//! table becomes a single trait with default methods: a hook set that only
//! implements `read`/`write` gets the no-op `flush`/`on_clear` for free.

use std::os::unix::io::RawFd;
use std::sync::Arc;

use nix::errno::Errno;
use nix::unistd;

use crate::uuid::Uuid;

/// Transport-level hooks installed on a connection.
///
/// `read`/`write` return the number of bytes moved, or a negative value on
/// error (the caller maps it through [`crate::error::is_transient`]).
/// `flush` returns `>0` while bytes remain buffered in the transport, `0`
/// once it has nothing left to push, and a negative value on fatal error.
pub trait IoHooks: Send + Sync {
    fn read(&self, uuid: Uuid, fd: RawFd, buf: &mut [u8]) -> isize;

    fn write(&self, uuid: Uuid, fd: RawFd, buf: &[u8]) -> isize;

    /// Push any bytes the transport is still holding internally.
    fn flush(&self, _uuid: Uuid, _fd: RawFd) -> isize {
        0
    }

    /// Release hook-local state right before a UUID expires.
    fn on_clear(&self, _uuid: Uuid) {}
}

/// The direct-syscall hook set every fresh connection starts with.
#[derive(Debug, Default)]
pub struct DefaultHooks;

impl IoHooks for DefaultHooks {
    fn read(&self, _uuid: Uuid, fd: RawFd, buf: &mut [u8]) -> isize {
        match unistd::read(fd, buf) {
            Ok(n) => n as isize,
            Err(e) => -(e as i32 as isize),
        }
    }

    fn write(&self, _uuid: Uuid, fd: RawFd, buf: &[u8]) -> isize {
        match unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, buf) {
            Ok(n) => n as isize,
            Err(e) => -(e as i32 as isize),
        }
    }
}

/// A shared handle to an installed hook table.
pub type HookHandle = Arc<dyn IoHooks>;

/// The table every connection entry is cleared to before installation.
pub fn default_hooks() -> HookHandle {
    Arc::new(DefaultHooks)
}

/// Translate a raw `isize` return from a hook into an [`Errno`] for
/// negative results, mirroring the C convention of `-errno`.
pub fn hook_errno(ret: isize) -> Option<Errno> {
    if ret >= 0 {
        None
    } else {
        Some(Errno::from_raw(-ret as i32))
    }
}
