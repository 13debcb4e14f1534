//! Error vocabulary shared across the registry, pool and flush engine.

use std::io;

use nix::errno::Errno;

/// Failure modes surfaced to callers of the public API.
#[derive(Debug, thiserror::Error)]
pub enum SockError {
    /// The supplied uuid does not decode to a descriptor currently tracked
    /// by the registry, or its generation is stale.
    #[error("bad connection handle")]
    BadFd,

    /// A length or offset argument fell outside what the operation accepts.
    #[error("argument out of range")]
    Range,

    /// A non-transient OS error occurred; the connection has been closed.
    #[error("fatal I/O error: {0}")]
    Fatal(#[source] io::Error),

    /// The packet pool and its heap overflow are both exhausted.
    #[error("packet pool exhausted")]
    Exhausted,
}

impl SockError {
    /// Wrap a raw `errno` classifying it as transient or [`SockError::Fatal`].
    ///
    /// Transient errors (`EAGAIN`/`EWOULDBLOCK`/`EINTR`/`ENOTCONN`) are not
    /// represented as a [`SockError`] at all — callers should retry. This
    /// returns `None` for those so the call site can match on it directly.
    pub fn from_errno(errno: Errno) -> Option<SockError> {
        if is_transient(errno) {
            None
        } else {
            Some(SockError::Fatal(io::Error::from(errno)))
        }
    }
}

/// Errno values that mean "try again", not "the connection is broken".
pub fn is_transient(errno: Errno) -> bool {
    matches!(
        errno,
        Errno::EAGAIN | Errno::EWOULDBLOCK | Errno::EINTR | Errno::ENOTCONN
    )
}

pub type SockResult<T> = Result<T, SockError>;
