//! The three packet kinds a connection's write queue can hold, and the
//! write-pipeline logic shared by all of them.
//!
//! The original payload-area-as-raw-bytes design (one fixed buffer reused
//! across three C-union interpretations) becomes a closed Rust `enum`: each
//! variant carries exactly the typed fields it needs, and the compiler
//! guarantees the "fixed payload area" sizing constraint from the data
//! model without any manual byte-layout bookkeeping.

use std::os::unix::io::RawFd;

use nix::sys::uio::pread;

use crate::hooks::IoHooks;
use crate::uuid::Uuid;

/// A custom release callback for an externally-owned buffer, called exactly
/// once when the packet finishes transmission or is discarded.
pub type Dealloc = Box<dyn FnOnce() + Send>;

/// A custom release callback for a file-segment source descriptor.
pub type Closer = Box<dyn FnOnce(RawFd) + Send>;

/// One entry in a connection's write queue.
pub enum Packet {
    /// Bytes copied into the pool's own payload area.
    Inline { buf: Box<[u8]>, length: usize, sent: usize },

    /// A caller-owned buffer referenced without copying. `start`/`end` carve
    /// out the `offset`/`length` window `write2` was asked to send, so a
    /// caller can hand over a larger allocation than it wants transmitted.
    External { data: Box<[u8]>, start: usize, end: usize, sent: usize, dealloc: Option<Dealloc> },

    /// A byte range of a file descriptor, read into a scratch buffer and
    /// forwarded through the hook table one chunk at a time.
    File {
        fd: RawFd,
        offset: i64,
        length: usize,
        sent: usize,
        scratch: Box<[u8]>,
        closer: Option<Closer>,
    },
}

impl Packet {
    pub fn inline(payload_size: usize, data: &[u8]) -> Packet {
        let mut buf = vec![0u8; payload_size].into_boxed_slice();
        let length = data.len().min(payload_size);
        buf[..length].copy_from_slice(&data[..length]);
        Packet::Inline { buf, length, sent: 0 }
    }

    pub fn external(data: Box<[u8]>, dealloc: Option<Dealloc>) -> Packet {
        let end = data.len();
        Packet::External { data, start: 0, end, sent: 0, dealloc }
    }

    /// Like [`Packet::external`], but sending only the `start..end` window
    /// of `data` rather than the whole buffer.
    pub fn external_ranged(data: Box<[u8]>, start: usize, end: usize, dealloc: Option<Dealloc>) -> Packet {
        let end = end.min(data.len());
        Packet::External { data, start, end, sent: 0, dealloc }
    }

    pub fn file(fd: RawFd, offset: i64, length: usize, scratch_size: usize, closer: Option<Closer>) -> Packet {
        Packet::File {
            fd,
            offset,
            length,
            sent: 0,
            scratch: vec![0u8; scratch_size].into_boxed_slice(),
            closer,
        }
    }

    /// An empty inline packet, used both as the pool's pre-allocated shape
    /// and as the neutral state a released packet is reset to.
    pub fn empty(payload_size: usize) -> Packet {
        Packet::Inline { buf: vec![0u8; payload_size].into_boxed_slice(), length: 0, sent: 0 }
    }

    pub fn length(&self) -> usize {
        match self {
            Packet::Inline { length, .. } => *length,
            Packet::External { start, end, .. } => end - start,
            Packet::File { length, .. } => *length,
        }
    }

    pub fn sent(&self) -> usize {
        match self {
            Packet::Inline { sent, .. } => *sent,
            Packet::External { sent, .. } => *sent,
            Packet::File { sent, .. } => *sent,
        }
    }

    pub fn is_drained(&self) -> bool {
        self.sent() >= self.length()
    }

    /// One write-pipeline iteration: compute the current window, hand it to
    /// the hook table, advance `sent`. Returns the hook-style raw result
    /// (bytes written, or `-errno`), so callers reuse the same transient /
    /// fatal classification as a direct syscall.
    pub fn write_once(&mut self, uuid: Uuid, fd: RawFd, hooks: &dyn IoHooks, file_read_size: usize) -> isize {
        match self {
            Packet::Inline { buf, length, sent } => {
                let window = &buf[*sent..*length];
                let n = hooks.write(uuid, fd, window);
                if n > 0 {
                    *sent += n as usize;
                }
                n
            }
            Packet::External { data, start, end, sent, .. } => {
                let window = &data[*start + *sent..*end];
                let n = hooks.write(uuid, fd, window);
                if n > 0 {
                    *sent += n as usize;
                }
                n
            }
            Packet::File { fd: src_fd, offset, length, sent, scratch, .. } => {
                let remaining = *length - *sent;
                if remaining == 0 {
                    return 0;
                }
                let chunk = remaining.min(file_read_size).min(scratch.len());
                match pread(*src_fd, &mut scratch[..chunk], *offset + *sent as i64) {
                    Ok(0) => 0,
                    Ok(read_n) => {
                        let n = hooks.write(uuid, fd, &scratch[..read_n]);
                        if n > 0 {
                            *sent += n as usize;
                        }
                        n
                    }
                    Err(e) => -(e as i32 as isize),
                }
            }
        }
    }

    /// Invoke this packet's release function, then reset it to the neutral
    /// inline state so the same allocation can be recycled by the pool.
    pub fn release(&mut self, payload_size: usize) {
        match std::mem::replace(self, Packet::empty(0)) {
            Packet::Inline { .. } => {}
            Packet::External { dealloc, .. } => {
                if let Some(d) = dealloc {
                    d();
                }
            }
            Packet::File { fd, closer, .. } => match closer {
                Some(c) => c(fd),
                None => {
                    let _ = nix::unistd::close(fd);
                }
            },
        }
        *self = Packet::empty(payload_size);
    }
}
