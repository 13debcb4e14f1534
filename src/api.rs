//! The caller-facing read/write surface: `read`, `write`, `write2` and the
//! zero-copy `buffer_checkout`/`buffer_send`/`buffer_free` trio.
//!
//! Everything here is a thin layer over [`crate::packet`], [`crate::pool`]
//! and [`crate::registry`] — it only builds the right [`Packet`] shape,
//! enqueues it, and gives the flush engine a chance to drain immediately so
//! small writes don't wait for the next reactor tick.

use std::os::unix::io::RawFd;

use nix::errno::Errno;

use crate::config::Config;
use crate::error::{is_transient, SockError, SockResult};
use crate::flush::flush;
use crate::packet::{Closer, Dealloc, Packet};
use crate::pool::PacketPool;
use crate::registry::Registry;
use crate::uuid::Uuid;

/// The three physical shapes `write2` can send, collapsing the original's
/// `buffer` + `move` + `is_fd` + `dealloc` flag quartet into one tagged
/// union — there is no way to construct an ill-formed combination (e.g.
/// `is_fd` with a `dealloc` meant for memory).
pub enum WriteSource<'a> {
    /// Bytes copied into pooled inline packets; the caller's slice is not
    /// retained past this call.
    Copy(&'a [u8]),
    /// A caller-owned buffer moved into the queue without copying.
    /// `dealloc`, if given, runs once when the packet is released, in
    /// addition to the buffer's own `Drop`.
    Owned { data: Box<[u8]>, dealloc: Option<Dealloc> },
    /// A byte range of a file descriptor, read and forwarded one chunk at a
    /// time. `closer`, if given, replaces the default "close the fd".
    File { fd: RawFd, closer: Option<Closer> },
}

/// Options for [`write2`]. `offset`/`length` carve out the window of
/// `source` to send; `urgent` requests front-of-queue insertion per the
/// ordering rule in §5 of the design (ahead of a packet that hasn't started
/// transmitting, behind one that has).
pub struct Write2Options<'a> {
    pub source: WriteSource<'a>,
    pub offset: i64,
    pub length: usize,
    pub urgent: bool,
}

impl<'a> Write2Options<'a> {
    pub fn copy(data: &'a [u8]) -> Write2Options<'a> {
        Write2Options { source: WriteSource::Copy(data), offset: 0, length: data.len(), urgent: false }
    }

    pub fn owned(data: Box<[u8]>) -> Write2Options<'static> {
        let length = data.len();
        Write2Options { source: WriteSource::Owned { data, dealloc: None }, offset: 0, length, urgent: false }
    }

    pub fn file(fd: RawFd, length: usize) -> Write2Options<'static> {
        Write2Options { source: WriteSource::File { fd, closer: None }, offset: 0, length, urgent: false }
    }

    pub fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_dealloc(mut self, dealloc: Dealloc) -> Self {
        if let WriteSource::Owned { dealloc: slot, .. } = &mut self.source {
            *slot = Some(dealloc);
        }
        self
    }

    pub fn with_closer(mut self, closer: Closer) -> Self {
        if let WriteSource::File { closer: slot, .. } = &mut self.source {
            *slot = Some(closer);
        }
        self
    }
}

/// Queue a plain inline copy of `data`, chunked across pooled packets if it
/// doesn't fit a single payload area, then give it an immediate chance to
/// flush.
pub fn write(
    uuid: Uuid,
    data: &[u8],
    registry: &Registry,
    pool: &PacketPool,
    config: &Config,
) -> SockResult<()> {
    write2(uuid, Write2Options::copy(data), registry, pool, config)
}

/// The general write entry point: see [`Write2Options`] for the source
/// variants and [`WriteSource`] for how `move`/`is_fd`/`dealloc` collapse
/// into one union.
pub fn write2(
    uuid: Uuid,
    opts: Write2Options,
    registry: &Registry,
    pool: &PacketPool,
    config: &Config,
) -> SockResult<()> {
    if opts.offset < 0 {
        release_unqueued(opts.source);
        return Err(SockError::Range);
    }

    let packets = match opts.source {
        WriteSource::Copy(data) => {
            let start = opts.offset as usize;
            let end = start.checked_add(opts.length).filter(|&e| e <= data.len());
            let Some(end) = end else {
                return Err(SockError::Range);
            };
            chunk_copy(&data[start..end], config)
        }
        WriteSource::Owned { data, dealloc } => {
            let start = opts.offset as usize;
            let end = start.checked_add(opts.length).filter(|&e| e <= data.len());
            let Some(end) = end else {
                drop(dealloc.map(|d| d()));
                return Err(SockError::Range);
            };
            vec![Box::new(Packet::external_ranged(data, start, end, dealloc))]
        }
        WriteSource::File { fd, closer } => {
            vec![Box::new(Packet::file(fd, opts.offset, opts.length, config.file_read_size, closer))]
        }
    };

    if !registry.is_valid(uuid) {
        for p in packets {
            pool.release(p);
        }
        return Err(SockError::BadFd);
    }

    for (i, packet) in packets.into_iter().enumerate() {
        // Only the first chunk of a multi-packet copy honours `urgent`;
        // the rest must follow it in order.
        if !registry.enqueue(uuid, packet, opts.urgent && i == 0) {
            return Err(SockError::BadFd);
        }
    }

    flush(uuid, registry, pool, config)
}

/// Split a copy write across as many pooled-size inline packets as needed.
fn chunk_copy(data: &[u8], config: &Config) -> Vec<Box<Packet>> {
    if data.is_empty() {
        return vec![Box::new(Packet::inline(config.packet_size, &[]))];
    }
    data.chunks(config.packet_size)
        .map(|chunk| Box::new(Packet::inline(config.packet_size, chunk)))
        .collect()
}

/// Release a source that was rejected before ever reaching a queue, so a
/// move/file write's dealloc/closer still runs exactly once per §7.
fn release_unqueued(source: WriteSource) {
    match source {
        WriteSource::Copy(_) => {}
        WriteSource::Owned { dealloc, .. } => {
            if let Some(d) = dealloc {
                d();
            }
        }
        WriteSource::File { fd, closer } => match closer {
            Some(c) => c(fd),
            None => {
                let _ = nix::unistd::close(fd);
            }
        },
    }
}

/// A packet checked out directly from the pool for the caller to fill
/// in-place, avoiding the copy `write` performs. Must be handed to
/// [`buffer_send`] or released with [`buffer_free`] — dropping it silently
/// would leak it out of the pool's accounting.
pub struct CheckedOutBuffer(Box<Packet>);

impl CheckedOutBuffer {
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut *self.0 {
            Packet::Inline { buf, .. } => buf,
            _ => unreachable!("checkout always hands out an Inline packet"),
        }
    }

    pub fn capacity(&self) -> usize {
        self.as_ref_slice().len()
    }

    fn as_ref_slice(&self) -> &[u8] {
        match &*self.0 {
            Packet::Inline { buf, .. } => buf,
            _ => unreachable!("checkout always hands out an Inline packet"),
        }
    }
}

/// Check out a pooled buffer for the caller to fill directly, falling back
/// to `flush_all` backpressure (see [`PacketPool::grab`]) if the pool is
/// exhausted.
pub fn buffer_checkout(registry: &Registry, pool: &PacketPool, config: &Config) -> CheckedOutBuffer {
    let packet = pool.grab(|| crate::flush::flush_all(registry, pool, config, registry_fds(registry)));
    CheckedOutBuffer(packet)
}

/// Queue a buffer previously obtained from [`buffer_checkout`], marking only
/// its first `length` bytes as live, then attempt an immediate flush.
pub fn buffer_send(
    uuid: Uuid,
    mut buffer: CheckedOutBuffer,
    length: usize,
    urgent: bool,
    registry: &Registry,
    pool: &PacketPool,
    config: &Config,
) -> SockResult<()> {
    let cap = buffer.capacity();
    if let Packet::Inline { length: len, .. } = &mut *buffer.0 {
        *len = length.min(cap);
    }
    if !registry.enqueue(uuid, buffer.0, urgent) {
        return Err(SockError::BadFd);
    }
    flush(uuid, registry, pool, config)
}

/// Discard a buffer obtained from [`buffer_checkout`] without sending it.
pub fn buffer_free(buffer: CheckedOutBuffer, pool: &PacketPool) {
    pool.release(buffer.0);
}

/// Read bytes off a connection through its installed hook. Transient errors
/// (`EAGAIN`, ...) surface as `Ok(0)`; fatal errors force-close the
/// connection and propagate.
pub fn read(
    uuid: Uuid,
    buf: &mut [u8],
    registry: &Registry,
    pool: &PacketPool,
) -> SockResult<usize> {
    let Some(fd) = registry.validate(uuid) else {
        return Err(SockError::BadFd);
    };
    let result = registry.with_entry(uuid, |entry| -> Result<usize, Errno> {
        let n = entry.hooks.read(uuid, fd, buf);
        if n >= 0 {
            Ok(n as usize)
        } else {
            let errno = Errno::from_raw(-n as i32);
            if is_transient(errno) {
                Ok(0)
            } else {
                Err(errno)
            }
        }
    });
    match result {
        None => Err(SockError::BadFd),
        Some(Ok(n)) => Ok(n),
        Some(Err(errno)) => {
            crate::lifecycle::force_close(uuid, registry, pool);
            Err(SockError::Fatal(std::io::Error::from(errno)))
        }
    }
}

fn registry_fds(registry: &Registry) -> impl Iterator<Item = RawFd> + '_ {
    (0..registry.capacity() as RawFd).filter(move |&fd| registry.fd2uuid(fd) != crate::uuid::INVALID_UUID)
}
