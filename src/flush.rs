//! Drains a connection's write queue through its installed hooks.
//!
//! `flush` is the only place packets actually move bytes; `write`/`write2`
//! merely enqueue. Keeping the two separate lets a burst of queued writes
//! coalesce into however many `flush` calls the caller's event loop can
//! afford.

use crate::config::Config;
use crate::error::{is_transient, SockError, SockResult};
use crate::lifecycle::force_close;
use crate::packet::Packet;
use crate::pool::PacketPool;
use crate::registry::Registry;
use crate::uuid::Uuid;
use nix::errno::Errno;

/// Push the transport's internal buffer, then drive the head packet's
/// writer until it stalls or the queue empties.
///
/// On a fatal error the connection is force-closed and the error is
/// returned; transient errors end the call cleanly with `Ok(())` so the
/// caller can retry on the next readiness notification.
pub fn flush(uuid: Uuid, registry: &Registry, pool: &PacketPool, config: &Config) -> SockResult<()> {
    let Some(fd) = registry.validate(uuid) else {
        return Err(SockError::BadFd);
    };

    // Packets fully drained below are stashed here rather than released to
    // the pool immediately, so the pool lock is never taken while this
    // connection's entry lock (held for the duration of `with_entry`) is
    // still held — see §A/§5's lock-ordering invariant.
    let mut drained: Vec<Box<Packet>> = Vec::new();
    let drain_result = registry.with_entry(uuid, |entry| -> Result<bool, Errno> {
        loop {
            let ret = entry.hooks.flush(uuid, fd);
            if ret == 0 {
                break;
            }
            if ret < 0 {
                let errno = Errno::from_raw(-ret as i32);
                if is_transient(errno) {
                    log::trace!(target: "sockflow::flush", "uuid {uuid}: transient error from hook.flush ({errno}), retrying later");
                    return Ok(false);
                }
                return Err(errno);
            }
        }

        while let Some(head) = entry.queue.front_mut() {
            let ret = head.write_once(uuid, fd, entry.hooks.as_ref(), config.file_read_size);
            if ret < 0 {
                let errno = Errno::from_raw(-ret as i32);
                if is_transient(errno) {
                    log::trace!(target: "sockflow::flush", "uuid {uuid}: transient error mid-packet ({errno}), retrying later");
                    return Ok(false);
                }
                return Err(errno);
            }
            if ret == 0 {
                return Ok(false);
            }
            if head.is_drained() {
                let done = entry.queue.pop_front().expect("front was just read");
                drained.push(done);
            }
        }
        Ok(entry.queue.is_empty() && !entry.error)
    });

    for packet in drained {
        pool.release(packet);
    }

    match drain_result {
        None => Err(SockError::BadFd),
        Some(Err(errno)) => {
            log::warn!(target: "sockflow::flush", "uuid {uuid}: fatal I/O error ({errno}), forcing close");
            force_close(uuid, registry, pool);
            Err(SockError::Fatal(std::io::Error::from(errno)))
        }
        Some(Ok(fully_drained)) => {
            if fully_drained {
                let should_close = registry.with_entry(uuid, |entry| entry.close_pending && entry.queue.is_empty());
                if should_close == Some(true) {
                    force_close(uuid, registry, pool);
                }
            }
            Ok(())
        }
    }
}

/// Flush every connection that currently has data queued. Used by the pool
/// to relieve backpressure and by an embedding reactor's idle pulse.
pub fn flush_all(registry: &Registry, pool: &PacketPool, config: &Config, fds: impl Iterator<Item = i32>) {
    for fd in fds {
        let uuid = registry.fd2uuid(fd);
        if registry.has_pending(uuid) {
            let _ = flush(uuid, registry, pool, config);
        }
    }
}

/// Busy-loop `flush` until the connection closes or the queue drains
/// without error. Intended for shutdown paths, not the hot path.
pub fn flush_strong(uuid: Uuid, registry: &Registry, pool: &PacketPool, config: &Config) {
    loop {
        if !registry.is_valid(uuid) {
            return;
        }
        match flush(uuid, registry, pool, config) {
            Ok(()) => {
                if !registry.has_pending(uuid) {
                    return;
                }
            }
            Err(_) => return,
        }
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{default_hooks, IoHooks};
    use crate::packet::Packet;
    use std::os::fd::AsRawFd;
    use std::os::unix::io::RawFd;

    #[test]
    fn flush_drains_an_inline_packet_over_a_pipe() {
        let registry = Registry::new(16);
        let pool = PacketPool::new(4, 64);
        let config = Config::DEFAULT;
        let (r, w) = nix::unistd::pipe().unwrap();
        let fd: RawFd = w.as_raw_fd();
        let uuid = registry.install(fd, &pool);
        registry
            .with_entry(uuid, |e| e.queue.push_back(Box::new(Packet::inline(64, b"ping"))))
            .unwrap();

        flush(uuid, &registry, &pool, &config).unwrap();
        assert!(!registry.has_pending(uuid));

        let mut buf = [0u8; 4];
        nix::unistd::read(r.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        std::mem::forget(w);
    }

    #[test]
    fn fatal_hook_error_force_closes_connection() {
        struct Poison;
        impl IoHooks for Poison {
            fn read(&self, _: Uuid, _: RawFd, _: &mut [u8]) -> isize {
                0
            }
            fn write(&self, _: Uuid, _: RawFd, _: &[u8]) -> isize {
                -(nix::errno::Errno::EPIPE as i32 as isize)
            }
        }

        let registry = Registry::new(16);
        let pool = PacketPool::new(4, 64);
        let config = Config::DEFAULT;
        let (r, w) = nix::unistd::pipe().unwrap();
        let fd: RawFd = w.as_raw_fd();
        let uuid = registry.install(fd, &pool);
        registry
            .with_entry(uuid, |e| {
                e.hooks = std::sync::Arc::new(Poison);
                e.queue.push_back(Box::new(Packet::inline(64, b"x")));
            })
            .unwrap();

        assert!(flush(uuid, &registry, &pool, &config).is_err());
        assert!(!registry.is_valid(uuid));
        drop(default_hooks());
        std::mem::forget(r);
        std::mem::forget(w);
    }
}
