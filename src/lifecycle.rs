//! Connection lifecycle: `listen`, `accept`, `connect`, `open`, `close`,
//! `force_close`.
//!
//! Every descriptor this module hands out is always non-blocking before it
//! is installed in the registry — the write pipeline and flush engine never
//! expect a call to park.

use std::net::SocketAddr;
use std::os::fd::IntoRawFd;
use std::os::unix::io::RawFd;

use nix::sys::socket::{
    accept4, bind, connect, listen as nix_listen, setsockopt, socket, sockopt, AddressFamily, Backlog, SockFlag,
    SockType, SockaddrStorage,
};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::{shutdown, Shutdown};
use nix::unistd::close;

use crate::config::Config;
use crate::dns::{self, DnsError};
use crate::flush::flush;
use crate::pool::PacketPool;
use crate::reactor::{reactor_on_close, reactor_remove};
use crate::registry::Registry;
use crate::uuid::Uuid;

fn family_of(addr: &SocketAddr) -> AddressFamily {
    match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    }
}

/// Resolve passively, bind to every resolved address in order (at least one
/// must succeed), and begin listening with the platform's maximum backlog.
pub fn listen(host: &str, port: u16, registry: &Registry, pool: &PacketPool) -> Result<Uuid, DnsError> {
    let addrs = dns::resolve(host, port)?;
    for addr in &addrs {
        let Ok(fd) = socket(family_of(addr), SockType::Stream, SockFlag::SOCK_NONBLOCK, None) else {
            continue;
        };
        let _ = setsockopt(&fd, sockopt::ReuseAddr, &true);
        let storage: SockaddrStorage = (*addr).into();
        if bind(&fd, &storage).is_err() {
            continue;
        }
        if nix_listen(&fd, Backlog::MAXCONN).is_err() {
            continue;
        }
        let raw = fd.into_raw_fd();
        let uuid = registry.install(raw, pool);
        log::info!(target: "sockflow::lifecycle", "listening on {addr} (fd {raw}, uuid {uuid})");
        return Ok(uuid);
    }
    log::warn!(target: "sockflow::lifecycle", "listen({host}:{port}) failed on every resolved address");
    Err(DnsError::LookupFailed)
}

/// Accept one pending connection on a listening socket previously returned
/// by [`listen`].
pub fn accept(srv_uuid: Uuid, registry: &Registry, pool: &PacketPool) -> Option<Uuid> {
    let fd = registry.validate(srv_uuid)?;
    let accepted = accept4(fd, SockFlag::SOCK_NONBLOCK).ok()?;
    let uuid = registry.install(accepted, pool);
    log::debug!(target: "sockflow::lifecycle", "accepted fd {accepted} on listener {srv_uuid} (uuid {uuid})");
    Some(uuid)
}

/// Resolve actively and initiate a non-blocking connect. `EINPROGRESS` is
/// treated as success; any other failure closes the socket and returns
/// `None`.
pub fn connect_to(host: &str, port: u16, registry: &Registry, pool: &PacketPool) -> Option<Uuid> {
    let addrs = dns::resolve(host, port).ok()?;
    let addr = addrs.first()?;
    let fd = socket(family_of(addr), SockType::Stream, SockFlag::SOCK_NONBLOCK, None).ok()?;
    let storage: SockaddrStorage = (*addr).into();
    match connect(&fd, &storage) {
        Ok(()) => {}
        Err(nix::errno::Errno::EINPROGRESS) => {}
        Err(e) => {
            log::debug!(target: "sockflow::lifecycle", "connect to {addr} failed: {e}");
            return None;
        }
    }
    let uuid = registry.install(fd.into_raw_fd(), pool);
    log::debug!(target: "sockflow::lifecycle", "connecting to {addr} (uuid {uuid})");
    Some(uuid)
}

/// Adopt an externally created descriptor: equivalent to a fresh clear with
/// `open = true`. Does not itself clear `O_NONBLOCK` — callers that did not
/// create `fd` through [`listen`]/[`accept`]/[`connect_to`] should call
/// [`set_non_block`] first.
pub fn open(fd: RawFd, registry: &Registry, pool: &PacketPool) -> Uuid {
    registry.install(fd, pool)
}

/// Explicitly set a descriptor non-blocking via `fcntl`, for the cases
/// where the platform has no atomic `accept4`/`SOCK_NONBLOCK` equivalent and
/// for descriptors adopted through [`open`].
pub fn set_non_block(fd: RawFd) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Request a graceful close: mark close-pending and give the queue one
/// chance to drain via `flush`. If the queue is already empty, this closes
/// the connection immediately.
pub fn close_conn(uuid: Uuid, registry: &Registry, pool: &PacketPool, config: &Config) {
    let marked = registry.with_entry(uuid, |e| e.close_pending = true);
    if marked.is_none() {
        return;
    }
    let _ = flush(uuid, registry, pool, config);
}

/// Unconditionally tear down a connection: shutdown both directions, close
/// the descriptor, clear its registry slot, and notify the reactor.
pub fn force_close(uuid: Uuid, registry: &Registry, pool: &PacketPool) {
    let Some(fd) = registry.validate(uuid) else {
        return;
    };
    log::debug!(target: "sockflow::lifecycle", "force-closing uuid {uuid} (fd {fd})");
    reactor_remove(uuid);
    let _ = shutdown(fd, Shutdown::Both);
    let _ = close(fd);
    registry.clear(fd, false, pool);
    reactor_on_close(uuid);
}

pub fn is_valid(uuid: Uuid, registry: &Registry) -> bool {
    registry.is_valid(uuid)
}

pub fn has_pending(uuid: Uuid, registry: &Registry) -> bool {
    registry.has_pending(uuid)
}

pub fn fd2uuid(fd: RawFd, registry: &Registry) -> Uuid {
    registry.fd2uuid(fd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_accept_connect_loopback_round_trip() {
        let registry = Registry::new(16);
        let pool = PacketPool::new(4, 64);
        let srv = listen("127.0.0.1", 0, &registry, &pool).unwrap();
        assert!(registry.is_valid(srv));

        let local = {
            let fd = registry.validate(srv).unwrap();
            nix::sys::socket::getsockname::<nix::sys::socket::SockaddrIn>(fd).unwrap()
        };
        let port = local.port();

        let client = connect_to("127.0.0.1", port, &registry, &pool);
        assert!(client.is_some());

        std::thread::sleep(std::time::Duration::from_millis(20));
        let server_side = accept(srv, &registry, &pool);
        assert!(server_side.is_some());
    }

    #[test]
    fn force_close_invalidates_uuid() {
        let registry = Registry::new(16);
        let pool = PacketPool::new(4, 64);
        let srv = listen("127.0.0.1", 0, &registry, &pool).unwrap();
        force_close(srv, &registry, &pool);
        assert!(!registry.is_valid(srv));
    }

    #[test]
    fn set_non_block_sets_the_flag_on_a_blocking_fd() {
        use std::os::fd::AsRawFd;
        let (r, w) = nix::unistd::pipe().unwrap();
        let fd = r.as_raw_fd();
        let before = fcntl(fd, FcntlArg::F_GETFL).unwrap();
        assert!(!OFlag::from_bits_truncate(before).contains(OFlag::O_NONBLOCK));
        set_non_block(fd).unwrap();
        let after = fcntl(fd, FcntlArg::F_GETFL).unwrap();
        assert!(OFlag::from_bits_truncate(after).contains(OFlag::O_NONBLOCK));
        std::mem::forget(w);
    }
}
