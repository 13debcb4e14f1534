//! `sockflow`: a user-land non-blocking stream-socket I/O core.
//!
//! Sits directly above the stream-socket syscalls and provides UUID-guarded
//! connection identity, a per-connection outbound packet queue decoupled
//! from kernel flush progress, zero-copy handoff of memory and file
//! regions as queued write units, and a pluggable read/write hook table so
//! a transport layer (TLS, a rate limiter, a test double) can be inserted
//! without the caller's code changing.
//!
//! The registry and packet pool are process-wide singletons, lazily
//! initialised on first use — call [`configure`] before touching any other
//! entry point if the defaults in [`Config::DEFAULT`] don't fit.
//!
//! ```no_run
//! let srv = sockflow::listen("127.0.0.1", 9000).unwrap();
//! let client = sockflow::accept(srv).unwrap();
//! sockflow::write(client, b"hello").unwrap();
//! sockflow::flush(client).unwrap();
//! ```

pub mod api;
pub mod capacity;
pub mod config;
pub mod dns;
pub mod error;
pub mod flush;
pub mod hooks;
pub mod lifecycle;
pub mod packet;
pub mod pool;
pub mod reactor;
pub mod registry;
pub mod spinlock;
pub mod uuid;

use std::os::unix::io::RawFd;
use std::sync::OnceLock;

use once_cell::sync::Lazy;

pub use api::{buffer_checkout, buffer_free, buffer_send, CheckedOutBuffer, Write2Options, WriteSource};
pub use config::Config;
pub use error::{SockError, SockResult};
pub use hooks::{HookHandle, IoHooks};
pub use packet::{Closer, Dealloc};
pub use reactor::Reactor;
pub use uuid::{Uuid, INVALID_UUID};

static CONFIG: OnceLock<Config> = OnceLock::new();

static REGISTRY: Lazy<registry::Registry> = Lazy::new(|| registry::Registry::new(config().min_registry_capacity));

static POOL: Lazy<pool::PacketPool> = Lazy::new(|| pool::PacketPool::new(config().packet_pool, config().packet_size));

/// Override the process-wide tunables. Must be called before the first call
/// to any other entry point in this crate (the registry and pool are
/// lazily built from whatever `Config` is current at their first use).
/// Returns `Err` if called more than once.
pub fn configure(cfg: Config) -> Result<(), &'static str> {
    cfg.validate()?;
    CONFIG.set(cfg).map_err(|_| "sockflow::configure called more than once")
}

/// The tunables currently in effect: whatever [`configure`] installed, or
/// [`Config::DEFAULT`] if it was never called.
pub fn config() -> Config {
    *CONFIG.get_or_init(|| Config::DEFAULT)
}

/// Install the process-wide reactor collaborator (readiness/close
/// notifications, timeout touch). See [`reactor::install`].
pub fn install_reactor(reactor: std::sync::Arc<dyn Reactor>) {
    reactor::install(reactor);
}

/// Resolve passively and start listening; see [`lifecycle::listen`].
pub fn listen(host: &str, port: u16) -> Result<Uuid, dns::DnsError> {
    lifecycle::listen(host, port, &REGISTRY, &POOL)
}

/// Accept one pending connection on a listening socket's UUID.
pub fn accept(srv_uuid: Uuid) -> Option<Uuid> {
    lifecycle::accept(srv_uuid, &REGISTRY, &POOL)
}

/// Resolve actively and initiate a non-blocking connect.
pub fn connect(host: &str, port: u16) -> Option<Uuid> {
    lifecycle::connect_to(host, port, &REGISTRY, &POOL)
}

/// Adopt an externally created descriptor.
pub fn open(fd: RawFd) -> Uuid {
    lifecycle::open(fd, &REGISTRY, &POOL)
}

/// Explicitly set a descriptor non-blocking via `fcntl`.
pub fn set_non_block(fd: RawFd) -> nix::Result<()> {
    lifecycle::set_non_block(fd)
}

pub fn is_valid(uuid: Uuid) -> bool {
    lifecycle::is_valid(uuid, &REGISTRY)
}

pub fn has_pending(uuid: Uuid) -> bool {
    lifecycle::has_pending(uuid, &REGISTRY)
}

pub fn fd2uuid(fd: RawFd) -> Uuid {
    lifecycle::fd2uuid(fd, &REGISTRY)
}

/// Request a graceful close: the queue gets one chance to drain, then the
/// connection is torn down.
pub fn close(uuid: Uuid) {
    lifecycle::close_conn(uuid, &REGISTRY, &POOL, &config())
}

/// Unconditionally tear down a connection, bypassing any queued writes.
pub fn force_close(uuid: Uuid) {
    lifecycle::force_close(uuid, &REGISTRY, &POOL)
}

/// Read bytes off a connection through its installed hook.
pub fn read(uuid: Uuid, buf: &mut [u8]) -> SockResult<usize> {
    api::read(uuid, buf, &REGISTRY, &POOL)
}

/// Queue an inline copy write and give it an immediate chance to flush.
pub fn write(uuid: Uuid, data: &[u8]) -> SockResult<()> {
    api::write(uuid, data, &REGISTRY, &POOL, &config())
}

/// The general write entry point; see [`Write2Options`].
pub fn write2(uuid: Uuid, opts: Write2Options) -> SockResult<()> {
    api::write2(uuid, opts, &REGISTRY, &POOL, &config())
}

/// Check out a pooled buffer for the caller to fill in place.
pub fn checkout() -> CheckedOutBuffer {
    api::buffer_checkout(&REGISTRY, &POOL, &config())
}

/// Queue a buffer obtained from [`checkout`].
pub fn send_buffer(uuid: Uuid, buffer: CheckedOutBuffer, length: usize, urgent: bool) -> SockResult<()> {
    api::buffer_send(uuid, buffer, length, urgent, &REGISTRY, &POOL, &config())
}

/// Discard a buffer obtained from [`checkout`] without sending it.
pub fn free_buffer(buffer: CheckedOutBuffer) {
    api::buffer_free(buffer, &POOL)
}

/// Drain a connection's write queue until it stalls or empties.
pub fn flush(uuid: Uuid) -> SockResult<()> {
    flush::flush(uuid, &REGISTRY, &POOL, &config())
}

/// Busy-loop `flush` until the connection closes or fully drains. Intended
/// for shutdown paths, not the hot path.
pub fn flush_strong(uuid: Uuid) {
    flush::flush_strong(uuid, &REGISTRY, &POOL, &config())
}

/// Flush every connection with data currently queued.
pub fn flush_all() {
    let cap = REGISTRY.capacity() as RawFd;
    flush::flush_all(&REGISTRY, &POOL, &config(), 0..cap)
}

/// The currently installed hook table for `uuid`, if it is valid.
pub fn rw_hook_get(uuid: Uuid) -> Option<HookHandle> {
    REGISTRY.hooks(uuid)
}

/// Replace the hook table for `uuid`. Returns `false` if the uuid is stale.
pub fn rw_hook_set(uuid: Uuid, hooks: HookHandle) -> bool {
    REGISTRY.set_hooks(uuid, hooks)
}

/// The process's descriptor ceiling, raising the soft rlimit to the hard
/// rlimit on first call.
pub fn max_capacity() -> usize {
    capacity::max_capacity()
}
