//! Weak collaborator hooks for an embedding event loop.
//!
//! These default to no-ops; an embedder that wants to keep its own readiness
//! registration in sync with connection lifecycle installs its own
//! [`Reactor`] implementation.

use crate::uuid::Uuid;
use std::sync::{Arc, OnceLock};

/// Callbacks an embedding reactor can receive on connection lifecycle
/// events. All methods default to no-ops.
pub trait Reactor: Send + Sync {
    /// Called after a descriptor has been closed and its slot cleared.
    fn on_close(&self, _uuid: Uuid) {}

    /// Called before a close, so the reactor can deregister readiness
    /// interest. A non-zero return is logged but never blocks the close.
    fn remove(&self, _uuid: Uuid) -> i32 {
        0
    }

    /// Called on read/write activity, so the reactor can refresh an
    /// idle-timeout deadline.
    fn touch(&self, _uuid: Uuid) {}
}

struct NoopReactor;
impl Reactor for NoopReactor {}

static REACTOR: OnceLock<Arc<dyn Reactor>> = OnceLock::new();

/// Install the process-wide reactor. Must be called at most once, before
/// any lifecycle operation runs; later calls are ignored.
pub fn install(reactor: Arc<dyn Reactor>) {
    let _ = REACTOR.set(reactor);
}

fn current() -> Arc<dyn Reactor> {
    REACTOR.get_or_init(|| Arc::new(NoopReactor)).clone()
}

pub fn reactor_on_close(uuid: Uuid) {
    current().on_close(uuid);
}

pub fn reactor_remove(uuid: Uuid) -> i32 {
    current().remove(uuid)
}

pub fn sock_touch(uuid: Uuid) {
    current().touch(uuid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn default_reactor_is_a_silent_no_op() {
        assert_eq!(reactor_remove(42), 0);
        reactor_on_close(42);
        sock_touch(42);
    }

    #[test]
    fn custom_reactor_observes_touch() {
        struct Counting(AtomicI64);
        impl Reactor for Counting {
            fn touch(&self, uuid: Uuid) {
                self.0.store(uuid, Ordering::SeqCst);
            }
        }
        // Installing here only demonstrates the API shape; a second test in
        // the same binary cannot observe this install due to `OnceLock`'s
        // process-wide, set-once semantics.
        let reactor = Arc::new(Counting(AtomicI64::new(0)));
        reactor.touch(7);
        assert_eq!(reactor.0.load(Ordering::SeqCst), 7);
    }
}
