//! Bounded pre-allocation for outgoing packets, with heap overflow under
//! sustained backpressure.
//!
//! The original's "is this pointer inside the static array" membership test
//! becomes a bounded free list: packets handed back while the list is
//! already at its starting size are simply dropped (handed to the general
//! allocator), which is the same externally observable behaviour without
//! literal pointer-range arithmetic.

use crate::packet::Packet;
use crate::spinlock::Spinlock;

struct Inner {
    free: Vec<Box<Packet>>,
    capacity: usize,
    payload_size: usize,
    initialized: bool,
}

/// Process-wide packet pool. One instance is normally installed as a
/// `once_cell::sync::Lazy` static (see [`crate::lib`]).
pub struct PacketPool {
    inner: Spinlock<Inner>,
}

impl PacketPool {
    pub fn new(capacity: usize, payload_size: usize) -> PacketPool {
        PacketPool {
            inner: Spinlock::new(Inner { free: Vec::new(), capacity, payload_size, initialized: false }),
        }
    }

    fn ensure_init(inner: &mut Inner) {
        if inner.initialized {
            return;
        }
        inner.free.reserve(inner.capacity);
        for _ in 0..inner.capacity {
            inner.free.push(Box::new(Packet::empty(inner.payload_size)));
        }
        inner.initialized = true;
    }

    /// Pop a packet from the free list without blocking. Empty means the
    /// pool is exhausted right now.
    pub fn grab_try(&self) -> Option<Box<Packet>> {
        let mut inner = self.inner.lock();
        Self::ensure_init(&mut inner);
        inner.free.pop()
    }

    /// Pop a packet, spilling to the heap allocator if the pool is
    /// exhausted. `on_exhausted` is called once per failed attempt before
    /// retrying `grab_try` — callers pass in a flush-all pulse so pending
    /// writes get a chance to drain and return packets to the pool. This
    /// indirection (a closure instead of a direct call into the flush
    /// engine) keeps the pool free of a hard dependency on the registry.
    pub fn grab(&self, mut on_exhausted: impl FnMut()) -> Box<Packet> {
        if let Some(p) = self.grab_try() {
            return p;
        }
        log::debug!(target: "sockflow::pool", "pool exhausted, pulsing flush_all to relieve backpressure");
        on_exhausted();
        if let Some(p) = self.grab_try() {
            return p;
        }
        log::debug!(target: "sockflow::pool", "pool still exhausted after flush pulse, spilling to heap");
        let payload_size = self.inner.lock().payload_size;
        Box::new(Packet::empty(payload_size))
    }

    /// Invoke the packet's release function, reset it, and return it to the
    /// free list if there's room; otherwise let it drop.
    pub fn release(&self, mut packet: Box<Packet>) {
        let mut inner = self.inner.lock();
        packet.release(inner.payload_size);
        if inner.free.len() < inner.capacity {
            inner.free.push(packet);
        } else {
            log::trace!(target: "sockflow::pool", "free list at capacity ({}), dropping overflow packet", inner.capacity);
        }
    }

    /// Current free-list length, mostly useful for tests asserting no
    /// packet leaked.
    pub fn free_len(&self) -> usize {
        self.inner.lock().free.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazily_initialises_to_full_free_list() {
        let pool = PacketPool::new(4, 64);
        assert_eq!(pool.free_len(), 4);
    }

    #[test]
    fn grab_try_empties_and_release_refills() {
        let pool = PacketPool::new(2, 64);
        let a = pool.grab_try().unwrap();
        let b = pool.grab_try().unwrap();
        assert!(pool.grab_try().is_none());
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.free_len(), 2);
    }

    #[test]
    fn grab_spills_to_heap_when_exhausted() {
        let pool = PacketPool::new(1, 64);
        let _held = pool.grab_try().unwrap();
        let mut pulses = 0;
        let overflow = pool.grab(|| pulses += 1);
        assert_eq!(pulses, 1);
        assert_eq!(overflow.length(), 0);
    }

    #[test]
    fn overflow_packets_are_not_retained_past_capacity() {
        let pool = PacketPool::new(1, 64);
        let a = pool.grab_try().unwrap();
        let overflow = pool.grab(|| {});
        pool.release(a);
        pool.release(overflow);
        assert_eq!(pool.free_len(), 1);
    }
}
