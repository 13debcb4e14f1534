//! Bijection between (descriptor, generation) and the opaque connection id.
//!
//! UUIDs are process-local and MUST NOT be exposed on the wire: they encode a
//! raw descriptor plus an 8-bit generation counter used to detect stale
//! handles once the kernel recycles the descriptor (the ABA guard, see
//! [`crate::registry`]).

use std::os::unix::io::RawFd;

/// Opaque connection identifier. `-1` is reserved for "invalid".
pub type Uuid = i64;

/// Sentinel returned whenever an operation cannot produce a valid handle.
pub const INVALID_UUID: Uuid = -1;

const GENERATION_BITS: u32 = 8;
const GENERATION_MASK: i64 = 0xff;

/// Pack a descriptor and its slot generation into a [`Uuid`].
pub const fn encode(fd: RawFd, generation: u8) -> Uuid {
    ((fd as i64) << GENERATION_BITS) | (generation as i64)
}

/// Split a [`Uuid`] back into its descriptor and generation parts.
///
/// Does not validate the uuid against the registry; callers that need a
/// liveness check should go through [`crate::registry::Registry::validate`].
pub const fn decode(uuid: Uuid) -> (RawFd, u8) {
    let fd = (uuid >> GENERATION_BITS) as RawFd;
    let generation = (uuid & GENERATION_MASK) as u8;
    (fd, generation)
}

/// The descriptor a uuid was minted for, ignoring generation.
pub const fn fd_of(uuid: Uuid) -> RawFd {
    decode(uuid).0
}
