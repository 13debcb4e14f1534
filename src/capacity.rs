//! Discovers and caches the process's maximum open-descriptor ceiling.
//!
//! Queried once lazily; the registry uses this as an upper bound when
//! deciding how aggressively to grow, and callers use it to size their own
//! connection pools.

use std::sync::OnceLock;

use nix::sys::resource::{getrlimit, setrlimit, Resource};

static MAX_CAPACITY: OnceLock<usize> = OnceLock::new();

/// The descriptor ceiling for this process, raising the soft limit to the
/// hard limit on first call. Memoised after the first successful query.
pub fn max_capacity() -> usize {
    *MAX_CAPACITY.get_or_init(discover)
}

fn discover() -> usize {
    match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((soft, hard)) => {
            if soft < hard {
                let _ = setrlimit(Resource::RLIMIT_NOFILE, hard, hard);
            }
            match getrlimit(Resource::RLIMIT_NOFILE) {
                Ok((_, hard_after)) => hard_after as usize,
                Err(_) => hard as usize,
            }
        }
        Err(_) => crate::config::MIN_REGISTRY_CAPACITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_capacity_is_memoised_and_nonzero() {
        let a = max_capacity();
        let b = max_capacity();
        assert_eq!(a, b);
        assert!(a > 0);
    }
}
