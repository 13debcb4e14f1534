//! Hostname resolution for `listen`/`connect`.
//!
//! Resolution here is deliberately blocking (`std::net::ToSocketAddrs`,
//! itself backed by `getaddrinfo`) — lifecycle operations are expected to be
//! called from control-plane code, not the hot data path, and a blocking
//! resolver is far simpler than threading DNS through the non-blocking
//! write pipeline for a one-shot lookup.

use std::net::{SocketAddr, ToSocketAddrs};

/// Resolution failure kinds surfaced by [`crate::lifecycle`].
#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum DnsError {
    #[error("DNS lookup failed")]
    LookupFailed,
    #[error("invalid hostname")]
    InvalidHost,
}

pub fn is_loopback(host: &str) -> bool {
    host == "localhost" || host == "127.0.0.1" || host == "::1"
}

/// Resolve `host:port` to every address the resolver returns, in order.
/// Used identically for passive (`listen`) and active (`connect`)
/// resolution; the caller decides whether to bind or connect to each.
pub fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, DnsError> {
    if host.is_empty() {
        return Err(DnsError::InvalidHost);
    }
    (host, port)
        .to_socket_addrs()
        .map(|addrs| addrs.collect())
        .map_err(|_| DnsError::LookupFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_loopback_literal() {
        let addrs = resolve("127.0.0.1", 9000).unwrap();
        assert!(addrs.iter().any(|a| a.ip().is_loopback()));
    }

    #[test]
    fn localhost_is_loopback() {
        assert!(is_loopback("localhost"));
        assert!(!is_loopback("example.com"));
    }

    #[test]
    fn empty_host_is_invalid() {
        assert!(matches!(resolve("", 80), Err(DnsError::InvalidHost)));
    }
}
