//! Address resolution and socket setup shared by both engines.

use std::net::SocketAddr;

use tokio::net::TcpStream;

use crate::error::{RelayError, Result};

/// Resolve `addr` (host:port) to its first socket address.
pub async fn resolve(addr: &str) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host(addr)
        .await
        .map_err(|e| RelayError::Resolve {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

    addrs.next().ok_or_else(|| RelayError::Resolve {
        addr: addr.to_string(),
        reason: "no addresses found".to_string(),
    })
}

/// Wildcard bind address in the same family as `remote`.
pub fn unspecified_for(remote: &SocketAddr) -> SocketAddr {
    if remote.is_ipv6() {
        SocketAddr::from(([0u16; 8], 0))
    } else {
        SocketAddr::from(([0u8; 4], 0))
    }
}

/// Forward immediately and reset on close: `TCP_NODELAY` and zero linger.
pub fn configure_stream(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!("Failed to set TCP_NODELAY: {}", e);
    }
    if let Err(e) = stream.set_zero_linger() {
        tracing::warn!("Failed to set SO_LINGER: {}", e);
    }
}
