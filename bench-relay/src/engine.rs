//! Protocol-independent front of the two relay engines.

use std::net::SocketAddr;

use netbench_types::{Completion, Protocol, Settings};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::handoff::Subscriber;
use crate::tcp::TcpRelay;
use crate::udp::{UdpRelay, UdpRelayHandle};

/// A running relay engine.
#[derive(Debug)]
pub enum RelayHandle {
    /// TCP accept loop.
    Tcp {
        /// Listening address.
        local_addr: SocketAddr,
        /// Accept loop task.
        accept: JoinHandle<()>,
    },
    /// UDP engine.
    Udp(UdpRelayHandle),
}

/// Bind and start the engine selected by `settings.protocol`.
pub async fn start_relay(
    settings: &Settings,
    subscriber: Subscriber,
    completions: mpsc::UnboundedSender<Completion>,
) -> Result<RelayHandle> {
    match settings.protocol {
        Protocol::Tcp => {
            let relay = TcpRelay::bind(settings).await?;
            let local_addr = relay.local_addr()?;
            let accept = relay.spawn(subscriber, completions);
            Ok(RelayHandle::Tcp { local_addr, accept })
        }
        Protocol::Udp => {
            let relay = UdpRelay::bind(settings).await?;
            Ok(RelayHandle::Udp(relay.spawn(subscriber, completions)?))
        }
    }
}

impl RelayHandle {
    /// Address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        match self {
            Self::Tcp { local_addr, .. } => *local_addr,
            Self::Udp(handle) => handle.local_addr(),
        }
    }

    /// End-of-test-case hook: flushes held datagrams for UDP, no-op for TCP.
    pub async fn finish_test_case(&self) -> Result<()> {
        match self {
            Self::Tcp { .. } => Ok(()),
            Self::Udp(handle) => handle.finish_test_case().await.map(|_| ()),
        }
    }

    /// Stop accepting new clients.
    pub fn shutdown(self) {
        match self {
            Self::Tcp { accept, .. } => accept.abort(),
            // The engine stops once its last handle is dropped.
            Self::Udp(handle) => drop(handle),
        }
    }
}
