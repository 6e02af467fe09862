//! UDP relay engine.
//!
//! One engine task owns the flow pool and both reorder buffers. It receives
//! client datagrams on the listening socket, server datagrams from one reader
//! task per flow, and commands from the [`UdpRelayHandle`]. Because all state
//! lives in that single task, a flush can never interleave with a dispatch.
//!
//! A flow is keyed by the client's source address and owns one connected
//! upstream socket for the lifetime of the engine.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use netbench_core::ReorderBuffer;
use netbench_types::{Completion, CompletionStatus, PublicationId, Settings, MAX_DATAGRAM_SIZE};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{RelayError, Result};
use crate::handoff::Subscriber;
use crate::net::{resolve, unspecified_for};

/// Datagrams released by a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Held datagrams sent to the server.
    pub to_server: usize,
    /// Held datagrams sent to clients.
    pub to_client: usize,
}

/// Snapshot of the engine state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UdpStats {
    /// Number of pooled flows.
    pub flows: usize,
    /// Flows holding a datagram for the server.
    pub pending_to_server: usize,
    /// Flows holding a datagram for the client.
    pub pending_to_client: usize,
}

enum Command {
    Flush { done: oneshot::Sender<FlushReport> },
    Stats { reply: oneshot::Sender<UdpStats> },
}

/// A server datagram read by a flow's reader task.
struct FromServer {
    client: SocketAddr,
    datagram: Vec<u8>,
}

struct Flow {
    upstream: Arc<UdpSocket>,
    reader: JoinHandle<()>,
}

impl Drop for Flow {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Listening side of the UDP relay.
#[derive(Debug)]
pub struct UdpRelay {
    inbound: Arc<UdpSocket>,
    upstream: SocketAddr,
    settle_delay: Duration,
}

impl UdpRelay {
    /// Resolve the upstream address and bind the listening socket.
    pub async fn bind(settings: &Settings) -> Result<Self> {
        let upstream = resolve(&settings.server_address).await?;
        let inbound = UdpSocket::bind(&settings.listen_address)
            .await
            .map_err(|source| RelayError::Bind {
                addr: settings.listen_address.clone(),
                source,
            })?;

        tracing::debug!(
            "Listening on {} (udp), upstream {}",
            settings.listen_address,
            upstream
        );
        Ok(Self {
            inbound: Arc::new(inbound),
            upstream,
            settle_delay: settings.settle_delay(),
        })
    }

    /// Address the relay receives client datagrams on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inbound.local_addr()?)
    }

    /// Start the engine and the publication consumer.
    ///
    /// Failing to open an upstream socket for a new flow is reported as a
    /// [`CompletionStatus::Fatal`] on `completions` and stops the engine.
    pub fn spawn(
        self,
        subscriber: Subscriber,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Result<UdpRelayHandle> {
        let local_addr = self.local_addr()?;
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        // Publications are consumed as soon as they arrive; the engine only
        // reads the current slot.
        let consumer = subscriber.clone();
        tokio::spawn(async move {
            while let Ok(consumed) = consumer.take().await {
                tracing::debug!("Test case {:?} is now current", consumed.id);
            }
        });

        let engine = Engine {
            inbound: self.inbound,
            upstream: self.upstream,
            flows: HashMap::new(),
            to_server: ReorderBuffer::new(),
            to_client: ReorderBuffer::new(),
            events: events_tx,
            subscriber,
            completions,
        };
        tokio::spawn(engine.run(commands_rx, events_rx));

        Ok(UdpRelayHandle {
            commands: commands_tx,
            local_addr,
            settle_delay: self.settle_delay,
        })
    }
}

/// Control handle of a running UDP engine.
#[derive(Debug, Clone)]
pub struct UdpRelayHandle {
    commands: mpsc::Sender<Command>,
    local_addr: SocketAddr,
    settle_delay: Duration,
}

impl UdpRelayHandle {
    /// Address the relay receives client datagrams on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for in-flight datagrams to settle, then send every held datagram
    /// in both directions and clear both buffers.
    pub async fn finish_test_case(&self) -> Result<FlushReport> {
        tokio::time::sleep(self.settle_delay).await;
        tracing::debug!("Going to flush reorder buffers");

        let (done, report) = oneshot::channel();
        self.send(Command::Flush { done }).await?;
        report.await.map_err(|_| engine_stopped())
    }

    /// Current flow and buffer counts.
    pub async fn stats(&self) -> Result<UdpStats> {
        let (reply, stats) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        stats.await.map_err(|_| engine_stopped())
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| engine_stopped())
    }
}

fn engine_stopped() -> RelayError {
    RelayError::Fatal("udp relay engine stopped".to_string())
}

struct Engine {
    inbound: Arc<UdpSocket>,
    upstream: SocketAddr,
    flows: HashMap<SocketAddr, Flow>,
    to_server: ReorderBuffer<SocketAddr>,
    to_client: ReorderBuffer<SocketAddr>,
    events: mpsc::UnboundedSender<FromServer>,
    subscriber: Subscriber,
    completions: mpsc::UnboundedSender<Completion>,
}

impl Engine {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<FromServer>,
    ) {
        let inbound = self.inbound.clone();
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                received = inbound.recv_from(&mut buffer) => match received {
                    Ok((len, source)) => {
                        tracing::debug!("Received datagram length {} from {}", len, source);
                        if let Err(e) = self.forward_to_server(source, &buffer[..len]).await {
                            tracing::error!("{}", e);
                            self.report_fatal(e);
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Error receiving from clients: {}", e),
                },
                Some(event) = events.recv() => {
                    self.forward_to_client(event).await;
                }
                command = commands.recv() => match command {
                    Some(Command::Flush { done }) => {
                        let _ = done.send(self.flush().await);
                    }
                    Some(Command::Stats { reply }) => {
                        let _ = reply.send(self.stats());
                    }
                    None => break,
                },
            }
        }
        tracing::debug!("UDP relay engine stopped");
    }

    fn reordering(&self) -> bool {
        self.subscriber
            .current_case()
            .is_some_and(|case| case.reordering_enabled)
    }

    async fn forward_to_server(&mut self, client: SocketAddr, datagram: &[u8]) -> Result<()> {
        if !self.flows.contains_key(&client) {
            let flow = self.open_flow(client).await?;
            self.flows.insert(client, flow);
        }
        let reordering = self.reordering();
        let Some(flow) = self.flows.get(&client) else {
            return Ok(());
        };

        for datagram in self
            .to_server
            .dispatch(client, datagram, reordering)
            .into_datagrams()
        {
            if let Err(e) = flow.upstream.send(&datagram).await {
                tracing::warn!("Error sending to server for {}: {}", client, e);
            }
        }
        Ok(())
    }

    async fn forward_to_client(&mut self, event: FromServer) {
        tracing::debug!(
            "Received datagram length {} from the server for {}",
            event.datagram.len(),
            event.client
        );
        let reordering = self.reordering();
        for datagram in self
            .to_client
            .dispatch(event.client, &event.datagram, reordering)
            .into_datagrams()
        {
            if let Err(e) = self.inbound.send_to(&datagram, event.client).await {
                tracing::warn!("Error sending to client {}: {}", event.client, e);
            }
        }
    }

    async fn open_flow(&self, client: SocketAddr) -> Result<Flow> {
        let dial = |source| RelayError::Dial {
            addr: self.upstream,
            source,
        };
        let socket = UdpSocket::bind(unspecified_for(&self.upstream))
            .await
            .map_err(dial)?;
        socket.connect(self.upstream).await.map_err(dial)?;
        let upstream = Arc::new(socket);

        if let Ok(local) = upstream.local_addr() {
            tracing::debug!("New flow {} via {}", client, local);
        }
        let reader = tokio::spawn(read_server(
            upstream.clone(),
            client,
            self.events.clone(),
        ));
        Ok(Flow { upstream, reader })
    }

    async fn flush(&mut self) -> FlushReport {
        let mut report = FlushReport::default();

        for (client, datagram) in self.to_client.drain() {
            match self.inbound.send_to(&datagram, client).await {
                Ok(_) => report.to_client += 1,
                Err(e) => tracing::warn!("Error flushing to client {}: {}", client, e),
            }
        }
        for (client, datagram) in self.to_server.drain() {
            let Some(flow) = self.flows.get(&client) else {
                continue;
            };
            match flow.upstream.send(&datagram).await {
                Ok(_) => report.to_server += 1,
                Err(e) => tracing::warn!("Error flushing to server for {}: {}", client, e),
            }
        }

        tracing::debug!(
            "Flushed {} datagrams to the server, {} to clients",
            report.to_server,
            report.to_client
        );
        report
    }

    fn stats(&self) -> UdpStats {
        UdpStats {
            flows: self.flows.len(),
            pending_to_server: self.to_server.len(),
            pending_to_client: self.to_client.len(),
        }
    }

    fn report_fatal(&self, error: RelayError) {
        let publication = self
            .subscriber
            .current()
            .map_or_else(PublicationId::new, |consumed| consumed.id);
        let completion = Completion::new(publication, CompletionStatus::Fatal(error.to_string()));
        if self.completions.send(completion).is_err() {
            tracing::debug!("Completion receiver gone");
        }
    }
}

/// Read server datagrams of one flow and post them to the engine.
async fn read_server(
    socket: Arc<UdpSocket>,
    client: SocketAddr,
    events: mpsc::UnboundedSender<FromServer>,
) {
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        match socket.recv(&mut buffer).await {
            Ok(len) => {
                let event = FromServer {
                    client,
                    datagram: buffer[..len].to_vec(),
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            // ICMP port unreachable from an earlier send
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                tracing::debug!("Server refused datagram for {}", client);
            }
            Err(e) => {
                tracing::warn!("Error receiving from server for {}: {}", client, e);
                break;
            }
        }
    }
}
