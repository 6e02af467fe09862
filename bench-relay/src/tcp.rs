//! TCP relay engine.
//!
//! Every accepted connection takes one publication from the handoff, dials
//! the upstream server and runs two byte pumps (client→server and
//! server→client). Each pump forwards at most `segment_size` bytes per
//! iteration, sleeps `delay_ms` after every forwarded segment, and resets the
//! pair once it forwarded `reset_after_segments` segments.
//!
//! ```text
//! client ──► [pump c→s] ──► server
//! client ◄── [pump s→c] ◄── server
//!               │   ▲
//!               ▼   │
//!            PairCloser (first terminal pump closes the pair)
//! ```
//!
//! The first pump to stop decides the completion status reported upward;
//! every terminal pump state, including I/O failures, produces one.

use std::net::SocketAddr;
use std::sync::Arc;

use netbench_types::{Completion, CompletionStatus, Settings, TestCase, Termination};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{RelayError, Result};
use crate::handoff::Subscriber;
use crate::net::{configure_stream, resolve};

/// Direction of a pump, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    ClientToServer,
    /// Server to client.
    ServerToClient,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientToServer => f.write_str("client to server"),
            Self::ServerToClient => f.write_str("server to client"),
        }
    }
}

/// Why a pump stopped.
#[derive(Debug)]
pub enum PumpExit {
    /// Normal terminal transition.
    Finished(Termination),
    /// Unexpected I/O failure.
    Failed(std::io::Error),
}

impl PumpExit {
    /// Completion status reported for this exit.
    pub fn status(&self) -> CompletionStatus {
        match self {
            Self::Finished(termination) => CompletionStatus::Finished(*termination),
            Self::Failed(e) => CompletionStatus::Failed(e.to_string()),
        }
    }
}

/// Final state of one pump.
#[derive(Debug)]
pub struct PumpReport {
    /// Which way the pump forwarded.
    pub direction: Direction,
    /// Segments fully written to the destination.
    pub forwarded: u64,
    /// Why the pump stopped.
    pub exit: PumpExit,
}

/// Result of relaying one connection pair.
#[derive(Debug)]
pub struct PairReport {
    /// Status of the first pump to stop.
    pub status: CompletionStatus,
    /// Segments forwarded client→server.
    pub client_to_server: u64,
    /// Segments forwarded server→client.
    pub server_to_client: u64,
}

/// Shared close signal of a connection pair.
///
/// Closing makes both pumps stop at their next suspension point; dropping
/// their socket halves then closes both sockets (with zero linger: a reset).
#[derive(Debug, Clone)]
pub struct PairCloser {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl PairCloser {
    /// Create an open pair signal.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Close the pair.
    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the pair was closed.
    pub fn is_closed(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the pair is closed.
    pub async fn closed(&mut self) {
        // The sender lives in `self`, so this only returns once closed.
        let _ = self.rx.wait_for(|closed| *closed).await;
    }
}

impl Default for PairCloser {
    fn default() -> Self {
        Self::new()
    }
}

/// Listening side of the TCP relay.
#[derive(Debug)]
pub struct TcpRelay {
    listener: TcpListener,
    upstream: SocketAddr,
}

impl TcpRelay {
    /// Resolve the upstream address and bind the listening socket.
    ///
    /// Both failures are fatal setup errors.
    pub async fn bind(settings: &Settings) -> Result<Self> {
        let upstream = resolve(&settings.server_address).await?;
        let listener = TcpListener::bind(&settings.listen_address)
            .await
            .map_err(|source| RelayError::Bind {
                addr: settings.listen_address.clone(),
                source,
            })?;

        tracing::debug!(
            "Listening on {} (tcp), upstream {}",
            settings.listen_address,
            upstream
        );
        Ok(Self { listener, upstream })
    }

    /// Address the relay accepts clients on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop in a background task.
    ///
    /// Each connection's completion is sent on `completions`.
    pub fn spawn(
        self,
        subscriber: Subscriber,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((inbound, peer)) => {
                        tracing::debug!("Accepted connection from {}", peer);
                        tokio::spawn(handle_connection(
                            inbound,
                            peer,
                            self.upstream,
                            subscriber.clone(),
                            completions.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::error!("Error accepting: {}", e);
                    }
                }
            }
        })
    }
}

/// Serve one accepted connection: take a test case, relay, report.
async fn handle_connection(
    inbound: TcpStream,
    peer: SocketAddr,
    upstream: SocketAddr,
    subscriber: Subscriber,
    completions: mpsc::UnboundedSender<Completion>,
) {
    let consumed = match subscriber.take().await {
        Ok(consumed) => consumed,
        Err(e) => {
            tracing::debug!("Dropping connection from {}: {}", peer, e);
            return;
        }
    };
    tracing::debug!(
        "Connection handler for {} started with {:?}",
        peer,
        consumed.id
    );

    let status = match relay_pair(inbound, upstream, consumed.case).await {
        Ok(report) => {
            tracing::debug!(
                "Connection from {} done: {} ({} segments c→s, {} segments s→c)",
                peer,
                report.status,
                report.client_to_server,
                report.server_to_client
            );
            report.status
        }
        Err(e) => {
            tracing::error!("{}", e);
            CompletionStatus::Fatal(e.to_string())
        }
    };

    if completions.send(Completion::new(consumed.id, status)).is_err() {
        tracing::debug!("Completion receiver gone for {:?}", consumed.id);
    }
}

/// Dial upstream and relay one connection pair until it is done.
///
/// Returns [`RelayError::Dial`] when the upstream server is unreachable.
pub async fn relay_pair(
    inbound: TcpStream,
    upstream: SocketAddr,
    case: Arc<TestCase>,
) -> Result<PairReport> {
    let outbound = TcpStream::connect(upstream)
        .await
        .map_err(|source| RelayError::Dial {
            addr: upstream,
            source,
        })?;

    configure_stream(&inbound);
    configure_stream(&outbound);

    let (client_read, client_write) = inbound.into_split();
    let (server_read, server_write) = outbound.into_split();
    let closer = PairCloser::new();
    let (exit_tx, mut exit_rx) = mpsc::channel(2);

    tokio::spawn(run_pump(
        client_read,
        server_write,
        case.clone(),
        Direction::ClientToServer,
        closer.clone(),
        exit_tx.clone(),
    ));
    tokio::spawn(run_pump(
        server_read,
        client_write,
        case,
        Direction::ServerToClient,
        closer.clone(),
        exit_tx,
    ));

    let first = exit_rx
        .recv()
        .await
        .ok_or_else(|| RelayError::Fatal("relay pumps vanished".to_string()))?;
    tracing::debug!("Received stop signal ({}) in {}", first.exit.status(), first.direction);
    closer.close();

    let second = exit_rx.recv().await;
    let mut report = PairReport {
        status: first.exit.status(),
        client_to_server: 0,
        server_to_client: 0,
    };
    for pump_report in std::iter::once(&first).chain(second.as_ref()) {
        match pump_report.direction {
            Direction::ClientToServer => report.client_to_server = pump_report.forwarded,
            Direction::ServerToClient => report.server_to_client = pump_report.forwarded,
        }
    }
    Ok(report)
}

/// Run one direction of a pair and report how it ended.
///
/// Only an end-of-stream is passed on as a FIN. Any other exit forgets the
/// write half instead of letting its drop half-close the socket, so once
/// both halves are gone the zero-linger close reaches the peer as a reset.
async fn run_pump(
    source: OwnedReadHalf,
    mut destination: OwnedWriteHalf,
    case: Arc<TestCase>,
    direction: Direction,
    closer: PairCloser,
    exits: mpsc::Sender<PumpReport>,
) {
    let report = pump(source, &mut destination, &case, direction, closer).await;
    if !matches!(report.exit, PumpExit::Finished(Termination::EndOfStream)) {
        destination.forget();
    }
    let _ = exits.send(report).await;
}

/// Forward `source` into `destination` segment by segment.
///
/// Delay is applied after each forwarded segment, never before the first.
/// The reset check runs before every read, so a threshold of `K` stops the
/// pump after exactly `K` forwarded segments.
///
/// `destination` is shut down only when `source` reached end-of-stream.
pub async fn pump<R, W>(
    mut source: R,
    mut destination: W,
    case: &TestCase,
    direction: Direction,
    mut closer: PairCloser,
) -> PumpReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; case.segment_size];
    let mut forwarded = 0u64;

    let exit = loop {
        if case.reset_due(forwarded) {
            tracing::debug!("Resetting connection in {} after {} segments", direction, forwarded);
            closer.close();
            break PumpExit::Finished(Termination::Reset);
        }

        let read = tokio::select! {
            biased;
            _ = closer.closed() => break PumpExit::Finished(Termination::PeerClosed),
            read = source.read(&mut buffer) => read,
        };

        let received = match read {
            Ok(0) => {
                tracing::debug!("Received EOF in {}", direction);
                break PumpExit::Finished(Termination::EndOfStream);
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => {
                tracing::debug!("Use of closed connection in {}", direction);
                break PumpExit::Finished(Termination::PeerClosed);
            }
            Err(e) => {
                tracing::warn!("Error reading in {}: {}", direction, e);
                break PumpExit::Failed(e);
            }
        };

        let written = tokio::select! {
            biased;
            _ = closer.closed() => break PumpExit::Finished(Termination::PeerClosed),
            written = destination.write_all(&buffer[..received]) => written,
        };
        if let Err(e) = written {
            tracing::warn!("Error writing in {}: {}", direction, e);
            break PumpExit::Failed(e);
        }
        forwarded += 1;

        if let Some(delay) = case.delay() {
            tokio::select! {
                biased;
                _ = closer.closed() => break PumpExit::Finished(Termination::PeerClosed),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    };

    if matches!(exit, PumpExit::Finished(Termination::EndOfStream)) {
        let _ = destination.shutdown().await;
    }
    PumpReport {
        direction,
        forwarded,
        exit,
    }
}
