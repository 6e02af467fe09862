//! Test-case orchestration.
//!
//! The [`Orchestrator`] executes the actions produced by
//! [`netbench_core::RunState`]: it starts client runs, publishes test cases
//! to the relay, and waits for the authoritative completion signal of every
//! client run.
//!
//! Two completion sources exist: the relay (a connection pair finished) and
//! the client process (it exited). [`Settings::completion_source`] picks the
//! authoritative one; the other is drained by a background task that only
//! watches it for fatal conditions.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use netbench_core::{Action, Event, RunState, TestPlan};
use netbench_types::{
    Completion, CompletionSource, CompletionStatus, PublicationId, Settings, TestCase,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::client::{ClientExit, ClientInput, ClientLauncher, ClientRun};
use crate::engine::{start_relay, RelayHandle};
use crate::error::{RelayError, Result};
use crate::handoff::{handoff, Publisher};

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Test cases run to the end.
    pub cases: usize,
    /// Client runs that completed (including failed ones).
    pub client_runs: usize,
    /// Publish or completion waits that hit the timeout.
    pub timeouts: usize,
    /// Completions reporting an I/O failure or a failing client.
    pub failures: usize,
}

impl RunReport {
    /// Whether every client run completed without failure or timeout.
    pub fn is_clean(&self) -> bool {
        self.timeouts == 0 && self.failures == 0
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} test cases, {} client runs, {} failures, {} timeouts",
            self.cases, self.client_runs, self.failures, self.timeouts
        )
    }
}

/// A completion signal from either source.
#[derive(Debug)]
enum Signal {
    Relay(Completion),
    Client(Result<ClientExit>),
}

/// What the current wait is for.
struct Expected {
    publication: Option<PublicationId>,
    case_index: usize,
}

enum Verdict {
    Completed { failed: bool },
    Stale,
}

impl Signal {
    fn classify(self, expected: &Expected) -> Result<Verdict> {
        match self {
            Signal::Relay(completion) => match completion.status {
                CompletionStatus::Fatal(reason) => Err(RelayError::Fatal(reason)),
                _ if Some(completion.publication) != expected.publication => Ok(Verdict::Stale),
                status => Ok(Verdict::Completed {
                    failed: matches!(status, CompletionStatus::Failed(_)),
                }),
            },
            Signal::Client(Err(e)) => Err(e),
            Signal::Client(Ok(exit)) if exit.case_index != expected.case_index => {
                Ok(Verdict::Stale)
            }
            Signal::Client(Ok(exit)) => Ok(Verdict::Completed {
                failed: !exit.outcome.is_success(),
            }),
        }
    }
}

/// Drives a test plan against a running relay.
pub struct Orchestrator<L: ClientLauncher> {
    settings: Arc<Settings>,
    launcher: Arc<L>,
    publisher: Publisher,
    relay: RelayHandle,
    completions: mpsc::UnboundedReceiver<Completion>,
}

impl<L: ClientLauncher> Orchestrator<L> {
    /// Start the relay engine selected by `settings`.
    pub async fn start(settings: Arc<Settings>, launcher: L) -> Result<Self> {
        let (publisher, subscriber) = handoff();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let relay = start_relay(&settings, subscriber, completions_tx).await?;
        tracing::info!(
            "Relay listening on {} ({:?}), completion source: {:?}",
            relay.local_addr(),
            settings.protocol,
            settings.completion_source()
        );

        Ok(Self {
            settings,
            launcher: Arc::new(launcher),
            publisher,
            relay,
            completions,
        })
    }

    /// Address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.relay.local_addr()
    }

    /// Run every planned test case, replaying `captured` to each client.
    pub async fn run_test(self, plan: &TestPlan, captured: Arc<[u8]>) -> Result<RunReport> {
        self.run(plan, ClientInput::Replay(captured)).await
    }

    /// Capture run: one client fed the harness's stdin, recorded to `capture`.
    pub async fn run_collect(self, capture: PathBuf) -> Result<RunReport> {
        let plan = TestPlan::single(TestCase::collect())?;
        self.run(&plan, ClientInput::Tee { capture }).await
    }

    async fn run(self, plan: &TestPlan, input: ClientInput) -> Result<RunReport> {
        let Self {
            settings,
            launcher,
            publisher,
            relay,
            mut completions,
        } = self;
        let limit = settings.completion_timeout();

        let (authoritative_tx, mut authoritative) = mpsc::unbounded_channel();
        let (drain_tx, drain_rx) = mpsc::unbounded_channel();
        let (abort_tx, mut abort) = mpsc::unbounded_channel();

        let (relay_sink, client_sink) = match settings.completion_source() {
            CompletionSource::Relay => (authoritative_tx, drain_tx),
            CompletionSource::ClientExit => (drain_tx, authoritative_tx),
        };
        tokio::spawn(async move {
            while let Some(completion) = completions.recv().await {
                if relay_sink.send(Signal::Relay(completion)).is_err() {
                    break;
                }
            }
        });
        tokio::spawn(drain(drain_rx, abort_tx));

        let mut report = RunReport::default();
        let mut clients: Vec<JoinHandle<()>> = Vec::new();
        let mut expected = Expected {
            publication: None,
            case_index: 0,
        };
        let mut skip_wait = false;

        tracing::info!(
            "Running {} test case(s), {} client run(s) in total",
            plan.len(),
            plan.total_client_runs()
        );
        let mut state = RunState::new();
        let mut queue = VecDeque::new();
        let (next, actions) = state.on_event(Event::Start, plan);
        state = next;
        queue.extend(actions);

        while let Some(action) = queue.pop_front() {
            let event = match action {
                Action::SpawnClients { case, count } => {
                    let Some(entry) = plan.get(case) else {
                        continue;
                    };
                    tracing::info!(
                        "Running test case {} with {} client(s): {}",
                        entry.label(),
                        count,
                        entry.case
                    );
                    expected.case_index = entry.index;
                    clients.retain(|client| !client.is_finished());
                    for client in 0..count {
                        let launcher = launcher.clone();
                        let sink = client_sink.clone();
                        let run = ClientRun {
                            case_index: entry.index,
                            client,
                            input: input.clone(),
                        };
                        clients.push(tokio::spawn(async move {
                            let exit = launcher.run(run).await;
                            let _ = sink.send(Signal::Client(exit));
                        }));
                    }
                    None
                }

                Action::Publish { case, client } => {
                    let Some(entry) = plan.get(case) else {
                        continue;
                    };
                    let published = tokio::select! {
                        Some(reason) = abort.recv() => return Err(RelayError::Fatal(reason)),
                        published = tokio::time::timeout(
                            limit,
                            publisher.publish(Arc::new(entry.case.clone())),
                        ) => published,
                    };
                    match published {
                        Ok(id) => {
                            let id = id?;
                            tracing::debug!(
                                "Test case {} client {} consumed as {:?}",
                                entry.label(),
                                client,
                                id
                            );
                            expected.publication = Some(id);
                        }
                        Err(_) => {
                            let timeout = RelayError::Timeout {
                                waited: limit,
                                what: "a client to pick up the test case",
                            };
                            tracing::warn!(
                                "Test case {} client {}: {}",
                                entry.label(),
                                client,
                                timeout
                            );
                            report.timeouts += 1;
                            expected.publication = None;
                            skip_wait = true;
                        }
                    }
                    Some(Event::Published)
                }

                Action::AwaitCompletion { case, client } => {
                    if std::mem::take(&mut skip_wait) {
                        report.client_runs += 1;
                        Some(Event::Completed)
                    } else {
                        let deadline = Instant::now() + limit;
                        loop {
                            let signal = tokio::select! {
                                Some(reason) = abort.recv() => return Err(RelayError::Fatal(reason)),
                                signal = tokio::time::timeout_at(deadline, authoritative.recv()) => signal,
                            };
                            let signal = match signal {
                                Ok(Some(signal)) => signal,
                                Ok(None) => {
                                    return Err(RelayError::Fatal(
                                        "completion source closed".to_string(),
                                    ))
                                }
                                Err(_) => {
                                    let timeout = RelayError::Timeout {
                                        waited: limit,
                                        what: "the client run to complete",
                                    };
                                    tracing::warn!(
                                        "Plan entry {} client {}: {}",
                                        case,
                                        client,
                                        timeout
                                    );
                                    report.timeouts += 1;
                                    break;
                                }
                            };
                            match signal.classify(&expected)? {
                                Verdict::Stale => {
                                    tracing::debug!("Ignoring completion of an earlier run");
                                }
                                Verdict::Completed { failed } => {
                                    if failed {
                                        report.failures += 1;
                                    }
                                    break;
                                }
                            }
                        }
                        report.client_runs += 1;
                        Some(Event::Completed)
                    }
                }

                Action::FinishTestCase { case } => {
                    relay.finish_test_case().await?;
                    if let Some(entry) = plan.get(case) {
                        tracing::info!("Test case {} finished", entry.label());
                    }
                    report.cases += 1;
                    None
                }

                Action::Exit => break,
            };

            if let Some(event) = event {
                let (next, actions) = state.on_event(event, plan);
                state = next;
                queue.extend(actions);
            }
        }

        let running = clients.iter().filter(|c| !c.is_finished()).count();
        if running > 0 {
            tracing::debug!("Stopping {} client(s) still running", running);
        }
        for client in clients {
            client.abort();
        }
        relay.shutdown();

        tracing::info!("All test cases done: {}", report);
        Ok(report)
    }
}

/// Log and discard signals of the non-authoritative source, forwarding
/// fatal ones to the orchestrator.
async fn drain(mut signals: mpsc::UnboundedReceiver<Signal>, abort: mpsc::UnboundedSender<String>) {
    while let Some(signal) = signals.recv().await {
        let fatal = match signal {
            Signal::Relay(Completion {
                status: CompletionStatus::Fatal(reason),
                ..
            }) => Some(reason),
            Signal::Relay(completion) => {
                tracing::debug!(
                    "Relay completion {:?}: {}",
                    completion.publication,
                    completion.status
                );
                None
            }
            Signal::Client(Ok(exit)) => {
                tracing::debug!(
                    "Client {} of test case #{} {}",
                    exit.client,
                    exit.case_index,
                    exit.outcome
                );
                None
            }
            Signal::Client(Err(e)) => Some(e.to_string()),
        };

        if let Some(reason) = fatal {
            if abort.send(reason).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientOutcome;
    use netbench_types::Termination;

    fn expected(publication: PublicationId) -> Expected {
        Expected {
            publication: Some(publication),
            case_index: 4,
        }
    }

    fn client_exit(case_index: usize, outcome: ClientOutcome) -> Signal {
        Signal::Client(Ok(ClientExit {
            case_index,
            client: 0,
            outcome,
        }))
    }

    #[test]
    fn relay_completion_for_current_publication() {
        let id = PublicationId::new();
        let signal = Signal::Relay(Completion::new(
            id,
            CompletionStatus::Finished(Termination::EndOfStream),
        ));
        assert!(matches!(
            signal.classify(&expected(id)),
            Ok(Verdict::Completed { failed: false })
        ));
    }

    #[test]
    fn relay_failure_counts_as_failed_completion() {
        let id = PublicationId::new();
        let signal = Signal::Relay(Completion::new(
            id,
            CompletionStatus::Failed("connection reset".to_string()),
        ));
        assert!(matches!(
            signal.classify(&expected(id)),
            Ok(Verdict::Completed { failed: true })
        ));
    }

    #[test]
    fn relay_completion_for_other_publication_is_stale() {
        let signal = Signal::Relay(Completion::new(
            PublicationId::new(),
            CompletionStatus::Finished(Termination::Reset),
        ));
        assert!(matches!(
            signal.classify(&expected(PublicationId::new())),
            Ok(Verdict::Stale)
        ));
    }

    #[test]
    fn fatal_relay_completion_aborts_even_when_stale() {
        let signal = Signal::Relay(Completion::new(
            PublicationId::new(),
            CompletionStatus::Fatal("dial failed".to_string()),
        ));
        assert!(matches!(
            signal.classify(&expected(PublicationId::new())),
            Err(RelayError::Fatal(_))
        ));
    }

    #[test]
    fn client_exit_matches_case_index() {
        let id = PublicationId::new();
        assert!(matches!(
            client_exit(4, ClientOutcome::Exited(Some(0))).classify(&expected(id)),
            Ok(Verdict::Completed { failed: false })
        ));
        assert!(matches!(
            client_exit(4, ClientOutcome::Exited(Some(1))).classify(&expected(id)),
            Ok(Verdict::Completed { failed: true })
        ));
        assert!(matches!(
            client_exit(3, ClientOutcome::Exited(Some(0))).classify(&expected(id)),
            Ok(Verdict::Stale)
        ));
    }

    #[tokio::test]
    async fn drain_forwards_only_fatal_signals() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (abort_tx, mut abort_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drain(rx, abort_tx));

        tx.send(client_exit(0, ClientOutcome::Exited(Some(1)))).unwrap();
        tx.send(Signal::Relay(Completion::new(
            PublicationId::new(),
            CompletionStatus::Finished(Termination::PeerClosed),
        )))
        .unwrap();
        tx.send(Signal::Client(Err(RelayError::Client {
            command: "client".to_string(),
            reason: "not found".to_string(),
        })))
        .unwrap();
        drop(tx);
        task.await.unwrap();

        let reason = abort_rx.recv().await.unwrap();
        assert!(reason.contains("not found"));
        assert!(abort_rx.recv().await.is_none());
    }

    #[test]
    fn report_display_and_cleanliness() {
        let report = RunReport {
            cases: 2,
            client_runs: 4,
            timeouts: 0,
            failures: 1,
        };
        assert!(!report.is_clean());
        assert_eq!(
            report.to_string(),
            "2 test cases, 4 client runs, 1 failures, 0 timeouts"
        );
        assert!(RunReport::default().is_clean());
    }
}
