//! Orchestration state machine.
//!
//! A pure, side-effect-free state machine that walks a [`TestPlan`]. It takes
//! events as input and produces a new state plus a list of actions to
//! execute.
//!
//! ```text
//! Idle ──Start──► Publishing ──Published──► AwaitingCompletion
//!                     ▲                            │
//!                     └──────── Completed ─────────┤
//!                      (next client / next case)   │
//!                                                  └──Completed──► Done
//!                                                     (plan exhausted)
//! ```
//!
//! The actual I/O (spawning clients, publishing to the relay, waiting for
//! completion signals) is performed by `netbench-relay`'s orchestrator, not
//! by this module.

use crate::plan::TestPlan;

/// Orchestrator state. Positions refer to the plan, not the loaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Nothing started yet.
    Idle,
    /// Handing the test case to the relay for one client run.
    Publishing {
        /// Plan position of the current test case.
        case: usize,
        /// Client run within the test case.
        client: usize,
    },
    /// Waiting for the authoritative completion signal.
    AwaitingCompletion {
        /// Plan position of the current test case.
        case: usize,
        /// Client run within the test case.
        client: usize,
    },
    /// Plan exhausted.
    Done,
}

impl RunState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects.
    pub fn on_event(self, event: Event, plan: &TestPlan) -> (Self, Vec<Action>) {
        match (self, event) {
            (Self::Idle, Event::Start) => {
                if plan.is_empty() {
                    (Self::Done, vec![Action::Exit])
                } else {
                    (Self::Publishing { case: 0, client: 0 }, begin_case(0, plan))
                }
            }

            (Self::Publishing { case, client }, Event::Published) => (
                Self::AwaitingCompletion { case, client },
                vec![Action::AwaitCompletion { case, client }],
            ),

            (Self::AwaitingCompletion { case, client }, Event::Completed) => {
                let next_client = client + 1;
                if next_client < plan.clients_at(case) {
                    return (
                        Self::Publishing {
                            case,
                            client: next_client,
                        },
                        vec![Action::Publish {
                            case,
                            client: next_client,
                        }],
                    );
                }

                let mut actions = vec![Action::FinishTestCase { case }];
                let next_case = case + 1;
                if next_case < plan.len() {
                    actions.extend(begin_case(next_case, plan));
                    (
                        Self::Publishing {
                            case: next_case,
                            client: 0,
                        },
                        actions,
                    )
                } else {
                    actions.push(Action::Exit);
                    (Self::Done, actions)
                }
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if the plan has been exhausted.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

fn begin_case(case: usize, plan: &TestPlan) -> Vec<Action> {
    vec![
        Action::SpawnClients {
            case,
            count: plan.clients_at(case),
        },
        Action::Publish { case, client: 0 },
    ]
}

/// Events fed to the state machine by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Begin walking the plan.
    Start,
    /// The relay consumed the current publication.
    Published,
    /// The authoritative completion source fired (or its wait timed out).
    Completed,
}

/// Actions to be executed by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start `count` client runs for the test case.
    SpawnClients {
        /// Plan position.
        case: usize,
        /// Number of client runs.
        count: usize,
    },
    /// Publish the test case to the relay for one client run.
    Publish {
        /// Plan position.
        case: usize,
        /// Client run within the test case.
        client: usize,
    },
    /// Wait for the authoritative completion signal.
    AwaitCompletion {
        /// Plan position.
        case: usize,
        /// Client run within the test case.
        client: usize,
    },
    /// Every client run of the test case completed.
    FinishTestCase {
        /// Plan position.
        case: usize,
    },
    /// Plan exhausted.
    Exit,
}
