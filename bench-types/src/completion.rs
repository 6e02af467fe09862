//! Completion signals.
//!
//! Every terminal state of a relay handler or client run produces exactly
//! one [`Completion`], carrying a status so the orchestrator can tell a
//! normal close from a failure.

use std::fmt;

use crate::PublicationId;

/// How a relay connection pair ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The source reached end-of-stream.
    EndOfStream,
    /// The paired pump closed the connection first.
    PeerClosed,
    /// The reset threshold was reached.
    Reset,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => f.write_str("end_of_stream"),
            Self::PeerClosed => f.write_str("peer_closed"),
            Self::Reset => f.write_str("reset"),
        }
    }
}

/// Outcome carried by a completion signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Normal terminal transition.
    Finished(Termination),
    /// Unexpected I/O failure; the run is over but the harness continues.
    Failed(String),
    /// Condition that makes further testing meaningless (e.g. upstream
    /// unreachable). The orchestrator aborts.
    Fatal(String),
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished(termination) => write!(f, "finished ({termination})"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Fatal(reason) => write!(f, "fatal: {reason}"),
        }
    }
}

/// A completion signal from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// The publication whose connection or flow finished.
    pub publication: PublicationId,
    /// How it finished.
    pub status: CompletionStatus,
}

impl Completion {
    /// Create a completion for a publication.
    pub fn new(publication: PublicationId, status: CompletionStatus) -> Self {
        Self {
            publication,
            status,
        }
    }
}
