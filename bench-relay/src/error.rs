//! Error types for netbench-relay.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use netbench_types::TestCaseError;

/// Main error type for relay and orchestration operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Address could not be resolved.
    #[error("failed to resolve address {addr}: {reason}")]
    Resolve {
        /// The address as configured.
        addr: String,
        /// Why resolution failed.
        reason: String,
    },

    /// Listening socket could not be opened.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        /// The listen address as configured.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Upstream server could not be reached.
    #[error("failed to dial upstream server {addr}: {source} (is the server up and running?)")]
    Dial {
        /// The resolved upstream address.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Captured input file could not be read or written.
    #[error("captured input {path}: {source}")]
    Capture {
        /// Path of the capture file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Client process could not be started.
    #[error("failed to start client {command}: {reason}")]
    Client {
        /// The configured client command.
        command: String,
        /// Why the start failed.
        reason: String,
    },

    /// A publish or completion wait exceeded the configured bound.
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout {
        /// How long the wait lasted.
        waited: Duration,
        /// What was being waited for.
        what: &'static str,
    },

    /// The test-case handoff was dropped by the other side.
    #[error("test-case handoff closed")]
    HandoffClosed,

    /// A condition that makes further testing meaningless.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Invalid test-case sequence.
    #[error("test case error: {0}")]
    TestCase(#[from] TestCaseError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dial_error_mentions_server() {
        let err = RelayError::Dial {
            addr: "127.0.0.1:9".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        let text = err.to_string();
        assert!(text.contains("127.0.0.1:9"));
        assert!(text.contains("is the server up and running?"));
    }

    #[test]
    fn timeout_names_the_wait() {
        let err = RelayError::Timeout {
            waited: Duration::from_secs(5),
            what: "the client run to complete",
        };
        assert_eq!(
            err.to_string(),
            "timed out after 5s waiting for the client run to complete"
        );
    }

    #[test]
    fn test_case_error_converts() {
        let err: RelayError = TestCaseError::Empty.into();
        assert!(matches!(err, RelayError::TestCase(TestCaseError::Empty)));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RelayError>();
    }
}
