//! Error types for netbench model validation.

use thiserror::Error;

/// Errors raised while validating a [`TestCase`](crate::TestCase).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TestCaseError {
    /// Segment size must be at least one byte.
    #[error("test case {label}: segment size must be greater than zero")]
    ZeroSegmentSize {
        /// Display label of the offending test case.
        label: String,
    },

    /// Requested test-case index is outside the loaded sequence.
    #[error("test case index {index} out of range ({len} test cases loaded)")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of loaded test cases.
        len: usize,
    },

    /// No test cases were supplied.
    #[error("no test cases to run")]
    Empty,
}

/// Errors raised while validating [`Settings`](crate::Settings).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// Upstream server address missing.
    #[error("server address is not configured")]
    MissingServerAddress,

    /// Client command missing.
    #[error("client command is not configured")]
    MissingClientCommand,

    /// Completion timeout of zero would fail every wait immediately.
    #[error("completion timeout must be greater than zero")]
    ZeroCompletionTimeout,
}
