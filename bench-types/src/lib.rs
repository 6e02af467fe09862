//! # netbench-types
//!
//! Shared model types for the netbench network-impairment harness.
//!
//! This crate provides the types used across all netbench crates:
//! - [`TestCase`] - One impairment profile plus its client count
//! - [`Settings`] - Process-wide configuration, built once at startup
//! - [`Completion`] - Completion signals with a terminal status
//! - [`PublicationId`] - Correlation id for test-case handoffs

#![warn(missing_docs)]
#![warn(clippy::all)]

mod completion;
mod error;
mod ids;
mod settings;
mod test_case;

pub use completion::{Completion, CompletionStatus, Termination};
pub use error::{SettingsError, TestCaseError};
pub use ids::PublicationId;
pub use settings::{CompletionSource, Protocol, Settings};
pub use test_case::{normalize_all, TestCase, DEFAULT_SEGMENT_SIZE, MAX_DATAGRAM_SIZE};
