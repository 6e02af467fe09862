//! # netbench-core
//!
//! Pure logic for netbench (no I/O, instant tests).
//!
//! This crate implements the state machines and transforms of the harness
//! without any network, process or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects:
//! - [`ReorderBuffer`] decides which datagrams a flow direction emits
//! - [`RunState`] decides what the orchestrator does next
//! - [`TestPlan`] selects and normalizes the test-case sequence
//!
//! The actual I/O (sockets, client processes) is performed by
//! `netbench-relay`, which interprets the outputs of these modules.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod plan;
pub mod reorder;
pub mod state;

pub use plan::{PlannedCase, TestPlan};
pub use reorder::{Dispatch, ReorderBuffer};
pub use state::{Action, Event, RunState};
