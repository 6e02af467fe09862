//! # netbench-relay
//!
//! Impairing relay and test-case orchestrator for netbench.
//!
//! This crate implements a relay that:
//! - Accepts TCP connections (or UDP datagrams) from client processes
//! - Forwards every byte to the real server and back
//! - Injects the impairments of the current test case on the way
//!   (segmenting, per-segment delay, forced reset, datagram reordering)
//! - Reports one completion signal per client run to the orchestrator
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────────────┐
//!  client process ──►│        netbench-relay        │──► server
//!  client process ──►│  ┌────────┐    ┌──────────┐  │
//!        ▲           │  │ tcp /  │◄───│ handoff  │  │
//!        │           │  │ udp    │    └────▲─────┘  │
//!        │           │  └───┬────┘         │        │
//!        │           │      ▼ completions  │publish │
//!        │           │  ┌──────────────────┴─────┐  │
//!        └───spawn───┼──│     orchestrator       │  │
//!                    │  └────────────────────────┘  │
//!                    └──────────────────────────────┘
//! ```
//!
//! ## Handoff
//!
//! Test cases travel from the orchestrator to the relay one publication at
//! a time. Each publication is consumed by exactly one connection handler
//! (TCP) or by the engine's consumer (UDP) before the next one is queued.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capture;
pub mod client;
pub mod engine;
pub mod error;
pub mod handoff;
pub mod net;
pub mod orchestrator;
pub mod tcp;
pub mod udp;

pub use capture::{read_capture, CaptureWriter};
pub use client::{ClientExit, ClientInput, ClientLauncher, ClientOutcome, ClientRun, ProcessLauncher};
pub use engine::{start_relay, RelayHandle};
pub use error::{RelayError, Result};
pub use handoff::{handoff, Consumed, Publisher, Subscriber};
pub use orchestrator::{Orchestrator, RunReport};
