//! Process-wide settings.
//!
//! Settings are decoded once at startup (TOML file plus command-line
//! overrides), validated, and then passed to every component as
//! `Arc<Settings>`. Nothing mutates them afterwards.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::SettingsError;

/// Transport relayed by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Stream relay with segmenting, delay and reset.
    #[default]
    Tcp,
    /// Datagram relay with per-flow pooling and reordering.
    Udp,
}

/// Which signal ends one client run of a test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSource {
    /// The relay reported the end of the connection it handled.
    Relay,
    /// The client process exited.
    ClientExit,
}

/// Harness settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Address the relay listens on (default: localhost:3456).
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Upstream server address.
    #[serde(default)]
    pub server_address: String,

    /// Relayed transport (default: tcp).
    #[serde(default)]
    pub protocol: Protocol,

    /// Client executable.
    #[serde(default)]
    pub client_command: PathBuf,

    /// Arguments passed to the client executable.
    #[serde(default)]
    pub client_args: Vec<String>,

    /// Use client exit instead of relay completion to end a run.
    #[serde(default)]
    pub wait_for_clients: bool,

    /// Run only the test case at this index.
    #[serde(default)]
    pub only_test_case: Option<usize>,

    /// Captured client input (default: userInput.txt).
    #[serde(default = "default_input_file")]
    pub input_file: PathBuf,

    /// Test-case sequence file (default: testCases.json).
    #[serde(default = "default_test_cases_file")]
    pub test_cases_file: PathBuf,

    /// Upper bound for every publish and completion wait (default: 300s).
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,

    /// Time given to in-flight datagrams before a UDP flush (default: 1000ms).
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

fn default_listen_address() -> String {
    "localhost:3456".to_string()
}

fn default_input_file() -> PathBuf {
    PathBuf::from("userInput.txt")
}

fn default_test_cases_file() -> PathBuf {
    PathBuf::from("testCases.json")
}

fn default_completion_timeout_secs() -> u64 {
    300
}

fn default_settle_delay_ms() -> u64 {
    1000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            server_address: String::new(),
            protocol: Protocol::default(),
            client_command: PathBuf::new(),
            client_args: Vec::new(),
            wait_for_clients: false,
            only_test_case: None,
            input_file: default_input_file(),
            test_cases_file: default_test_cases_file(),
            completion_timeout_secs: default_completion_timeout_secs(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl Settings {
    /// Check that every required field is present.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.server_address.trim().is_empty() {
            return Err(SettingsError::MissingServerAddress);
        }
        if self.client_command.as_os_str().is_empty() {
            return Err(SettingsError::MissingClientCommand);
        }
        if self.completion_timeout_secs == 0 {
            return Err(SettingsError::ZeroCompletionTimeout);
        }
        Ok(())
    }

    /// The authoritative completion source.
    ///
    /// A datagram relay never sees the end of a conversation, so UDP runs
    /// always end on client exit.
    pub fn completion_source(&self) -> CompletionSource {
        if self.wait_for_clients || self.protocol == Protocol::Udp {
            CompletionSource::ClientExit
        } else {
            CompletionSource::Relay
        }
    }

    /// Bound applied to each publish and completion wait.
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }

    /// Pause before flushing UDP reorder buffers.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
