//! Settings and test-case file loading for netbench.
//!
//! Settings come from an optional TOML file and are then overridden by
//! command-line flags. Test cases come from a JSON array (the legacy
//! `testCases.json` format) or from a TOML file with `[[test_case]]` tables.

use std::path::{Path, PathBuf};

use netbench_types::{Protocol, Settings, SettingsError, TestCase};
use serde::Deserialize;

/// Load settings from a TOML file.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let content = read(path)?;
    toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })
}

#[derive(Debug, Deserialize)]
struct TestCaseFile {
    #[serde(default, rename = "test_case")]
    test_cases: Vec<TestCase>,
}

/// Load the test-case sequence.
///
/// Files ending in `.toml` are read as TOML; everything else as JSON.
pub fn load_test_cases(path: &Path) -> Result<Vec<TestCase>, ConfigError> {
    let content = read(path)?;

    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        let file: TestCaseFile = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        return Ok(file.test_cases);
    }

    serde_json::from_str(&content).map_err(|e| ConfigError::JsonError {
        path: path.to_path_buf(),
        source: e,
    })
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Command-line values that take precedence over the settings file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Upstream server address.
    pub server: Option<String>,
    /// Relay listen address.
    pub listen: Option<String>,
    /// Relay UDP instead of TCP.
    pub udp: bool,
    /// End runs on client exit.
    pub wait_for_clients: bool,
    /// Run a single test case.
    pub only: Option<usize>,
    /// Test-case file.
    pub test_cases: Option<PathBuf>,
    /// Captured input file.
    pub input_file: Option<PathBuf>,
    /// Client command followed by its arguments.
    pub client: Vec<String>,
}

impl Overrides {
    /// Apply to `settings` and validate the result.
    pub fn apply(self, mut settings: Settings) -> Result<Settings, ConfigError> {
        if let Some(server) = self.server {
            settings.server_address = server;
        }
        if let Some(listen) = self.listen {
            settings.listen_address = listen;
        }
        if self.udp {
            settings.protocol = Protocol::Udp;
        }
        if self.wait_for_clients {
            settings.wait_for_clients = true;
        }
        if self.only.is_some() {
            settings.only_test_case = self.only;
        }
        if let Some(path) = self.test_cases {
            settings.test_cases_file = path;
        }
        if let Some(path) = self.input_file {
            settings.input_file = path;
        }

        let mut client = self.client.into_iter();
        if let Some(command) = client.next() {
            settings.client_command = PathBuf::from(command);
            settings.client_args = client.collect();
        }

        settings.validate()?;
        Ok(settings)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a file.
    #[error("failed to read {path}: {source}")]
    ReadError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse a TOML file.
    #[error("failed to parse {path}: {source}")]
    ParseError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// Failed to parse a JSON file.
    #[error("failed to parse {path}: {source}")]
    JsonError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Settings are incomplete.
    #[error(transparent)]
    Invalid(#[from] SettingsError),
}
