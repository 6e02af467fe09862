//! # netbench
//!
//! Network-impairment test harness.
//!
//! ## Commands
//!
//! - `collect`: run the client once through an unimpaired relay and record
//!   what it reads on stdin
//! - `test`: replay the recorded input through every configured test case
//!
//! ## Example
//!
//! ```bash
//! # Record the client's input
//! netbench --server example.com:80 collect -- nc localhost 3456
//!
//! # Run every test case in testCases.json
//! netbench --server example.com:80 test -- nc localhost 3456
//!
//! # Run only the third test case, relaying UDP
//! netbench --server example.com:53 --udp --only 2 test -- ./dns-client
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use netbench_core::TestPlan;
use netbench_relay::{read_capture, Orchestrator, ProcessLauncher, RelayError};
use netbench_types::Settings;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

mod config;

use config::Overrides;

/// Network-impairment test harness.
#[derive(Parser, Debug)]
#[command(name = "netbench")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log file, always written at debug level
    #[arg(long, global = true, default_value = "testbench.log")]
    log_file: PathBuf,

    /// Print debug output on stderr
    #[arg(short, long, global = true)]
    debug: bool,

    /// Upstream server address (host:port)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Relay listen address (host:port)
    #[arg(long, global = true)]
    listen: Option<String>,

    /// Relay UDP instead of TCP
    #[arg(long, global = true)]
    udp: bool,

    /// End each client run when the client exits instead of when its
    /// connection closes
    #[arg(long, global = true)]
    wait_for_clients: bool,

    /// Run only the test case at this index
    #[arg(long, global = true)]
    only: Option<usize>,

    /// Test-case file (JSON array, or TOML with [[test_case]] tables)
    #[arg(long, global = true)]
    test_cases: Option<PathBuf>,

    /// Captured client input
    #[arg(long, global = true)]
    input_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record the client's stdin through an unimpaired relay
    Collect {
        /// Client command and its arguments
        #[arg(last = true)]
        client: Vec<String>,
    },

    /// Replay the recorded input through every test case
    Test {
        /// Client command and its arguments
        #[arg(last = true)]
        client: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_file, cli.debug) {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli));
    // A collect run can leave a stdin read pending; don't wait for it.
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let file_settings = match &cli.config {
        Some(path) => config::load_settings(path)?,
        None => Settings::default(),
    };

    let (collect, client) = match cli.command {
        Commands::Collect { client } => (true, client),
        Commands::Test { client } => (false, client),
    };
    let overrides = Overrides {
        server: cli.server,
        listen: cli.listen,
        udp: cli.udp,
        wait_for_clients: cli.wait_for_clients,
        only: cli.only,
        test_cases: cli.test_cases,
        input_file: cli.input_file,
        client,
    };
    let settings = Arc::new(
        overrides
            .apply(file_settings)
            .context("Invalid settings")?,
    );

    if collect {
        run_collect(settings).await
    } else {
        run_test(settings).await
    }
}

async fn run_collect(settings: Arc<Settings>) -> Result<()> {
    let launcher = ProcessLauncher::from_settings(&settings);
    let capture = settings.input_file.clone();
    let orchestrator = Orchestrator::start(settings, launcher).await?;

    let report = orchestrator.run_collect(capture.clone()).await?;
    tracing::info!("Captured client input into {}", capture.display());
    tracing::debug!("Collect run: {}", report);
    Ok(())
}

async fn run_test(settings: Arc<Settings>) -> Result<()> {
    let captured = match read_capture(&settings.input_file).await {
        Ok(bytes) => bytes,
        Err(RelayError::Capture { path, source }) => {
            anyhow::bail!(
                "{}: {}, please run the 'collect' action first",
                path.display(),
                source
            );
        }
        Err(e) => return Err(e.into()),
    };

    let cases = config::load_test_cases(&settings.test_cases_file)?;
    tracing::debug!("Decoded {} test cases", cases.len());
    let plan = TestPlan::new(cases, settings.only_test_case)
        .with_context(|| format!("Invalid test cases in {}", settings.test_cases_file.display()))?;

    let launcher = ProcessLauncher::from_settings(&settings);
    let orchestrator = Orchestrator::start(settings, launcher).await?;
    let report = orchestrator.run_test(&plan, captured).await?;

    if !report.is_clean() {
        tracing::warn!("Some client runs failed or timed out: {}", report);
    }
    Ok(())
}

/// Install the stderr and log-file layers.
///
/// Stderr shows `info` (or `debug` with `-d`), overridable through
/// `RUST_LOG`. The log file always receives `debug`.
fn init_logging(log_file: &Path, debug: bool) -> Result<()> {
    let file = File::create(log_file)
        .with_context(|| format!("Failed to create log file {}", log_file.display()))?;

    let default_level = if debug { "debug" } else { "info" };
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(stderr_filter),
        )
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG),
        )
        .try_init()
        .context("Failed to install logger")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn client_command_after_separator() {
        let cli = Cli::try_parse_from([
            "netbench",
            "--server",
            "example.com:80",
            "-d",
            "test",
            "--",
            "nc",
            "-q",
            "1",
            "localhost",
            "3456",
        ])
        .unwrap();

        assert!(cli.debug);
        assert_eq!(cli.server.as_deref(), Some("example.com:80"));
        match cli.command {
            Commands::Test { client } => {
                assert_eq!(client, vec!["nc", "-q", "1", "localhost", "3456"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "netbench", "collect", "--udp", "--only", "2", "--", "client",
        ])
        .unwrap();
        assert!(cli.udp);
        assert_eq!(cli.only, Some(2));
        assert_eq!(cli.log_file, PathBuf::from("testbench.log"));
        assert!(matches!(cli.command, Commands::Collect { .. }));
    }

    #[test]
    fn action_is_required() {
        assert!(Cli::try_parse_from(["netbench", "--server", "h:1"]).is_err());
    }
}
