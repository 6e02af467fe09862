//! Client process launching.
//!
//! The orchestrator starts clients through the [`ClientLauncher`] trait so
//! tests can substitute in-process clients for real executables.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use netbench_types::Settings;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};

use crate::capture::CaptureWriter;
use crate::error::{RelayError, Result};

/// What a client reads on stdin.
#[derive(Debug, Clone)]
pub enum ClientInput {
    /// Replay previously captured bytes, then close stdin.
    Replay(Arc<[u8]>),
    /// Forward the harness's own stdin and record it into `capture`.
    Tee {
        /// Capture file to write.
        capture: PathBuf,
    },
}

/// One client run requested by the orchestrator.
#[derive(Debug, Clone)]
pub struct ClientRun {
    /// Index of the test case in the loaded file.
    pub case_index: usize,
    /// Client number within the test case.
    pub client: usize,
    /// Input fed to the client.
    pub input: ClientInput,
}

/// How a client run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientOutcome {
    /// The process exited with this code (`None` when killed by a signal).
    Exited(Option<i32>),
    /// The run failed after the process was started.
    Failed(String),
}

impl ClientOutcome {
    /// Whether the client exited with status 0.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(Some(0)))
    }
}

impl std::fmt::Display for ClientOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(Some(code)) => write!(f, "exited with status {code}"),
            Self::Exited(None) => f.write_str("terminated by signal"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Report of a finished client run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientExit {
    /// Index of the test case in the loaded file.
    pub case_index: usize,
    /// Client number within the test case.
    pub client: usize,
    /// How the run ended.
    pub outcome: ClientOutcome,
}

/// Starts client runs.
#[async_trait]
pub trait ClientLauncher: Send + Sync + 'static {
    /// Run one client to completion.
    ///
    /// Returns [`RelayError::Client`] when the client cannot be started.
    async fn run(&self, run: ClientRun) -> Result<ClientExit>;
}

/// Launches the configured client executable.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    /// Launcher for `command` with `args`.
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// Launcher for the client configured in `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.client_command.clone(), settings.client_args.clone())
    }

    fn start_error(&self, reason: impl ToString) -> RelayError {
        RelayError::Client {
            command: self.command.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl ClientLauncher for ProcessLauncher {
    async fn run(&self, run: ClientRun) -> Result<ClientExit> {
        let ClientRun {
            case_index,
            client,
            input,
        } = run;

        // Open the capture before the client starts so a bad path fails fast.
        let capture = match &input {
            ClientInput::Tee { capture } => Some(CaptureWriter::create(capture).await?),
            ClientInput::Replay(_) => None,
        };

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.start_error(e))?;
        tracing::debug!(
            "Started client {} of test case #{} (pid {:?})",
            client,
            case_index,
            child.id()
        );

        let stdin = child.stdin.take();
        let mut feed = Box::pin(async move {
            match (input, capture) {
                (ClientInput::Tee { .. }, Some(writer)) => tee_stdin(stdin, writer).await,
                (ClientInput::Replay(bytes), _) => replay(stdin, &bytes).await,
                (ClientInput::Tee { .. }, None) => Ok(()),
            }
        });

        let mut feed_error = None;
        let status = tokio::select! {
            status = child.wait() => status,
            fed = &mut feed => {
                if let Err(e) = fed {
                    tracing::warn!("Error feeding client input: {}", e);
                    feed_error = Some(e);
                }
                child.wait().await
            }
        };

        let outcome = match (status, feed_error) {
            (Err(e), _) => ClientOutcome::Failed(e.to_string()),
            (Ok(_), Some(e)) => ClientOutcome::Failed(e.to_string()),
            (Ok(status), None) => ClientOutcome::Exited(status.code()),
        };
        tracing::debug!(
            "Client {} of test case #{} {}",
            client,
            case_index,
            outcome
        );

        Ok(ClientExit {
            case_index,
            client,
            outcome,
        })
    }
}

/// Write `bytes` to the client and close its stdin.
async fn replay(stdin: Option<ChildStdin>, bytes: &[u8]) -> Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    match stdin.write_all(bytes).await {
        Ok(()) => Ok(()),
        // Clients may exit without reading all of their input.
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            tracing::debug!("Client closed stdin early");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Copy the harness's stdin to the client while recording it.
///
/// Tokio reads stdin on a blocking thread that cannot be interrupted, so a
/// run that ends while stdin stays open leaves that read behind. The binary
/// shuts its runtime down without waiting for it.
async fn tee_stdin(child: Option<ChildStdin>, capture: CaptureWriter) -> Result<()> {
    tee(tokio::io::stdin(), child, capture).await
}

/// Copy `source` to the client until end-of-input, recording every chunk.
async fn tee<R>(
    mut source: R,
    mut child: Option<ChildStdin>,
    mut capture: CaptureWriter,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; 8192];

    loop {
        let read = source.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        capture.record(&buffer[..read]).await?;

        if let Some(pipe) = child.as_mut() {
            if let Err(e) = pipe.write_all(&buffer[..read]).await {
                tracing::debug!(
                    "Client stopped reading stdin after {} bytes: {}",
                    capture.written(),
                    e
                );
                child = None;
            }
        }
    }

    // Close the client's stdin before syncing the capture.
    drop(child);
    capture.finish().await?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: String) -> ProcessLauncher {
        ProcessLauncher::new("sh", vec!["-c".to_string(), script])
    }

    fn replay_run(bytes: &[u8]) -> ClientRun {
        ClientRun {
            case_index: 2,
            client: 1,
            input: ClientInput::Replay(Arc::from(bytes)),
        }
    }

    #[tokio::test]
    async fn replayed_input_reaches_client() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("stdin.txt");
        let launcher = sh(format!("cat > '{}'", out.display()));

        let exit = launcher.run(replay_run(b"hello\nworld\n")).await.unwrap();
        assert_eq!(exit.case_index, 2);
        assert_eq!(exit.client, 1);
        assert!(exit.outcome.is_success());
        assert_eq!(std::fs::read(&out).unwrap(), b"hello\nworld\n");
    }

    #[tokio::test]
    async fn exit_code_is_reported() {
        let exit = sh("exit 3".to_string())
            .run(replay_run(b""))
            .await
            .unwrap();
        assert_eq!(exit.outcome, ClientOutcome::Exited(Some(3)));
        assert!(!exit.outcome.is_success());
    }

    #[tokio::test]
    async fn client_ignoring_input_still_exits() {
        let big = vec![b'x'; 1 << 20];
        let exit = sh("exit 0".to_string()).run(replay_run(&big)).await.unwrap();
        assert!(exit.outcome.is_success());
    }

    #[tokio::test]
    async fn missing_executable_fails_to_start() {
        let launcher = ProcessLauncher::new("/nonexistent/netbench-client", Vec::new());
        let err = launcher.run(replay_run(b"x")).await.unwrap_err();
        assert!(matches!(err, RelayError::Client { .. }));
    }

    #[tokio::test]
    async fn tee_records_and_forwards_input() {
        let dir = TempDir::new().unwrap();
        let capture = dir.path().join("userInput.txt");
        let out = dir.path().join("stdin.txt");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(format!("cat > '{}'", out.display()))
            .stdin(Stdio::piped())
            .spawn()
            .unwrap();
        let writer = CaptureWriter::create(&capture).await.unwrap();

        let input: &[u8] = b"USER alice\nQUIT\n";
        tee(input, child.stdin.take(), writer).await.unwrap();
        assert!(child.wait().await.unwrap().success());

        assert_eq!(std::fs::read(&capture).unwrap(), input);
        assert_eq!(std::fs::read(&out).unwrap(), input);
    }

    #[tokio::test]
    async fn tee_keeps_recording_after_client_exits() {
        let dir = TempDir::new().unwrap();
        let capture = dir.path().join("userInput.txt");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg("exit 0")
            .stdin(Stdio::piped())
            .spawn()
            .unwrap();
        let stdin = child.stdin.take();
        assert!(child.wait().await.unwrap().success());

        let input = vec![b'x'; 1 << 20];
        let writer = CaptureWriter::create(&capture).await.unwrap();
        tee(&input[..], stdin, writer).await.unwrap();
        assert_eq!(std::fs::read(&capture).unwrap().len(), input.len());
    }

    #[test]
    fn outcome_display() {
        assert_eq!(
            ClientOutcome::Exited(Some(0)).to_string(),
            "exited with status 0"
        );
        assert_eq!(
            ClientOutcome::Failed("boom".to_string()).to_string(),
            "failed: boom"
        );
    }
}
