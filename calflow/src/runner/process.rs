//! Real worker runner using `tokio::process::Command`.

use super::{RunningStage, StageRequest, StageRunner};
use crate::core::{ExitKind, ExitReason, StageName, StageResult};
use crate::errors::CalflowError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound on captured stderr kept as diagnostics.
const MAX_DIAGNOSTIC_BYTES: usize = 16 * 1024;

/// How long to wait for stderr to close once the worker has ended.
const DIAGNOSTICS_GRACE: Duration = Duration::from_secs(2);

/// Worker runner backed by real OS processes.
///
/// Children are spawned with stdin closed and `kill_on_drop` set, so a
/// dropped supervisor never leaks a process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Creates a new process runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageRunner for ProcessRunner {
    async fn spawn(
        &self,
        request: StageRequest,
        cancel: CancellationToken,
    ) -> Result<RunningStage, CalflowError> {
        let stage = request.stage();
        let mut cmd = tokio::process::Command::new(request.program());
        cmd.args(request.args())
            .current_dir(request.workdir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in request.env() {
            cmd.env(key, value);
        }

        debug!(
            stage = %stage,
            program = request.program(),
            args = ?request.display_args(),
            workdir = %request.workdir().display(),
            "spawning worker"
        );

        let mut child = cmd
            .spawn()
            .map_err(|source| CalflowError::WorkerSpawn { stage, source })?;

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                return Err(CalflowError::Internal(format!(
                    "worker for stage '{stage}' was spawned without piped output"
                )))
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor {
            stage,
            timeout: request.timeout(),
            cancel,
            started: Instant::now(),
        };
        let outcome = tokio::spawn(supervisor.run(child, stdout, stderr, tx));

        Ok(RunningStage::new(stage, rx, outcome))
    }
}

/// Drives one child process to completion.
struct Supervisor {
    stage: StageName,
    timeout: Duration,
    cancel: CancellationToken,
    started: Instant,
}

/// Why the supervisor stopped waiting on the child early.
enum Interrupt {
    TimedOut,
    Cancelled,
}

impl Supervisor {
    async fn run(
        self,
        mut child: Child,
        stdout: ChildStdout,
        stderr: ChildStderr,
        tx: mpsc::UnboundedSender<String>,
    ) -> StageResult {
        let captured = Diagnostics::default();
        let stderr_reader = tokio::spawn(capture_diagnostics(stderr, captured.clone()));
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut lines = Vec::new();
        let mut reader = BufReader::new(stdout).lines();
        let mut read_error = None;

        let interrupt = loop {
            tokio::select! {
                line = reader.next_line() => match line {
                    Ok(Some(line)) => {
                        // The receiver may be gone in whole-output mode; lines are still kept.
                        let _ = tx.send(line.clone());
                        lines.push(line);
                    }
                    Ok(None) => break None,
                    Err(e) => {
                        read_error = Some(e);
                        break None;
                    }
                },
                () = &mut deadline => break Some(Interrupt::TimedOut),
                () = self.cancel.cancelled() => break Some(Interrupt::Cancelled),
            }
        };
        drop(tx);

        let waited = match interrupt {
            Some(interrupt) => Err(interrupt),
            None => tokio::select! {
                status = child.wait() => Ok(status),
                () = &mut deadline => Err(Interrupt::TimedOut),
                () = self.cancel.cancelled() => Err(Interrupt::Cancelled),
            },
        };

        let result = match waited {
            Ok(Ok(status)) => {
                let diagnostics = collect_diagnostics(stderr_reader, &captured).await;
                self.classify(status, read_error, lines, diagnostics)
            }
            Ok(Err(e)) => {
                let diagnostics = collect_diagnostics(stderr_reader, &captured).await;
                self.fail(
                    lines,
                    ExitKind::OutputError,
                    format!("failed to wait for worker: {e}\n{diagnostics}"),
                )
            }
            Err(interrupt) => {
                if let Err(e) = child.kill().await {
                    warn!(stage = %self.stage, error = %e, "failed to kill worker");
                }
                let diagnostics = collect_diagnostics(stderr_reader, &captured).await;
                let kind = match interrupt {
                    Interrupt::TimedOut => ExitKind::TimedOut(self.timeout),
                    Interrupt::Cancelled => ExitKind::Cancelled,
                };
                self.fail(lines, kind, diagnostics)
            }
        };

        debug!(
            stage = %self.stage,
            status = %result.status,
            lines = result.lines.len(),
            duration_ms = result.duration_ms(),
            "worker finished"
        );
        result
    }

    fn classify(
        &self,
        status: ExitStatus,
        read_error: Option<std::io::Error>,
        lines: Vec<String>,
        diagnostics: String,
    ) -> StageResult {
        if let Some(e) = read_error {
            return self.fail(
                lines,
                ExitKind::OutputError,
                format!("stdout read failed: {e}\n{diagnostics}"),
            );
        }

        if status.success() {
            if !diagnostics.trim().is_empty() {
                debug!(
                    stage = %self.stage,
                    stderr = %diagnostics.trim(),
                    "worker wrote diagnostics"
                );
            }
            return StageResult::success(self.stage, lines, self.started.elapsed());
        }

        let kind = status.code().map_or(ExitKind::Signalled, ExitKind::Exited);
        self.fail(lines, kind, diagnostics)
    }

    fn fail(&self, lines: Vec<String>, kind: ExitKind, diagnostics: String) -> StageResult {
        StageResult::failed(
            self.stage,
            lines,
            ExitReason::new(kind, diagnostics),
            self.started.elapsed(),
        )
    }
}

/// Stderr captured so far, shared with the reader task so that text written
/// before a kill survives even when a grandchild keeps the pipe open.
#[derive(Debug, Clone, Default)]
struct Diagnostics(Arc<Mutex<Vec<u8>>>);

impl Diagnostics {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

async fn capture_diagnostics<R: AsyncRead + Unpin>(mut stream: R, captured: Diagnostics) {
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => return,
            // Past the cap the pipe is still drained so a chatty worker never blocks.
            Ok(n) => {
                let mut buf = captured.0.lock();
                let room = MAX_DIAGNOSTIC_BYTES.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                let note = format!("\nstderr unreadable: {e}");
                captured.0.lock().extend_from_slice(note.as_bytes());
                return;
            }
        }
    }
}

async fn collect_diagnostics(mut reader: JoinHandle<()>, captured: &Diagnostics) -> String {
    if tokio::time::timeout(DIAGNOSTICS_GRACE, &mut reader).await.is_err() {
        debug!("stderr still open after the worker ended; keeping what was captured");
        reader.abort();
    }
    captured.text()
}
