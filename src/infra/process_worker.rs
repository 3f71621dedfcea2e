use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    fs,
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    application::collaborators::{WorkerLoadError, WorkerPorts, WorkerRuntime},
    domain::view::{ViewRequest, ViewResponse},
};

pub const GET_VIEW_PORT: &str = "getView";
pub const RECEIVE_HTML_PORT: &str = "receiveHtml";
/// Node program that loads an artifact and bridges its ports to stdio.
/// Used with `node -e`, the artifact path being the last argument.
pub const NODE_WORKER_HOST: &str = include_str!("../../assets/worker-host.js");

const TARGET: &str = "infra::process_worker";
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const STDERR_CAPTURE_LIMIT: usize = 8 * 1024;

/// First line a worker prints once the artifact is loaded.
#[derive(Debug, Deserialize)]
struct Handshake {
    ports: Vec<String>,
}

/// Starts one child process per loaded artifact.
///
/// The program receives the configured arguments followed by the artifact
/// path. It must announce its ports on the first stdout line, then answer
/// newline-delimited JSON requests from stdin on stdout.
#[derive(Debug, Clone)]
pub struct ProcessRuntime {
    program: PathBuf,
    args: Vec<String>,
    handshake_timeout: Duration,
}

impl ProcessRuntime {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    async fn handshake(
        &self,
        lines: &mut Lines<BufReader<ChildStdout>>,
        stderr: JoinHandle<String>,
    ) -> Result<JoinHandle<String>, WorkerLoadError> {
        let first = match timeout(self.handshake_timeout, lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                let stderr = timeout(SHUTDOWN_GRACE, stderr)
                    .await
                    .ok()
                    .and_then(Result::ok)
                    .unwrap_or_default();
                return Err(WorkerLoadError::Exited { stderr });
            }
            Ok(Err(err)) => return Err(WorkerLoadError::Spawn(err)),
            Err(_) => {
                return Err(WorkerLoadError::InvalidShape(format!(
                    "worker did not announce its ports within {}s",
                    self.handshake_timeout.as_secs()
                )));
            }
        };

        let handshake: Handshake = serde_json::from_str(&first)
            .map_err(|err| WorkerLoadError::InvalidShape(format!("{err}: {first}")))?;
        for port in [GET_VIEW_PORT, RECEIVE_HTML_PORT] {
            if !handshake.ports.iter().any(|declared| declared == port) {
                return Err(WorkerLoadError::MissingPort(port.to_string()));
            }
        }
        Ok(stderr)
    }
}

#[async_trait]
impl WorkerRuntime for ProcessRuntime {
    async fn start(&self, artifact: &Path) -> Result<WorkerPorts, WorkerLoadError> {
        let metadata = fs::metadata(artifact)
            .await
            .map_err(WorkerLoadError::Unreadable)?;
        if !metadata.is_file() {
            return Err(WorkerLoadError::InvalidShape(format!(
                "{} is not a file",
                artifact.display()
            )));
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(artifact)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerLoadError::Spawn)?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(WorkerLoadError::Spawn(std::io::Error::other(
                "worker stdio was not captured",
            )));
        };

        let stderr_task = tokio::spawn(capture_stderr(stderr));
        let mut lines = BufReader::new(stdout).lines();
        // On failure the child is dropped here and killed.
        let _stderr_task = self.handshake(&mut lines, stderr_task).await?;

        let pid = child.id();
        info!(
            target = TARGET,
            op = "process_worker::start",
            result = "ok",
            pid = pid.unwrap_or_default(),
            artifact = %artifact.display(),
            "Worker announced its ports"
        );

        let (get_view, requests) = mpsc::unbounded_channel();
        let (responses, receive_html) = mpsc::unbounded_channel();
        let (writer_done_tx, writer_done) = oneshot::channel();

        tokio::spawn(async move {
            write_requests(stdin, requests).await;
            let _ = writer_done_tx.send(());
        });
        tokio::spawn(read_responses(lines, responses));
        tokio::spawn(supervise(child, writer_done));

        Ok(WorkerPorts {
            get_view,
            receive_html,
        })
    }
}

async fn write_requests(mut stdin: ChildStdin, mut requests: mpsc::UnboundedReceiver<ViewRequest>) {
    while let Some(request) = requests.recv().await {
        let mut line = match serde_json::to_string(&request) {
            Ok(line) => line,
            Err(err) => {
                warn!(
                    target = TARGET,
                    op = "process_worker::write",
                    result = "error",
                    request_id = request.id,
                    error = %err,
                    "Failed to encode render request"
                );
                continue;
            }
        };
        line.push('\n');
        if let Err(err) = stdin.write_all(line.as_bytes()).await {
            warn!(
                target = TARGET,
                op = "process_worker::write",
                result = "error",
                error = %err,
                "Worker stdin closed"
            );
            break;
        }
        if let Err(err) = stdin.flush().await {
            warn!(
                target = TARGET,
                op = "process_worker::write",
                result = "error",
                error = %err,
                "Failed to flush worker stdin"
            );
            break;
        }
    }
}

async fn read_responses<R>(mut lines: Lines<BufReader<R>>, responses: mpsc::UnboundedSender<ViewResponse>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(
                    target = TARGET,
                    op = "process_worker::read",
                    result = "error",
                    error = %err,
                    "Failed to read worker stdout"
                );
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ViewResponse>(&line) {
            Ok(response) => {
                if responses.send(response).is_err() {
                    break;
                }
            }
            Err(err) => warn!(
                target = TARGET,
                op = "process_worker::read",
                result = "discarded",
                error = %err,
                line = %line,
                "Discarded malformed worker output"
            ),
        }
    }
}

async fn capture_stderr<R>(stderr: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target = TARGET, op = "process_worker::stderr", line = %line, "Worker stderr");
        if captured.len() < STDERR_CAPTURE_LIMIT {
            captured.push_str(&line);
            captured.push('\n');
        }
    }
    captured
}

/// Wait for the worker to exit. Once nothing can send requests anymore the
/// worker gets a grace period to finish on its own before being killed.
async fn supervise(mut child: Child, writer_done: oneshot::Receiver<()>) {
    tokio::select! {
        status = child.wait() => log_exit(status),
        _ = writer_done => match timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(status) => log_exit(status),
            Err(_) => {
                if let Err(err) = child.kill().await {
                    warn!(
                        target = TARGET,
                        op = "process_worker::supervise",
                        result = "error",
                        error = %err,
                        "Failed to kill worker"
                    );
                } else {
                    debug!(
                        target = TARGET,
                        op = "process_worker::supervise",
                        result = "killed",
                        "Worker killed after shutdown grace period"
                    );
                }
            }
        },
    }
}

fn log_exit(status: std::io::Result<std::process::ExitStatus>) {
    match status {
        Ok(status) if status.success() => debug!(
            target = TARGET,
            op = "process_worker::supervise",
            result = "exited",
            "Worker exited"
        ),
        Ok(status) => warn!(
            target = TARGET,
            op = "process_worker::supervise",
            result = "error",
            exit_code = status.code().map(i64::from).unwrap_or(-1),
            "Worker exited with failure"
        ),
        Err(err) => warn!(
            target = TARGET,
            op = "process_worker::supervise",
            result = "error",
            error = %err,
            "Failed to wait for worker"
        ),
    }
}
