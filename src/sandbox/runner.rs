use std::io;
use std::path::{Path, PathBuf};
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::types::DockerConfig;
use crate::error::{Result, SandboxError};
use crate::sandbox::backends::DockerBackend;
use crate::sandbox::traits::{IsolationBackend, LaunchRequest};
use crate::sandbox::{CommandLine, ExecutionResult, SandboxConfig};

/// Budget for teardown, the killed client process and its pipes, shared by
/// all three after the deadline or a launch failure.
const KILL_GRACE: Duration = Duration::from_secs(5);

type Capture = JoinHandle<io::Result<Vec<u8>>>;

/// Runs one command per call in a fresh, resource-bounded instance.
///
/// The runner holds only immutable configuration; concurrent calls each get
/// their own instance.
pub struct SandboxRunner {
    config: SandboxConfig,
    backend: Arc<dyn IsolationBackend>,
}

impl SandboxRunner {
    /// Create a runner on the Docker backend with default runtime settings.
    pub fn new(config: SandboxConfig) -> Self {
        Self::with_backend(config, Arc::new(DockerBackend::new(DockerConfig::default())))
    }

    pub fn with_backend(config: SandboxConfig, backend: Arc<dyn IsolationBackend>) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn IsolationBackend {
        self.backend.as_ref()
    }

    /// Validate `argv` and run it.
    pub async fn run_argv<I, S>(&self, argv: I) -> Result<ExecutionResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = CommandLine::new(argv)?;
        Ok(self.run(&command).await?)
    }

    /// Execute `command` once inside the isolated environment.
    ///
    /// A non-zero exit of the command is returned as an [`ExecutionResult`].
    /// The instance is destroyed before this returns, on every path.
    pub async fn run(&self, command: &CommandLine) -> std::result::Result<ExecutionResult, SandboxError> {
        let workdir =
            resolve_workdir(&self.config.workdir).map_err(|cause| spawn_failure(command, cause))?;

        let instance = instance_name();
        let invocation = self.backend.invocation(&LaunchRequest {
            instance: &instance,
            workdir: &workdir,
            config: &self.config,
            command,
        });

        info!(
            backend = %self.backend.name(),
            instance = %instance,
            image = %self.config.image_id,
            command = %command,
            timeout_secs = self.config.timeout.as_secs_f64(),
            "Starting sandboxed command"
        );

        let mut cmd = invocation.command();
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            spawn_failure(command, format!("failed to start {}: {}", invocation.program, e))
        })?;
        let mut guard = InstanceGuard::new(Arc::clone(&self.backend), instance);

        let cap = self.config.max_output_bytes;
        let mut stdout = tokio::spawn(capture(child.stdout.take(), cap, "stdout"));
        let mut stderr = tokio::spawn(capture(child.stderr.take(), cap, "stderr"));

        let waited = tokio::time::timeout(
            self.config.timeout,
            wait_all(&mut child, &mut stdout, &mut stderr),
        )
        .await;

        match waited {
            Ok(Ok((status, stdout, stderr))) => {
                let wall_time = started.elapsed();
                let exit_code = exit_code(status);

                if let Some(cause) = self.backend.launch_failure(exit_code, &stderr) {
                    guard.teardown(grace_deadline()).await;
                    return Err(spawn_failure(command, cause));
                }
                guard.disarm();

                info!(
                    instance = %guard.instance,
                    exit_code = exit_code,
                    elapsed_ms = wall_time.as_millis() as u64,
                    stdout_len = stdout.len(),
                    stderr_len = stderr.len(),
                    "Sandboxed command completed"
                );

                Ok(ExecutionResult {
                    exit_code,
                    stdout,
                    stderr,
                    wall_time,
                })
            }
            Ok(Err(e)) => {
                let _ = child.start_kill();
                guard.teardown(grace_deadline()).await;
                Err(spawn_failure(
                    command,
                    format!("failed to collect output of {}: {}", invocation.program, e),
                ))
            }
            Err(_) => {
                let elapsed = started.elapsed();
                warn!(
                    instance = %guard.instance,
                    limit_secs = self.config.timeout.as_secs_f64(),
                    command = %command,
                    "Sandboxed command timed out, terminating"
                );

                let grace = grace_deadline();
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "Client process already exited");
                }
                guard.teardown(grace).await;
                if tokio::time::timeout_at(grace, child.wait()).await.is_err() {
                    warn!(instance = %guard.instance, "Client process still running after kill");
                }

                let partial_stdout = settle(stdout, grace).await;
                let partial_stderr = settle(stderr, grace).await;
                debug!(
                    instance = %guard.instance,
                    stdout_len = partial_stdout.len(),
                    stderr_len = partial_stderr.len(),
                    "Discarded output of timed out command"
                );

                Err(SandboxError::Timeout {
                    elapsed,
                    limit: self.config.timeout,
                    command: command.to_string(),
                })
            }
        }
    }
}

/// Owns the instance name for the duration of a run and destroys the
/// instance if the run future is dropped early.
struct InstanceGuard {
    backend: Arc<dyn IsolationBackend>,
    instance: String,
    armed: bool,
}

impl InstanceGuard {
    fn new(backend: Arc<dyn IsolationBackend>, instance: String) -> Self {
        Self {
            backend,
            instance,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Destroy the instance, giving up at `deadline`.
    async fn teardown(&mut self, deadline: tokio::time::Instant) {
        self.armed = false;
        let removal = self.backend.teardown(&self.instance);
        match tokio::time::timeout_at(deadline, removal).await {
            Ok(Ok(())) => debug!(instance = %self.instance, "Instance torn down"),
            Ok(Err(e)) => {
                warn!(instance = %self.instance, error = %e, "Failed to tear down instance")
            }
            Err(_) => warn!(
                instance = %self.instance,
                grace_secs = KILL_GRACE.as_secs(),
                "Teardown did not finish in time, instance may be left behind"
            ),
        }
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(instance = %self.instance, "No runtime to tear down abandoned instance");
            return;
        };
        let backend = Arc::clone(&self.backend);
        let instance = std::mem::take(&mut self.instance);
        handle.spawn(async move {
            if let Err(e) = backend.teardown(&instance).await {
                warn!(instance = %instance, error = %e, "Failed to tear down abandoned instance");
            }
        });
    }
}

/// Read up to `cap` bytes of a stream, then drain the rest so the target
/// never blocks on a full pipe.
async fn capture<R: AsyncRead + Unpin>(
    reader: Option<R>,
    cap: u64,
    stream: &'static str,
) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        (&mut reader).take(cap).read_to_end(&mut buf).await?;
        let discarded = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
        if discarded > 0 {
            warn!(stream, kept = buf.len(), discarded, "Output truncated");
        }
    }
    Ok(buf)
}

async fn wait_all(
    child: &mut Child,
    stdout: &mut Capture,
    stderr: &mut Capture,
) -> io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let status = child.wait().await?;
    let stdout = stdout.await.map_err(io::Error::other)??;
    let stderr = stderr.await.map_err(io::Error::other)??;
    Ok((status, stdout, stderr))
}

/// Output captured so far; gives up at `deadline` on pipes still held open
/// by strays.
async fn settle(mut task: Capture, deadline: tokio::time::Instant) -> Vec<u8> {
    match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(Ok(Ok(buf))) => buf,
        Ok(_) => Vec::new(),
        Err(_) => {
            task.abort();
            Vec::new()
        }
    }
}

fn grace_deadline() -> tokio::time::Instant {
    tokio::time::Instant::now() + KILL_GRACE
}

/// Absolute form of `workdir`. Container runtimes reject relative bind
/// sources.
fn resolve_workdir(workdir: &Path) -> std::result::Result<PathBuf, String> {
    let resolved = std::fs::canonicalize(workdir)
        .map_err(|e| format!("workdir {} is not usable: {}", workdir.display(), e))?;
    if !resolved.is_dir() {
        return Err(format!(
            "workdir {} is not an existing directory",
            workdir.display()
        ));
    }
    Ok(resolved)
}

/// Exit code of the host process; a signal `n` is reported as `128 + n`.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

fn spawn_failure(command: &CommandLine, cause: String) -> SandboxError {
    SandboxError::SpawnFailure {
        command: command.to_string(),
        cause,
    }
}

/// Generate a unique instance name
fn instance_name() -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);

    format!(
        "sandcell-{}-{}-{}",
        std::process::id(),
        format_base36(timestamp),
        format_base36(u64::from(counter))
    )
}

/// Format a number as base36 string
fn format_base36(mut n: u64) -> String {
    const CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if n == 0 {
        return "0".to_string();
    }

    let mut result = Vec::new();
    while n > 0 {
        result.push(CHARS[(n % 36) as usize] as char);
        n /= 36;
    }
    result.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_base36() {
        assert_eq!(format_base36(0), "0");
        assert_eq!(format_base36(10), "a");
        assert_eq!(format_base36(35), "z");
        assert_eq!(format_base36(36), "10");
    }

    #[test]
    fn test_instance_names_are_unique() {
        let a = instance_name();
        let b = instance_name();
        assert_ne!(a, b);
        assert!(a.starts_with("sandcell-"));
    }

    #[test]
    fn test_relative_workdir_is_made_absolute() {
        let resolved = resolve_workdir(Path::new("src")).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("src"));
    }

    #[test]
    fn test_unusable_workdir_is_rejected() {
        let err = resolve_workdir(Path::new("no-such-dir")).unwrap_err();
        assert!(err.contains("no-such-dir"));

        let err = resolve_workdir(Path::new("Cargo.toml")).unwrap_err();
        assert!(err.contains("not an existing directory"));
    }

    #[tokio::test]
    async fn test_capture_keeps_prefix_and_drains_rest() {
        let data = vec![b'y'; 10_000];
        let buf = capture(Some(&data[..]), 100, "stdout").await.unwrap();
        assert_eq!(buf, vec![b'y'; 100]);
    }

    #[test]
    fn test_signal_exit_code() {
        let status = ExitStatus::from_raw(9);
        assert_eq!(exit_code(status), 137);
        let status = ExitStatus::from_raw(3 << 8);
        assert_eq!(exit_code(status), 3);
    }
}
