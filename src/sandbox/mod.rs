mod backends;
mod factory;
mod runner;
mod traits;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SandcellError};
use crate::limits::ResourceLimits;

pub use backends::{DockerBackend, INSTANCE_LABEL};
pub use factory::{available_backends, create_backend, BackendInfo};
pub use runner::SandboxRunner;
pub use traits::{Invocation, IsolationBackend, LaunchRequest};

/// Fixed path at which the host workdir is mounted inside the sandbox.
pub const GUEST_WORKDIR: &str = "/workspace";

/// Default wall-clock limit for a single run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default cap on the bytes kept from each of stdout and stderr.
pub const DEFAULT_MAX_OUTPUT_BYTES: u64 = 16 * 1024 * 1024;

/// Parameters of a sandboxed run, fixed at runner construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxConfig {
    /// Image (or profile) the isolation backend launches
    pub image_id: String,
    /// Host directory mounted read-write at [`GUEST_WORKDIR`]
    pub workdir: PathBuf,
    /// Wall-clock deadline for the whole run
    pub timeout: Duration,
    /// Ceilings applied to the process that execs the command
    pub limits: ResourceLimits,
    /// Bytes kept per output stream; the rest is read and discarded
    pub max_output_bytes: u64,
}

impl SandboxConfig {
    pub fn new(image_id: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            image_id: image_id.into(),
            workdir: workdir.into(),
            timeout: DEFAULT_TIMEOUT,
            limits: ResourceLimits::default(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: u64) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }
}

/// A non-empty argv.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine(Vec<String>);

impl CommandLine {
    pub fn new<I, S>(argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        if argv.is_empty() {
            return Err(SandcellError::EmptyCommand);
        }
        Ok(Self(argv))
    }

    pub fn program(&self) -> &str {
        &self.0[0]
    }

    pub fn args(&self) -> &[String] {
        &self.0[1..]
    }

    pub fn argv(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if arg.is_empty() || arg.contains(char::is_whitespace) || arg.contains('\'') {
                write!(f, "'{}'", arg.replace('\'', "'\\''"))?;
            } else {
                f.write_str(arg)?;
            }
        }
        Ok(())
    }
}

/// Outcome of a bounded execution, whatever the command's exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub wall_time: Duration,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Equal exit code and output, ignoring wall time.
    pub fn same_output_as(&self, other: &ExecutionResult) -> bool {
        self.exit_code == other.exit_code
            && self.stdout == other.stdout
            && self.stderr == other.stderr
    }
}
