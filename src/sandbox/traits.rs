use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::Result;
use crate::sandbox::{CommandLine, SandboxConfig};

/// Everything a backend needs to build one isolated invocation.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    /// Unique name of the instance for this run
    pub instance: &'a str,
    /// Absolute host directory to mount at the guest workdir
    pub workdir: &'a Path,
    pub config: &'a SandboxConfig,
    pub command: &'a CommandLine,
}

/// A host process that runs the command inside the isolated environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Trait for isolation backends.
///
/// A backend turns a launch request into a host command and knows how to
/// destroy whatever that command created. It holds no per-run state.
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    /// Returns the backend name (e.g., "docker", "podman")
    fn name(&self) -> &str;

    /// Check if the backend runtime is reachable on this host.
    fn is_available(&self) -> bool;

    /// Build the host command for one run.
    fn invocation(&self, request: &LaunchRequest<'_>) -> Invocation;

    /// Classify an exit of the host command as a launch failure of the
    /// backend itself rather than an exit of the target.
    fn launch_failure(&self, _exit_code: i32, _stderr: &[u8]) -> Option<String> {
        None
    }

    /// Forcibly destroy the named instance. Must succeed when the instance
    /// is already gone.
    async fn teardown(&self, instance: &str) -> Result<()>;
}
