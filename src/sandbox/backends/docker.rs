use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::types::DockerConfig;
use crate::error::Result;
use crate::limits::{LimitKind, LimitReport, ResourceLimitPolicy, ResourceLimits, UNLIMITED};
use crate::sandbox::traits::{Invocation, IsolationBackend, LaunchRequest};
use crate::sandbox::GUEST_WORKDIR;

/// Path of the limit shim inside the container
const GUEST_SHIM_PATH: &str = "/.sandcell/shim";

/// Exit status of `docker run` / `podman run` when the runtime itself failed
/// (daemon error, image not found, invalid mount).
const RUNTIME_FAILURE_EXIT: i32 = 125;

/// Exit statuses of the runtime when the entrypoint could not be executed.
const ENTRYPOINT_EXEC_EXITS: [i32; 2] = [126, 127];

/// Label put on every instance so leftovers can be found.
pub const INSTANCE_LABEL: &str = "sandcell.instance";

/// Container sandbox backend.
///
/// Every run is a fresh `run --rm` container with a unique name, so nothing
/// outlives the call. Drives either the Docker CLI or the docker-compatible
/// Podman CLI.
pub struct DockerBackend {
    program: &'static str,
    config: DockerConfig,
}

impl DockerBackend {
    /// Create a backend driving the `docker` CLI.
    pub fn new(config: DockerConfig) -> Self {
        Self {
            program: "docker",
            config,
        }
    }

    /// Create a backend driving the `podman` CLI.
    pub fn podman(config: DockerConfig) -> Self {
        Self {
            program: "podman",
            config,
        }
    }

    /// Check if a container runtime CLI is installed and its daemon answers.
    pub fn runtime_available(program: &str) -> bool {
        if which::which(program).is_err() {
            return false;
        }
        match std::process::Command::new(program)
            .args(["info"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }

    /// Check that `path` can serve as the in-container shim.
    ///
    /// The shim is mounted into arbitrary images, so it must be a statically
    /// linked ELF executable (no program interpreter), e.g. a
    /// `x86_64-unknown-linux-musl` build.
    pub fn check_shim(path: &Path) -> std::result::Result<(), String> {
        let bytes = std::fs::read(path)
            .map_err(|e| format!("cannot read shim {}: {}", path.display(), e))?;
        let elf = goblin::elf::Elf::parse(&bytes)
            .map_err(|e| format!("shim {} is not an ELF executable: {}", path.display(), e))?;
        match elf.interpreter {
            None => Ok(()),
            Some(interp) => Err(format!(
                "shim {} is dynamically linked (interpreter {}); build it for a musl target",
                path.display(),
                interp
            )),
        }
    }

    /// Ceilings the runtime applies in the container process right before it
    /// execs the command. The runtime has no address-space ulimit; memory is
    /// bounded by the cgroup cap instead.
    pub fn ulimit_plan(limits: &ResourceLimits) -> LimitReport {
        ResourceLimitPolicy::new(*limits)
            .plan()
            .mark_unsupported_by_backend(LimitKind::AddressSpace)
    }

    fn ulimit_args(report: &LimitReport) -> Vec<String> {
        fn value(v: u64) -> String {
            if v == UNLIMITED {
                "-1".to_string()
            } else {
                v.to_string()
            }
        }

        report
            .applied()
            .filter_map(|(kind, ceiling)| {
                let name = match kind {
                    LimitKind::Cpu => "cpu",
                    LimitKind::CoreDump => "core",
                    LimitKind::Processes => "nproc",
                    LimitKind::OpenFiles => "nofile",
                    LimitKind::AddressSpace => return None,
                };
                Some(format!(
                    "--ulimit={}={}:{}",
                    name,
                    value(ceiling.soft),
                    value(ceiling.hard)
                ))
            })
            .collect()
    }
}

#[async_trait]
impl IsolationBackend for DockerBackend {
    fn name(&self) -> &str {
        self.program
    }

    fn is_available(&self) -> bool {
        Self::runtime_available(self.program)
    }

    fn invocation(&self, request: &LaunchRequest<'_>) -> Invocation {
        let config = request.config;
        let limits = &config.limits;

        let mut inv = Invocation::new(self.program);
        inv.args(["run", "--rm"]);
        inv.arg(format!("--name={}", request.instance));
        inv.arg(format!("--label={}={}", INSTANCE_LABEL, request.instance));

        // Resource caps enforced by the runtime's cgroup
        inv.arg(format!("--cpus={}", self.config.cpus));
        inv.arg(format!("--memory={}", limits.memory_bytes));
        inv.arg(format!("--memory-swap={}", limits.memory_bytes));
        inv.arg(format!("--pids-limit={}", limits.max_processes));

        // Workspace
        inv.arg("--mount");
        inv.arg(format!(
            "type=bind,source={},target={}",
            request.workdir.display(),
            GUEST_WORKDIR
        ));
        inv.args(["-w", GUEST_WORKDIR]);

        match &self.config.shim_path {
            Some(shim) => {
                inv.arg("--mount");
                inv.arg(format!(
                    "type=bind,source={},target={},readonly",
                    shim.display(),
                    GUEST_SHIM_PATH
                ));
                inv.arg(format!("--entrypoint={}", GUEST_SHIM_PATH));
                inv.arg(&config.image_id);
                inv.args(limits.shim_args());
                inv.arg("--");
            }
            None => {
                let report = Self::ulimit_plan(limits);
                for outcome in report.outcomes() {
                    debug!(instance = %request.instance, outcome = %outcome, "Planned ulimit");
                }
                inv.args(Self::ulimit_args(&report));
                inv.arg(&config.image_id);
            }
        }

        inv.args(request.command.argv().iter().cloned());
        inv
    }

    fn launch_failure(&self, exit_code: i32, stderr: &[u8]) -> Option<String> {
        let message = String::from_utf8_lossy(stderr).trim().to_string();

        // In shim mode the runtime reports an unusable entrypoint as 126/127,
        // naming the entrypoint path. Failures of the target come from the
        // shim itself and never carry that path.
        let shim_failed = self.config.shim_path.is_some()
            && ENTRYPOINT_EXEC_EXITS.contains(&exit_code)
            && message.contains(GUEST_SHIM_PATH);

        if exit_code != RUNTIME_FAILURE_EXIT && !shim_failed {
            return None;
        }
        if message.is_empty() {
            Some(format!("{} exited with status {}", self.program, exit_code))
        } else {
            Some(message)
        }
    }

    async fn teardown(&self, instance: &str) -> Result<()> {
        debug!(instance = %instance, "Removing container");

        let output = Command::new(self.program)
            .args(["rm", "-f", instance])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.to_lowercase().contains("no such container") {
            return Ok(());
        }

        Err(anyhow::anyhow!("Failed to remove container {}: {}", instance, stderr.trim()).into())
    }
}
