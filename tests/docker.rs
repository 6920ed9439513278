//! End-to-end runs against a real container runtime.
//!
//! Ignored by default: they need a reachable docker daemon and the `alpine`
//! image. Run with `cargo test --test docker -- --ignored`. The shim test
//! also needs `SANDCELL_SHIM_BIN` pointing at a static shim build:
//!
//! ```text
//! cargo build -p sandcell-shim --profile release-shim --target x86_64-unknown-linux-musl
//! export SANDCELL_SHIM_BIN=target/x86_64-unknown-linux-musl/release-shim/sandcell-shim
//! ```

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sandcell::config::types::{DockerConfig, SandboxSettings};
use sandcell::sandbox::{create_backend, DockerBackend, INSTANCE_LABEL};
use sandcell::{ResourceLimits, SandboxConfig, SandboxError, SandboxRunner};

fn runner(dir: &tempfile::TempDir, timeout: Duration) -> SandboxRunner {
    let config = SandboxConfig::new("alpine", dir.path()).with_timeout(timeout);
    SandboxRunner::with_backend(config, Arc::new(DockerBackend::new(DockerConfig::default())))
}

fn leftover_instances() -> String {
    let output = Command::new("docker")
        .args(["ps", "-aq", "--filter", &format!("label={}", INSTANCE_LABEL)])
        .output()
        .expect("docker ps");
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[tokio::test]
#[ignore = "requires a docker daemon and the alpine image"]
async fn test_echo_in_container() {
    let dir = tempfile::tempdir().unwrap();
    let result = runner(&dir, Duration::from_secs(300))
        .run_argv(["echo", "hi"])
        .await
        .unwrap();

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, b"hi\n");
}

#[tokio::test]
#[ignore = "requires a docker daemon and the alpine image"]
async fn test_timeout_leaves_no_container() {
    let dir = tempfile::tempdir().unwrap();
    let started = Instant::now();
    let err = runner(&dir, Duration::from_secs(2))
        .run_argv(["sleep", "10"])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        sandcell::SandcellError::Sandbox(SandboxError::Timeout { .. })
    ));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(leftover_instances(), "");
}

#[tokio::test]
#[ignore = "requires a docker daemon and the alpine image"]
async fn test_workspace_mount_is_read_write() {
    let dir = tempfile::tempdir().unwrap();
    let result = runner(&dir, Duration::from_secs(60))
        .run_argv(["sh", "-c", "echo data > /workspace/out.txt && pwd"])
        .await
        .unwrap();

    assert_eq!(result.stdout_lossy(), "/workspace\n");
    let written = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
    assert_eq!(written, "data\n");
}

#[tokio::test]
#[ignore = "requires a docker daemon and the alpine image"]
async fn test_ulimits_reach_the_command() {
    let dir = tempfile::tempdir().unwrap();
    let config = SandboxConfig::new("alpine", dir.path()).with_limits(ResourceLimits {
        cpu_seconds: 7,
        max_open_files: 64,
        ..Default::default()
    });
    let runner =
        SandboxRunner::with_backend(config, Arc::new(DockerBackend::new(DockerConfig::default())));

    let result = runner
        .run_argv(["sh", "-c", "ulimit -t; ulimit -n; ulimit -c"])
        .await
        .unwrap();

    assert_eq!(result.stdout_lossy(), "7\n64\n0\n");
}

#[tokio::test]
#[ignore = "requires a docker daemon"]
async fn test_missing_image_is_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = SandboxConfig::new("sandcell/does-not-exist:never", dir.path());
    let runner =
        SandboxRunner::with_backend(config, Arc::new(DockerBackend::new(DockerConfig::default())));

    let err = runner.run_argv(["true"]).await.unwrap_err();

    assert!(matches!(
        err,
        sandcell::SandcellError::Sandbox(SandboxError::SpawnFailure { .. })
    ));
    assert_eq!(leftover_instances(), "");
}

#[tokio::test]
#[ignore = "requires a docker daemon, the alpine image and SANDCELL_SHIM_BIN"]
async fn test_shim_applies_address_space_ceiling() {
    let shim = std::fs::canonicalize(PathBuf::from(
        std::env::var("SANDCELL_SHIM_BIN").expect("SANDCELL_SHIM_BIN"),
    ))
    .unwrap();

    let mut settings = SandboxSettings::default();
    settings.backend = sandcell::config::types::BackendType::Docker;
    settings.docker.shim_path = Some(shim);
    let backend = create_backend(&settings).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let config = SandboxConfig::new("alpine", dir.path()).with_limits(ResourceLimits {
        memory_bytes: 256 << 20,
        max_open_files: 64,
        ..Default::default()
    });
    let result = SandboxRunner::with_backend(config, backend)
        .run_argv(["sh", "-c", "ulimit -v; ulimit -n"])
        .await
        .unwrap();

    assert_eq!(result.exit_code, 0, "stderr: {}", result.stderr_lossy());
    assert_eq!(result.stdout_lossy(), "262144\n64\n");
}

#[tokio::test]
#[ignore = "requires a docker daemon, the alpine image and SANDCELL_SHIM_BIN"]
async fn test_shim_reports_missing_target_as_exit_code() {
    let shim = std::fs::canonicalize(PathBuf::from(
        std::env::var("SANDCELL_SHIM_BIN").expect("SANDCELL_SHIM_BIN"),
    ))
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let backend = DockerBackend::new(DockerConfig {
        shim_path: Some(shim),
        ..Default::default()
    });
    let result = SandboxRunner::with_backend(SandboxConfig::new("alpine", dir.path()), Arc::new(backend))
        .run_argv(["no-such-command"])
        .await
        .unwrap();

    assert_eq!(result.exit_code, 127);
}
