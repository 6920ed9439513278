use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::limits::ResourceLimits;
use crate::sandbox::{SandboxConfig, DEFAULT_MAX_OUTPUT_BYTES};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SandcellConfig {
    pub sandbox: SandboxSettings,
    pub limits: ResourceLimits,
}

impl SandcellConfig {
    /// Sandbox parameters for a run in `workdir`.
    pub fn sandbox_config(&self, workdir: impl Into<PathBuf>) -> SandboxConfig {
        SandboxConfig::new(self.sandbox.image.clone(), workdir)
            .with_timeout(Duration::from_secs(self.sandbox.timeout_seconds))
            .with_limits(self.limits)
            .with_max_output_bytes(self.sandbox.max_output_bytes)
    }
}

/// The type of isolation backend to use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Docker container sandbox
    Docker,
    /// Podman container sandbox
    Podman,
    /// Automatically select the first reachable runtime
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Which backend to use
    pub backend: BackendType,
    /// Image launched for every run
    pub image: String,
    /// Command timeout in seconds
    pub timeout_seconds: u64,
    /// Bytes kept from each of stdout and stderr
    pub max_output_bytes: u64,
    /// Container runtime configuration
    pub docker: DockerConfig,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            image: "alpine:latest".to_string(),
            timeout_seconds: 300,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            docker: DockerConfig::default(),
        }
    }
}

/// Container runtime configuration, shared by docker and podman.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// CPU share cap in cores (default: 1.0)
    pub cpus: f64,
    /// Host path of `sandcell-shim`. When set, the shim is mounted into the
    /// container and applies the resource limits before exec'ing the command;
    /// otherwise the limits are passed as runtime ulimits.
    pub shim_path: Option<PathBuf>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            cpus: 1.0,
            shim_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: SandcellConfig = toml::from_str("").unwrap();
        assert_eq!(config.sandbox.backend, BackendType::Auto);
        assert_eq!(config.sandbox.timeout_seconds, 300);
        assert_eq!(config.limits, ResourceLimits::default());
    }

    #[test]
    fn test_parse_full_config() {
        let config: SandcellConfig = toml::from_str(
            r#"
            [sandbox]
            backend = "podman"
            image = "busybox"
            timeout_seconds = 2
            max_output_bytes = 4096

            [sandbox.docker]
            cpus = 0.5
            shim_path = "/opt/sandcell-shim"

            [limits]
            max_processes = 8
            core_dumps_allowed = true
            "#,
        )
        .unwrap();

        assert_eq!(config.sandbox.backend, BackendType::Podman);
        assert_eq!(config.sandbox.docker.cpus, 0.5);
        assert_eq!(config.limits.max_processes, 8);
        assert!(config.limits.core_dumps_allowed);

        let sandbox = config.sandbox_config("/tmp/x");
        assert_eq!(sandbox.image_id, "busybox");
        assert_eq!(sandbox.timeout, Duration::from_secs(2));
        assert_eq!(sandbox.limits.max_processes, 8);
        assert_eq!(sandbox.max_output_bytes, 4096);
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&SandcellConfig::default()).unwrap();
        let parsed: SandcellConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.sandbox.image, "alpine:latest");
    }
}
