use std::sync::Arc;

use crate::config::types::{BackendType, SandboxSettings};
use crate::error::SandboxError;
use crate::sandbox::backends::DockerBackend;
use crate::sandbox::traits::IsolationBackend;

/// Backends known to this build, in `auto` preference order.
const REGISTERED: &[BackendType] = &[BackendType::Docker, BackendType::Podman];

/// Create an isolation backend based on the configuration.
///
/// `auto` picks the first registered backend whose runtime answers. A
/// configured shim must be usable inside any image.
pub fn create_backend(
    settings: &SandboxSettings,
) -> Result<Arc<dyn IsolationBackend>, SandboxError> {
    if let Some(shim) = &settings.docker.shim_path {
        DockerBackend::check_shim(shim).map_err(|cause| {
            SandboxError::IsolationBackendUnavailable {
                backend: program(&settings.backend).to_string(),
                cause,
            }
        })?;
    }
    let backend_type = resolve_backend_type(&settings.backend)?;
    Ok(instantiate(&backend_type, settings))
}

fn instantiate(backend_type: &BackendType, settings: &SandboxSettings) -> Arc<dyn IsolationBackend> {
    match backend_type {
        BackendType::Podman => Arc::new(DockerBackend::podman(settings.docker.clone())),
        BackendType::Docker | BackendType::Auto => {
            Arc::new(DockerBackend::new(settings.docker.clone()))
        }
    }
}

fn program(backend_type: &BackendType) -> &'static str {
    match backend_type {
        BackendType::Podman => "podman",
        BackendType::Docker | BackendType::Auto => "docker",
    }
}

/// Resolve the backend type, handling Auto selection.
fn resolve_backend_type(requested: &BackendType) -> Result<BackendType, SandboxError> {
    match requested {
        BackendType::Auto => REGISTERED
            .iter()
            .find(|candidate| DockerBackend::runtime_available(program(candidate)))
            .cloned()
            .ok_or_else(|| SandboxError::IsolationBackendUnavailable {
                backend: "auto".to_string(),
                cause: "No container runtime (docker, podman) is reachable".to_string(),
            }),
        other => {
            let name = program(other);
            if !DockerBackend::runtime_available(name) {
                return Err(SandboxError::IsolationBackendUnavailable {
                    backend: name.to_string(),
                    cause: format!(
                        "`{} info` failed. Ensure {} is installed and its daemon is running.",
                        name, name
                    ),
                });
            }
            Ok(other.clone())
        }
    }
}

/// Get information about available backends on this system.
pub fn available_backends() -> Vec<BackendInfo> {
    REGISTERED
        .iter()
        .map(|backend_type| {
            let name = program(backend_type);
            let available = DockerBackend::runtime_available(name);
            BackendInfo {
                name,
                available,
                description: match backend_type {
                    BackendType::Podman => "Podman container sandbox (rootless capable)",
                    _ => "Docker container sandbox",
                },
                unavailable_reason: if available {
                    None
                } else if which::which(name).is_err() {
                    Some("CLI not installed")
                } else {
                    Some("Daemon not accessible")
                },
            }
        })
        .collect()
}

/// Information about an isolation backend.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BackendInfo {
    pub name: &'static str,
    pub available: bool,
    pub description: &'static str,
    pub unavailable_reason: Option<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_order() {
        assert_eq!(REGISTERED, [BackendType::Docker, BackendType::Podman]);
    }

    #[test]
    fn test_available_backends_lists_every_registered() {
        let names: Vec<_> = available_backends().iter().map(|b| b.name).collect();
        assert_eq!(names, ["docker", "podman"]);
    }

    #[test]
    fn test_unusable_shim_makes_backend_unavailable() {
        let mut settings = SandboxSettings::default();
        settings.docker.shim_path = Some("/nonexistent/sandcell-shim".into());

        match create_backend(&settings) {
            Err(SandboxError::IsolationBackendUnavailable { cause, .. }) => {
                assert!(cause.contains("cannot read shim"));
            }
            Err(other) => panic!("expected unavailable backend, got {:?}", other),
            Ok(_) => panic!("expected unavailable backend"),
        }
    }

    #[test]
    fn test_instantiate_names() {
        let settings = SandboxSettings::default();
        assert_eq!(instantiate(&BackendType::Podman, &settings).name(), "podman");
        assert_eq!(instantiate(&BackendType::Docker, &settings).name(), "docker");
    }
}
