use std::path::{Path, PathBuf};

use crate::config::types::SandcellConfig;
use crate::error::{Result, SandcellError};

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "sandcell", "sandcell") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        // Fallback to home directory
        dirs_fallback().join(".sandcell").join("config.toml")
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(config_path: Option<&Path>) -> Result<SandcellConfig> {
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    if !path.exists() {
        // Return defaults if no config file exists
        return Ok(SandcellConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config: SandcellConfig =
        toml::from_str(&content).map_err(|e| SandcellError::TomlParse(e.to_string()))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.sandbox.timeout_seconds, 300);
    }

    #[test]
    fn test_invalid_file_is_toml_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sandbox\n").unwrap();
        assert!(matches!(
            load_config(Some(&path)),
            Err(SandcellError::TomlParse(_))
        ));
    }

    #[test]
    fn test_loads_limits_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[limits]\ncpu_seconds = 7\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.limits.cpu_seconds, 7);
    }
}
