use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::types::BackendType;
use crate::limits::ResourceLimits;

#[derive(Parser, Debug)]
#[clap(name = "sandcell")]
#[clap(version, about = "Run commands in resource-bounded container sandboxes")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "SANDCELL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a command in a fresh sandbox
    Run(RunArgs),

    /// Show which resource limits would be applied on this host
    Limits(LimitsArgs),

    /// List isolation backends and their availability
    Backends,

    /// Initialize a new sandcell configuration
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Host directory mounted read-write at /workspace
    #[clap(long, short = 'w', default_value = ".")]
    pub workdir: PathBuf,

    /// Image to launch (overrides configuration)
    #[clap(long)]
    pub image: Option<String>,

    /// Wall-clock timeout (e.g., "30s", "5m", "300")
    #[clap(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Isolation backend (overrides configuration)
    #[clap(long, value_enum)]
    pub backend: Option<BackendType>,

    /// Bytes kept from each output stream (e.g., "1m")
    #[clap(long, value_parser = parse_size)]
    pub max_output: Option<u64>,

    #[clap(flatten)]
    pub limits: LimitOverrides,

    /// Command and arguments to execute
    #[clap(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct LimitsArgs {
    #[clap(flatten)]
    pub limits: LimitOverrides,
}

/// Per-invocation overrides of the configured resource limits.
#[derive(Args, Debug, Default)]
pub struct LimitOverrides {
    /// CPU time ceiling in seconds
    #[clap(long)]
    pub cpu_seconds: Option<u32>,

    /// Memory ceiling (e.g., "512m", "1g", or bytes)
    #[clap(long, value_parser = parse_size)]
    pub memory: Option<u64>,

    /// Maximum number of processes
    #[clap(long)]
    pub max_processes: Option<u32>,

    /// Maximum number of open file descriptors
    #[clap(long)]
    pub max_open_files: Option<u32>,

    /// Leave the core dump ceiling untouched
    #[clap(long)]
    pub allow_core_dumps: bool,
}

impl LimitOverrides {
    pub fn apply(&self, base: ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            cpu_seconds: self.cpu_seconds.unwrap_or(base.cpu_seconds),
            memory_bytes: self.memory.unwrap_or(base.memory_bytes),
            max_processes: self.max_processes.unwrap_or(base.max_processes),
            max_open_files: self.max_open_files.unwrap_or(base.max_open_files),
            core_dumps_allowed: self.allow_core_dumps || base.core_dumps_allowed,
        }
    }
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
}

// ============================================================================
// Common Types
// ============================================================================

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Parse a duration (e.g., "30s", "5m", "1h"); bare numbers are seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();

    if s.is_empty() {
        return Err("Empty duration value".to_string());
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix("ms") {
        let millis: u64 = n
            .parse()
            .map_err(|_| format!("Invalid duration value: {}", s))?;
        return Ok(Duration::from_millis(millis));
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1u64)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60u64)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600u64)
    } else {
        // Assume seconds if no suffix
        (s.as_str(), 1u64)
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("Invalid duration value: {}", s))?;

    if num == 0 {
        return Err("Duration must be greater than zero".to_string());
    }

    num.checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("Duration too large: {}", s))
}

/// Parse a byte size (e.g., "512m", "1g", "64k"); bare numbers are bytes.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim().to_lowercase();
    let trimmed = s.strip_suffix('b').unwrap_or(&s);

    if trimmed.is_empty() {
        return Err("Empty size value".to_string());
    }

    let (num_str, multiplier) = if let Some(n) = trimmed.strip_suffix('k') {
        (n, 1u64 << 10)
    } else if let Some(n) = trimmed.strip_suffix('m') {
        (n, 1u64 << 20)
    } else if let Some(n) = trimmed.strip_suffix('g') {
        (n, 1u64 << 30)
    } else {
        (trimmed, 1u64)
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("Invalid size value: {}", s))?;

    num.checked_mul(multiplier)
        .ok_or_else(|| format!("Size too large: {}", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("60").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("0").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512m").unwrap(), 512 << 20);
        assert_eq!(parse_size("1g").unwrap(), 1 << 30);
        assert_eq!(parse_size("1GB").unwrap(), 1 << 30);
        assert_eq!(parse_size("64k").unwrap(), 64 << 10);
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_run_args_trailing_command() {
        let cli = Cli::try_parse_from([
            "sandcell", "run", "--timeout", "2s", "--memory", "256m", "--max-output", "1k", "--",
            "sh", "-c", "exit 3",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.timeout, Some(Duration::from_secs(2)));
        assert_eq!(args.limits.memory, Some(256 << 20));
        assert_eq!(args.max_output, Some(1024));
        assert_eq!(args.command, ["sh", "-c", "exit 3"]);
    }

    #[test]
    fn test_run_requires_command() {
        assert!(Cli::try_parse_from(["sandcell", "run"]).is_err());
    }

    #[test]
    fn test_limit_overrides_apply() {
        let overrides = LimitOverrides {
            cpu_seconds: Some(5),
            allow_core_dumps: true,
            ..Default::default()
        };
        let limits = overrides.apply(ResourceLimits::default());
        assert_eq!(limits.cpu_seconds, 5);
        assert_eq!(limits.max_open_files, 256);
        assert!(limits.core_dumps_allowed);
    }
}
