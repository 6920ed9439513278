//! Sandcell Shim
//!
//! Entrypoint mounted into the container. It lowers the resource ceilings of
//! its own process and then replaces itself with the target command, so the
//! ceilings bind the target and everything it forks.
//!
//! Usage:
//!   sandcell-shim [--cpu-seconds N] [--memory-bytes N] [--max-processes N]
//!                 [--max-open-files N] [--allow-core-dumps] -- CMD [ARGS...]
//!
//! Nothing is written to stderr unless `SANDCELL_SHIM_LOG` holds a filter
//! (e.g. `debug`), since stderr belongs to the target.

use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;

use clap::Parser;
use sandcell::limits::{HostRlimits, ResourceLimitPolicy, ResourceLimits};
use tracing::debug;

/// Exit status when the command exists but cannot be executed
const EXIT_CANNOT_EXECUTE: i32 = 126;

/// Exit status when the command is not found
const EXIT_NOT_FOUND: i32 = 127;

#[derive(Parser, Debug)]
#[clap(name = "sandcell-shim", version)]
struct ShimArgs {
    #[clap(long)]
    cpu_seconds: Option<u32>,

    #[clap(long)]
    memory_bytes: Option<u64>,

    #[clap(long)]
    max_processes: Option<u32>,

    #[clap(long)]
    max_open_files: Option<u32>,

    #[clap(long)]
    allow_core_dumps: bool,

    /// Command to exec once the limits are in place
    #[clap(required = true, num_args = 1.., last = true)]
    command: Vec<String>,
}

impl ShimArgs {
    fn limits(&self) -> ResourceLimits {
        let defaults = ResourceLimits::default();
        ResourceLimits {
            cpu_seconds: self.cpu_seconds.unwrap_or(defaults.cpu_seconds),
            memory_bytes: self.memory_bytes.unwrap_or(defaults.memory_bytes),
            max_processes: self.max_processes.unwrap_or(defaults.max_processes),
            max_open_files: self.max_open_files.unwrap_or(defaults.max_open_files),
            core_dumps_allowed: self.allow_core_dumps,
        }
    }
}

fn main() {
    let args = ShimArgs::parse();
    init_logging();

    let report = ResourceLimitPolicy::new(args.limits()).apply(&mut HostRlimits);
    for outcome in report.outcomes() {
        debug!(outcome = %outcome, "Resource limit");
    }

    let (program, rest) = match args.command.split_first() {
        Some(parts) => parts,
        None => std::process::exit(EXIT_NOT_FOUND),
    };

    // Only returns on failure
    let err = Command::new(program).args(rest).exec();
    eprintln!("sandcell-shim: cannot execute {}: {}", program, err);
    std::process::exit(if err.kind() == io::ErrorKind::NotFound {
        EXIT_NOT_FOUND
    } else {
        EXIT_CANNOT_EXECUTE
    });
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let Ok(filter) = std::env::var("SANDCELL_SHIM_LOG") else {
        return;
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_runner_generated_args() {
        let limits = ResourceLimits {
            cpu_seconds: 5,
            memory_bytes: 64 << 20,
            max_processes: 8,
            max_open_files: 32,
            core_dumps_allowed: true,
        };

        let mut argv = vec!["sandcell-shim".to_string()];
        argv.extend(limits.shim_args());
        argv.extend(["--", "python3", "-c", "print(1)"].map(String::from));

        let args = ShimArgs::try_parse_from(argv).unwrap();
        assert_eq!(args.limits(), limits);
        assert_eq!(args.command, ["python3", "-c", "print(1)"]);
    }

    #[test]
    fn test_missing_flags_fall_back_to_defaults() {
        let args = ShimArgs::try_parse_from(["sandcell-shim", "--", "true"]).unwrap();
        assert_eq!(args.limits(), ResourceLimits::default());
    }

    #[test]
    fn test_command_is_required() {
        assert!(ShimArgs::try_parse_from(["sandcell-shim", "--cpu-seconds=1"]).is_err());
    }
}
