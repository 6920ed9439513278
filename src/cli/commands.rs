use std::io::Write;

use tracing::info;

use crate::cli::args::{ConfigAction, ConfigArgs, InitArgs, LimitsArgs, OutputFormat, RunArgs};
use crate::config::loader::get_config_path;
use crate::config::types::SandcellConfig;
use crate::error::{Result, SandcellError};
use crate::limits::ResourceLimitPolicy;
use crate::sandbox::{available_backends, create_backend, ExecutionResult, SandboxRunner};

// ============================================================================
// Execution Commands
// ============================================================================

/// Execute a command in a fresh sandbox
pub async fn run(args: RunArgs, config: SandcellConfig, format: OutputFormat) -> Result<()> {
    info!(command = ?args.command, workdir = %args.workdir.display(), "Running sandboxed command");

    let mut settings = config.sandbox.clone();
    if let Some(backend) = args.backend {
        settings.backend = backend;
    }

    let mut sandbox_config = config.sandbox_config(&args.workdir);
    if let Some(image) = args.image {
        sandbox_config.image_id = image;
    }
    if let Some(timeout) = args.timeout {
        sandbox_config.timeout = timeout;
    }
    if let Some(max_output) = args.max_output {
        sandbox_config.max_output_bytes = max_output;
    }
    sandbox_config.limits = args.limits.apply(sandbox_config.limits);

    let backend = create_backend(&settings)?;
    let runner = SandboxRunner::with_backend(sandbox_config, backend);
    let result = runner.run_argv(args.command).await?;

    output_execution_result(&result, format)
}

/// Show the resource-limit plan for this host
pub async fn limits(args: LimitsArgs, config: SandcellConfig, format: OutputFormat) -> Result<()> {
    let limits = args.limits.apply(config.limits);
    let report = ResourceLimitPolicy::new(limits).plan();

    match format {
        OutputFormat::Text => {
            for outcome in report.outcomes() {
                println!("{}", outcome);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// List isolation backends
pub async fn backends(format: OutputFormat) -> Result<()> {
    let backends = available_backends();

    match format {
        OutputFormat::Text => {
            println!("{:<10} {:<10} DESCRIPTION", "NAME", "STATUS");
            println!("{}", "-".repeat(60));
            for backend in &backends {
                let status = if backend.available {
                    "available".to_string()
                } else {
                    "missing".to_string()
                };
                let reason = backend
                    .unavailable_reason
                    .map(|r| format!(" ({})", r))
                    .unwrap_or_default();
                println!(
                    "{:<10} {:<10} {}{}",
                    backend.name, status, backend.description, reason
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&backends)?);
        }
    }

    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn init(args: InitArgs) -> Result<()> {
    let config_path = get_config_path();

    if config_path.exists() && !args.force {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    // Create parent directories if needed
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Write default configuration
    let default_config = SandcellConfig::default();
    let toml_str = toml::to_string_pretty(&default_config)
        .map_err(|e| SandcellError::Config(e.to_string()))?;

    std::fs::write(&config_path, toml_str)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # Run a command with the current directory mounted at /workspace");
    println!("  sandcell run -- ls -la");
    println!();
    println!("  # Tighten the limits for one run");
    println!("  sandcell run --timeout 30s --memory 256m --max-processes 16 -- make test");
    println!();
    println!("  # See which limits this host allows");
    println!("  sandcell limits");

    Ok(())
}

pub async fn config(args: ConfigArgs, config: SandcellConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&config)
                .map_err(|e| SandcellError::Config(e.to_string()))?;
            println!("{}", toml_str);
        }
        ConfigAction::Path => {
            println!("{}", get_config_path().display());
        }
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn output_execution_result(result: &ExecutionResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            std::io::stdout().write_all(&result.stdout)?;
            std::io::stderr().write_all(&result.stderr)?;
            std::io::stdout().flush()?;
            // Exit with the command's exit code
            if result.exit_code != 0 {
                std::process::exit(result.exit_code);
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "exit_code": result.exit_code,
                    "stdout": result.stdout_lossy(),
                    "stderr": result.stderr_lossy(),
                    "wall_time_ms": result.wall_time.as_millis() as u64,
                })
            );
        }
    }
    Ok(())
}
