pub mod cli;
pub mod config;
pub mod error;
pub mod limits;
pub mod sandbox;

pub use error::{Result, SandboxError, SandcellError};
pub use limits::{ResourceLimitPolicy, ResourceLimits};
pub use sandbox::{CommandLine, ExecutionResult, SandboxConfig, SandboxRunner};
