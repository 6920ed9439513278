//! Resource ceilings for the process that execs the sandboxed command.
//!
//! The policy lowers, never raises, the effective ceilings of the calling
//! process. Every step is independent: a limit the platform cannot express is
//! recorded in the [`LimitReport`] and the remaining steps still run.
//!
//! | Step | Resource | Rule |
//! |------|----------|------|
//! | 1 | `RLIMIT_CPU` | soft = hard = min(request, hard) |
//! | 2 | `RLIMIT_AS` | only when hard >= request |
//! | 3 | `RLIMIT_CORE` | 0 unless core dumps are allowed |
//! | 4 | `RLIMIT_NPROC` | only when soft > request |
//! | 5 | `RLIMIT_NOFILE` | soft = hard = min(request, hard) |

mod host;
mod policy;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use host::HostRlimits;
pub use policy::{DryRun, ResourceLimitPolicy, RlimitTable};

/// Value used for an unlimited ceiling (`RLIM_INFINITY` on Linux).
pub const UNLIMITED: u64 = u64::MAX;

/// Requested resource ceilings for a sandboxed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// CPU time in seconds
    pub cpu_seconds: u32,
    /// Address space in bytes
    pub memory_bytes: u64,
    /// Processes/threads for the sandbox user
    pub max_processes: u32,
    /// Open file descriptors
    pub max_open_files: u32,
    /// Leave the core dump ceiling untouched
    pub core_dumps_allowed: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_seconds: 30,
            memory_bytes: 1024 * 1024 * 1024,
            max_processes: 50,
            max_open_files: 256,
            core_dumps_allowed: false,
        }
    }
}

impl ResourceLimits {
    /// Arguments understood by `sandcell-shim`, in the shim's flag syntax.
    pub fn shim_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--cpu-seconds={}", self.cpu_seconds),
            format!("--memory-bytes={}", self.memory_bytes),
            format!("--max-processes={}", self.max_processes),
            format!("--max-open-files={}", self.max_open_files),
        ];
        if self.core_dumps_allowed {
            args.push("--allow-core-dumps".to_string());
        }
        args
    }
}

/// The resource kinds governed by the policy, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LimitKind {
    Cpu,
    AddressSpace,
    CoreDump,
    Processes,
    OpenFiles,
}

impl LimitKind {
    pub const ORDER: [LimitKind; 5] = [
        LimitKind::Cpu,
        LimitKind::AddressSpace,
        LimitKind::CoreDump,
        LimitKind::Processes,
        LimitKind::OpenFiles,
    ];
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LimitKind::Cpu => "cpu",
            LimitKind::AddressSpace => "address-space",
            LimitKind::CoreDump => "core",
            LimitKind::Processes => "processes",
            LimitKind::OpenFiles => "open-files",
        };
        f.pad(name)
    }
}

/// A soft/hard ceiling pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ceiling {
    pub soft: u64,
    pub hard: u64,
}

impl Ceiling {
    pub fn new(soft: u64, hard: u64) -> Self {
        Self { soft, hard }
    }

    /// Soft and hard set to the same value.
    pub fn fixed(value: u64) -> Self {
        Self::new(value, value)
    }

    pub fn unlimited() -> Self {
        Self::fixed(UNLIMITED)
    }
}

impl fmt::Display for Ceiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn part(value: u64) -> String {
            if value == UNLIMITED {
                "unlimited".to_string()
            } else {
                value.to_string()
            }
        }
        write!(f, "{}:{}", part(self.soft), part(self.hard))
    }
}

/// Why a policy step left a ceiling untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The caller asked to keep this resource as is
    NotRequested,
    /// The existing hard ceiling is already below the requested value
    HardCeilingBelowRequest { hard: u64 },
    /// The existing soft ceiling is already at or below the requested value
    AlreadyWithinRequest { soft: u64 },
    /// The platform has no such limit
    Unsupported,
    /// The isolation backend cannot deliver this limit
    UnsupportedByBackend,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotRequested => f.write_str("not requested"),
            SkipReason::HardCeilingBelowRequest { hard } => {
                write!(f, "hard ceiling {} is below the request", hard)
            }
            SkipReason::AlreadyWithinRequest { soft } => {
                write!(f, "soft ceiling {} is already within the request", soft)
            }
            SkipReason::Unsupported => f.write_str("unsupported on this platform"),
            SkipReason::UnsupportedByBackend => f.write_str("unsupported by isolation backend"),
        }
    }
}

/// Result of one policy step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LimitOutcome {
    Applied { kind: LimitKind, ceiling: Ceiling },
    Skipped { kind: LimitKind, reason: SkipReason },
    Failed { kind: LimitKind, error: String },
}

impl LimitOutcome {
    pub fn kind(&self) -> LimitKind {
        match self {
            LimitOutcome::Applied { kind, .. }
            | LimitOutcome::Skipped { kind, .. }
            | LimitOutcome::Failed { kind, .. } => *kind,
        }
    }
}

impl fmt::Display for LimitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitOutcome::Applied { kind, ceiling } => write!(f, "{:<14} applied {}", kind, ceiling),
            LimitOutcome::Skipped { kind, reason } => write!(f, "{:<14} skipped ({})", kind, reason),
            LimitOutcome::Failed { kind, error } => write!(f, "{:<14} failed ({})", kind, error),
        }
    }
}

/// Diagnostics of one policy pass, one outcome per step in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LimitReport {
    outcomes: Vec<LimitOutcome>,
}

impl LimitReport {
    pub fn new(outcomes: Vec<LimitOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn outcomes(&self) -> &[LimitOutcome] {
        &self.outcomes
    }

    /// Ceilings that were (or would be) set, in application order.
    pub fn applied(&self) -> impl Iterator<Item = (LimitKind, Ceiling)> + '_ {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            LimitOutcome::Applied { kind, ceiling } => Some((*kind, *ceiling)),
            _ => None,
        })
    }

    pub fn ceiling(&self, kind: LimitKind) -> Option<Ceiling> {
        self.applied()
            .find(|(applied, _)| *applied == kind)
            .map(|(_, ceiling)| ceiling)
    }

    pub fn is_applied(&self, kind: LimitKind) -> bool {
        self.ceiling(kind).is_some()
    }

    pub fn outcome(&self, kind: LimitKind) -> Option<&LimitOutcome> {
        self.outcomes.iter().find(|outcome| outcome.kind() == kind)
    }

    /// Downgrade an applied step the backend cannot deliver to a skip.
    pub fn mark_unsupported_by_backend(mut self, kind: LimitKind) -> Self {
        for outcome in &mut self.outcomes {
            if matches!(outcome, LimitOutcome::Applied { kind: k, .. } if *k == kind) {
                *outcome = LimitOutcome::Skipped {
                    kind,
                    reason: SkipReason::UnsupportedByBackend,
                };
            }
        }
        self
    }
}
