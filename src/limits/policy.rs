use std::collections::HashMap;
use std::io;

use tracing::debug;

use super::{Ceiling, HostRlimits, LimitKind, LimitOutcome, LimitReport, ResourceLimits, SkipReason};

/// Read/write access to a process's resource ceilings.
pub trait RlimitTable {
    fn get(&self, kind: LimitKind) -> io::Result<Ceiling>;

    fn set(&mut self, kind: LimitKind, ceiling: Ceiling) -> io::Result<()>;
}

/// Lowers the effective ceilings of a process to the configured limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceLimitPolicy {
    limits: ResourceLimits,
}

impl ResourceLimitPolicy {
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Run every step against `table`. Never fails; see the report.
    pub fn apply<T: RlimitTable + ?Sized>(&self, table: &mut T) -> LimitReport {
        let outcomes = LimitKind::ORDER
            .iter()
            .map(|&kind| {
                let outcome = self.apply_step(kind, table);
                debug!(kind = %kind, outcome = %outcome, "Resource limit step");
                outcome
            })
            .collect();
        LimitReport::new(outcomes)
    }

    /// Decisions the policy would take against `table`, leaving it untouched.
    pub fn plan_with<T: RlimitTable + ?Sized>(&self, table: &T) -> LimitReport {
        self.apply(&mut DryRun::new(table))
    }

    /// Decisions the policy would take for the current process.
    pub fn plan(&self) -> LimitReport {
        self.plan_with(&HostRlimits)
    }

    fn apply_step<T: RlimitTable + ?Sized>(&self, kind: LimitKind, table: &mut T) -> LimitOutcome {
        let current = match table.get(kind) {
            Ok(current) => current,
            Err(e) => return failure(kind, e),
        };

        let target = match self.target(kind, current) {
            Ok(target) => target,
            Err(reason) => return LimitOutcome::Skipped { kind, reason },
        };

        match table.set(kind, target) {
            Ok(()) => LimitOutcome::Applied {
                kind,
                ceiling: target,
            },
            Err(e) => failure(kind, e),
        }
    }

    fn target(&self, kind: LimitKind, current: Ceiling) -> Result<Ceiling, SkipReason> {
        let limits = &self.limits;
        match kind {
            LimitKind::Cpu => Ok(Ceiling::fixed(
                u64::from(limits.cpu_seconds).min(current.hard),
            )),
            LimitKind::AddressSpace => {
                if current.hard >= limits.memory_bytes {
                    Ok(Ceiling::fixed(limits.memory_bytes))
                } else {
                    Err(SkipReason::HardCeilingBelowRequest { hard: current.hard })
                }
            }
            LimitKind::CoreDump => {
                if limits.core_dumps_allowed {
                    Err(SkipReason::NotRequested)
                } else {
                    Ok(Ceiling::fixed(0))
                }
            }
            LimitKind::Processes => {
                let requested = u64::from(limits.max_processes);
                if current.soft > requested {
                    Ok(Ceiling::fixed(requested.min(current.hard)))
                } else {
                    Err(SkipReason::AlreadyWithinRequest { soft: current.soft })
                }
            }
            LimitKind::OpenFiles => Ok(Ceiling::fixed(
                u64::from(limits.max_open_files).min(current.hard),
            )),
        }
    }
}

fn failure(kind: LimitKind, e: io::Error) -> LimitOutcome {
    if e.kind() == io::ErrorKind::Unsupported {
        LimitOutcome::Skipped {
            kind,
            reason: SkipReason::Unsupported,
        }
    } else {
        LimitOutcome::Failed {
            kind,
            error: e.to_string(),
        }
    }
}

/// Reads through to an underlying table and records writes instead of
/// performing them.
pub struct DryRun<'a, T: RlimitTable + ?Sized> {
    inner: &'a T,
    written: HashMap<LimitKind, Ceiling>,
}

impl<'a, T: RlimitTable + ?Sized> DryRun<'a, T> {
    pub fn new(inner: &'a T) -> Self {
        Self {
            inner,
            written: HashMap::new(),
        }
    }
}

impl<T: RlimitTable + ?Sized> RlimitTable for DryRun<'_, T> {
    fn get(&self, kind: LimitKind) -> io::Result<Ceiling> {
        match self.written.get(&kind) {
            Some(ceiling) => Ok(*ceiling),
            None => self.inner.get(kind),
        }
    }

    fn set(&mut self, kind: LimitKind, ceiling: Ceiling) -> io::Result<()> {
        // Same validation the kernel performs for an unprivileged caller.
        let current = self.inner.get(kind)?;
        if ceiling.soft > ceiling.hard || ceiling.hard > current.hard {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        self.written.insert(kind, ceiling);
        Ok(())
    }
}
