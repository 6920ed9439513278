use std::io;

use nix::sys::resource::{getrlimit, setrlimit, Resource};

use super::{Ceiling, LimitKind, RlimitTable};

/// Ceilings of the current process, through `getrlimit`/`setrlimit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostRlimits;

impl HostRlimits {
    fn resource(kind: LimitKind) -> io::Result<Resource> {
        match kind {
            LimitKind::Cpu => Ok(Resource::RLIMIT_CPU),
            LimitKind::CoreDump => Ok(Resource::RLIMIT_CORE),
            LimitKind::OpenFiles => Ok(Resource::RLIMIT_NOFILE),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitKind::AddressSpace => Ok(Resource::RLIMIT_AS),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitKind::Processes => Ok(Resource::RLIMIT_NPROC),
            #[cfg(not(any(target_os = "linux", target_os = "android")))]
            LimitKind::AddressSpace | LimitKind::Processes => {
                Err(io::Error::from(io::ErrorKind::Unsupported))
            }
        }
    }
}

impl RlimitTable for HostRlimits {
    fn get(&self, kind: LimitKind) -> io::Result<Ceiling> {
        let (soft, hard) = getrlimit(Self::resource(kind)?)?;
        Ok(Ceiling::new(soft, hard))
    }

    fn set(&mut self, kind: LimitKind, ceiling: Ceiling) -> io::Result<()> {
        setrlimit(Self::resource(kind)?, ceiling.soft, ceiling.hard)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::ResourceLimitPolicy;

    #[test]
    fn test_reads_open_files_ceiling() {
        let ceiling = HostRlimits.get(LimitKind::OpenFiles).unwrap();
        assert!(ceiling.soft > 0);
        assert!(ceiling.soft <= ceiling.hard);
    }

    #[test]
    fn test_host_plan_respects_hard_ceilings() {
        let report = ResourceLimitPolicy::default().plan();
        for (kind, ceiling) in report.applied() {
            let current = HostRlimits.get(kind).unwrap();
            assert!(ceiling.hard <= current.hard);
            assert!(ceiling.soft <= ceiling.hard);
        }
    }
}
