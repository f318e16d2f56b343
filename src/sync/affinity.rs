//! CPU pinning for participant threads

use nix::{
    sched::{sched_getaffinity, sched_setaffinity, CpuSet},
    unistd::Pid,
};

use crate::error::{RingError, Result};

/// Restrict the calling thread to one CPU
pub fn pin_current_thread(core: usize) -> Result<()> {
    let mut set = CpuSet::new();
    set.set(core).map_err(|_| {
        RingError::invalid_argument(
            "core",
            format!("CPU {} exceeds the affinity mask ({} CPUs)", core, CpuSet::count()),
        )
    })?;

    // Pid 0 targets the calling thread
    sched_setaffinity(Pid::from_raw(0), &set)
        .map_err(|e| RingError::from_io(e.into(), "sched_setaffinity failed"))
}

/// CPUs the calling thread may run on
pub fn current_affinity() -> Result<Vec<usize>> {
    let set = sched_getaffinity(Pid::from_raw(0))
        .map_err(|e| RingError::from_io(e.into(), "sched_getaffinity failed"))?;

    Ok((0..CpuSet::count())
        .filter(|&cpu| set.is_set(cpu).unwrap_or(false))
        .collect())
}
