//! CPU Affinity and Thread Priority Utilities
//!
//! Each benchmark session runs on its own OS thread. Pinning those threads to
//! distinct cores keeps the scheduler from migrating them mid-measurement,
//! which shows up as tail latency that belongs to the client, not the exchange.

use anyhow::Result;
use core_affinity::CoreId;

/// Pin the current thread to a specific CPU core
///
/// # Example
/// ```no_run
/// use rtlat_core::perf::cpu::pin_to_core;
/// pin_to_core(2).expect("Failed to pin to core 2");
/// ```
pub fn pin_to_core(core: usize) -> Result<()> {
    let core_id = CoreId { id: core };

    if core_affinity::set_for_current(core_id) {
        tracing::debug!("Pinned thread to CPU core {}", core);
        Ok(())
    } else {
        anyhow::bail!("Failed to pin thread to core {}", core)
    }
}

/// Set real-time thread priority (Linux only)
///
/// Requires CAP_SYS_NICE capability or root privileges.
#[cfg(target_os = "linux")]
pub fn set_realtime_priority(priority: i32) -> Result<()> {
    use libc::{sched_param, sched_setscheduler, SCHED_FIFO};

    let param = sched_param {
        sched_priority: priority,
    };

    // SAFETY: `param` is a valid sched_param and pid 0 targets the calling thread
    let rc = unsafe { sched_setscheduler(0, SCHED_FIFO, &param) };
    if rc == 0 {
        tracing::debug!("Set thread priority to SCHED_FIFO:{}", priority);
        Ok(())
    } else {
        anyhow::bail!(
            "Failed to set SCHED_FIFO:{} (may need CAP_SYS_NICE or root): {}",
            priority,
            std::io::Error::last_os_error()
        )
    }
}

/// Set real-time thread priority (non-Linux platforms)
///
/// On non-Linux platforms, this is a no-op with a warning.
#[cfg(not(target_os = "linux"))]
pub fn set_realtime_priority(_priority: i32) -> Result<()> {
    tracing::warn!("Real-time priority setting not supported on this platform");
    Ok(())
}

/// Get the number of available CPU cores
pub fn num_cores() -> usize {
    core_affinity::get_core_ids()
        .map(|ids| ids.len())
        .unwrap_or(1)
}

/// Assign one core per session, starting at `first_core`
///
/// Sessions beyond the last available core get `None` and float.
pub fn plan_session_cores(
    sessions: usize,
    first_core: usize,
    available: usize,
) -> Vec<Option<usize>> {
    (0..sessions)
        .map(|i| {
            let core = first_core + i;
            (core < available).then_some(core)
        })
        .collect()
}

/// Apply placement for the current session thread
///
/// Pinning failures are logged and the session runs unpinned.
pub fn place_session_thread(core: Option<usize>, realtime_priority: Option<i32>) {
    let Some(core) = core else {
        return;
    };
    if let Err(e) = pin_to_core(core) {
        tracing::warn!(core, error = %e, "running unpinned");
        return;
    }
    if let Some(priority) = realtime_priority {
        if let Err(e) = set_realtime_priority(priority) {
            tracing::warn!(core, error = %e, "keeping default scheduling policy");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_cores() {
        assert!(num_cores() > 0);
    }

    #[test]
    fn test_plan_session_cores() {
        assert_eq!(plan_session_cores(3, 1, 8), vec![Some(1), Some(2), Some(3)]);
        assert_eq!(plan_session_cores(3, 2, 4), vec![Some(2), Some(3), None]);
        assert!(plan_session_cores(0, 0, 4).is_empty());
    }

    #[test]
    fn test_pin_to_core() {
        if num_cores() > 1 {
            // May fail on macOS or in restricted containers
            let result = pin_to_core(0);
            println!("pin_to_core(0): {:?}", result);
        }
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_realtime_priority() {
        // Likely fails without privileges, must not panic
        let result = set_realtime_priority(1);
        println!("Realtime priority result: {:?}", result);
    }
}
