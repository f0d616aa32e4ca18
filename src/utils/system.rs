// src/utils/system.rs: System functions

use std::thread;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use anyhow::{anyhow, Result};


/// Determines how many read workers to run.
///
/// # Returns
///
/// The available parallelism, falling back to the physical core count, then 1.
pub fn detect_workers() -> usize {
    match thread::available_parallelism() {
        Ok(n) => n.get(),
        Err(_) => System::physical_core_count().unwrap_or(1).max(1),
    }
}


/// Finds the amount of total and available RAM, keyed to OS
///
/// # Returns
///
/// Result<u64, u64> total ram, available ram
pub fn detect_ram() -> Result<(u64, u64)> {
    let (total_ram, available_ram) = if cfg!(target_os = "macos") {
        let refresh_kind = RefreshKind::nothing().with_memory(MemoryRefreshKind::everything());
        let mut system = System::new_with_specifics(refresh_kind);
        system.refresh_memory_specifics(MemoryRefreshKind::everything());
        let total = system.total_memory();
        (total, total.saturating_sub(system.used_memory()))
    } else {
        let mut system = System::new_with_specifics(RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()));
        system.refresh_memory();
        (system.total_memory(), system.available_memory())
    };

    if total_ram == 0 || available_ram == 0 {
        return Err(anyhow!("Failed to detect valid RAM values"));
    }

    Ok((total_ram, available_ram))
}
