//! Process resource monitoring
//!
//! Samples the resident memory of this process for the memory watchdog and
//! the per-request resource accounting.

#[cfg(target_os = "macos")]
use std::process::Command;

/// Resident set size of the current process in MB (best effort)
pub fn process_memory_mb() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        return process_memory_linux();
    }

    #[cfg(target_os = "macos")]
    {
        return process_memory_macos();
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// =============================================================================
// Linux
// =============================================================================

#[cfg(target_os = "linux")]
fn process_memory_linux() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss_kb(&status).map(|kb| kb / 1024)
}

/// Extract `VmRSS` (in kB) from the contents of `/proc/<pid>/status`
pub fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    // "VmRSS:	  123456 kB"
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    line.trim_start_matches("VmRSS:")
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse()
        .ok()
}

// =============================================================================
// macOS
// =============================================================================

/// `ps -o rss=` reports kilobytes
#[cfg(target_os = "macos")]
fn process_memory_macos() -> Option<u64> {
    let output = Command::new("ps")
        .args(["-o", "rss=", "-p", &std::process::id().to_string()])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let kb = String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse::<u64>()
        .ok()?;
    Some(kb / 1024)
}
