//! Memory watchdog
//!
//! A background thread samples process memory once per interval and publishes
//! the reading through a shared [`MemoryGuard`]. Request handlers consult the
//! guard before doing any model work.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Memory usage {usage_mb} MB exceeds limit of {limit_mb} MB")]
pub struct MemoryLimitExceeded {
    pub usage_mb: u64,
    pub limit_mb: u64,
}

/// Latest memory reading and whether it is over the ceiling
#[derive(Debug)]
pub struct MemoryGuard {
    limit_mb: u64,
    last_usage_mb: AtomicU64,
    breached: AtomicBool,
}

impl MemoryGuard {
    pub fn new(limit_mb: u64) -> Self {
        Self {
            limit_mb,
            last_usage_mb: AtomicU64::new(0),
            breached: AtomicBool::new(false),
        }
    }

    pub fn last_usage_mb(&self) -> u64 {
        self.last_usage_mb.load(Ordering::Relaxed)
    }

    /// Store a reading; returns true when it is over the limit
    pub fn record(&self, usage_mb: u64) -> bool {
        self.last_usage_mb.store(usage_mb, Ordering::Relaxed);

        let over = usage_mb > self.limit_mb;
        let was_over = self.breached.swap(over, Ordering::AcqRel);
        if over && !was_over {
            tracing::warn!(
                "Memory usage {} MB exceeds limit of {} MB, rejecting generation requests",
                usage_mb,
                self.limit_mb
            );
        } else if !over && was_over {
            tracing::info!("Memory usage back to {} MB, accepting requests", usage_mb);
        }
        over
    }

    pub fn check(&self) -> Result<(), MemoryLimitExceeded> {
        if self.breached.load(Ordering::Acquire) {
            Err(MemoryLimitExceeded {
                usage_mb: self.last_usage_mb(),
                limit_mb: self.limit_mb,
            })
        } else {
            Ok(())
        }
    }
}

pub struct MemoryWatchdog;

impl MemoryWatchdog {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

    /// Start sampling `probe` into `guard` every `interval`.
    ///
    /// The thread holds only a weak reference and exits once the guard is
    /// dropped. A probe returning `None` (unsupported platform) skips the tick.
    pub fn spawn(
        guard: &Arc<MemoryGuard>,
        interval: Duration,
        probe: fn() -> Option<u64>,
    ) -> std::io::Result<JoinHandle<()>> {
        let guard: Weak<MemoryGuard> = Arc::downgrade(guard);

        std::thread::Builder::new()
            .name("memory-watchdog".to_string())
            .spawn(move || {
                let mut warned_unsupported = false;
                loop {
                    let Some(guard) = guard.upgrade() else {
                        tracing::debug!("Memory guard dropped, watchdog exiting");
                        return;
                    };

                    match probe() {
                        Some(usage_mb) => {
                            guard.record(usage_mb);
                        }
                        None if !warned_unsupported => {
                            tracing::warn!("Process memory is not measurable here, watchdog is idle");
                            warned_unsupported = true;
                        }
                        None => {}
                    }
                    drop(guard);

                    std::thread::sleep(interval);
                }
            })
    }
}
