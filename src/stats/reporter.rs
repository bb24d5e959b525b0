// src/stats/reporter.rs
use std::sync::atomic::{AtomicU64, Ordering};
use sysinfo::System;

/// Snapshot of the share counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MiningStats {
    /// Candidates that passed verification and were handed to the pool
    pub shares_submitted: u64,
    /// Device candidates that failed authoritative verification
    pub false_positives: u64,
    /// Candidates dropped on hash, encode or submit failure
    pub shares_dropped: u64,
    /// Submissions the pool acknowledged
    pub pool_accepted: u64,
    /// Submissions the pool refused
    pub pool_rejected: u64,
}

/// Lock-free share counters shared by the verifier, pool client and reporter
#[derive(Debug, Default)]
pub struct ShareStats {
    submitted: AtomicU64,
    false_positives: AtomicU64,
    dropped: AtomicU64,
    pool_accepted: AtomicU64,
    pool_rejected: AtomicU64,
}

impl ShareStats {
    /// All counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// A verified share was handed to the pool
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// The verifier disagreed with a device
    pub fn record_false_positive(&self) {
        self.false_positives.fetch_add(1, Ordering::Relaxed);
    }

    /// A candidate was lost to a recoverable error
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Pool answered a submit with OK
    pub fn record_pool_accepted(&self) {
        self.pool_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Pool answered a submit with an error
    pub fn record_pool_rejected(&self) {
        self.pool_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values
    pub fn snapshot(&self) -> MiningStats {
        MiningStats {
            shares_submitted: self.submitted.load(Ordering::Relaxed),
            false_positives: self.false_positives.load(Ordering::Relaxed),
            shares_dropped: self.dropped.load(Ordering::Relaxed),
            pool_accepted: self.pool_accepted.load(Ordering::Relaxed),
            pool_rejected: self.pool_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Statistics related to hardware load
#[derive(Debug, Clone, Copy)]
pub struct HardwareStats {
    /// Current CPU usage percentage (0-100)
    pub cpu_usage: f32,
    /// Memory in use system-wide (in bytes)
    pub memory_used: u64,
}

/// Samples CPU and memory usage for the periodic report
pub struct HardwareMonitor {
    system: System,
}

impl Default for HardwareMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareMonitor {
    /// Creates a monitor with a primed CPU reading
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        HardwareMonitor { system }
    }

    /// Refreshes and returns current usage
    pub fn sample(&mut self) -> HardwareStats {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();

        let cpus = self.system.cpus();
        let cpu_usage = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };

        HardwareStats {
            cpu_usage,
            memory_used: self.system.used_memory(),
        }
    }
}
