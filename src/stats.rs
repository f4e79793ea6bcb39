//! Per-CPU scheduler statistics
//!
//! All counters are relaxed atomics updated from the owning CPU's scheduling
//! paths; readers take a point-in-time snapshot. Nothing here participates in
//! scheduling decisions.

use core::sync::atomic::{AtomicU64, Ordering};

pub struct CpuStats {
    /// Threads installed as `current` by pick_next.
    picks: AtomicU64,
    /// pick_next calls that found an empty queue (CPU went idle).
    idle_picks: AtomicU64,
    /// Current threads returned to the ready queue, voluntary or forced.
    yields: AtomicU64,
    /// Tick checks that expired the current thread's slice.
    preemptions: AtomicU64,
    /// Admissions of threads resuming from block or sleep.
    wakeups: AtomicU64,
    /// Threads migrated into this CPU by a balance pass.
    migrations_in: AtomicU64,
    /// Threads migrated away from this CPU by a balance pass.
    migrations_out: AtomicU64,
    /// Balance passes this CPU initiated that moved at least one thread.
    balance_passes: AtomicU64,
}

impl CpuStats {
    pub const fn new() -> Self {
        Self {
            picks: AtomicU64::new(0),
            idle_picks: AtomicU64::new(0),
            yields: AtomicU64::new(0),
            preemptions: AtomicU64::new(0),
            wakeups: AtomicU64::new(0),
            migrations_in: AtomicU64::new(0),
            migrations_out: AtomicU64::new(0),
            balance_passes: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_pick(&self) {
        self.picks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_idle_pick(&self) {
        self.idle_picks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_yield(&self) {
        self.yields.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_preemption(&self) {
        self.preemptions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_wakeup(&self) {
        self.wakeups.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_migrations_in(&self, n: u64) {
        self.migrations_in.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_migrations_out(&self, n: u64) {
        self.migrations_out.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_balance_pass(&self) {
        self.balance_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CpuStatsSnapshot {
        CpuStatsSnapshot {
            picks: self.picks.load(Ordering::Relaxed),
            idle_picks: self.idle_picks.load(Ordering::Relaxed),
            yields: self.yields.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            migrations_in: self.migrations_in.load(Ordering::Relaxed),
            migrations_out: self.migrations_out.load(Ordering::Relaxed),
            balance_passes: self.balance_passes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of one CPU's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuStatsSnapshot {
    pub picks: u64,
    pub idle_picks: u64,
    pub yields: u64,
    pub preemptions: u64,
    pub wakeups: u64,
    pub migrations_in: u64,
    pub migrations_out: u64,
    pub balance_passes: u64,
}
