//! Scheduler tunables
//!
//! Policy constants that vary between deployments are carried here instead of
//! being hard-coded, so a kernel port (or a test) can pick its own values.

/// Scheduler policy configuration.
///
/// The defaults reproduce the shipped kernel: a 4 ms base slice, a 100 Hz
/// timer, a 20 ms catch-up bound, and idle-only reschedule on wakeup.
#[derive(Clone, Copy, Debug)]
pub struct SchedConfig {
    /// Target length of one scheduling period slot, in nanoseconds. A
    /// thread's ideal runtime per period scales this by its share of the
    /// ready set's total weight.
    pub base_slice_ns: u64,
    /// Upper bound on how much vruntime credit a thread resuming from
    /// block/sleep may redeem against the queue watermark, in nanoseconds.
    /// Without it, a long-blocked thread would monopolize the CPU on waking.
    /// 2_000_000 is the other value with deployment history; both are legal.
    pub catchup_bound_ns: u64,
    /// When true, admitting a thread that resumes from block/sleep always
    /// requests a reschedule, even if the CPU is busy. When false, only
    /// admission to an idle CPU does. Trades preemption churn for wakeup
    /// latency.
    pub resched_on_unblock: bool,
    /// Nanoseconds per hardware timer tick.
    pub ns_per_tick: u64,
}

impl SchedConfig {
    pub const fn new() -> Self {
        Self {
            base_slice_ns: 4_000_000,
            catchup_bound_ns: 20_000_000,
            resched_on_unblock: false,
            ns_per_tick: 10_000_000,
        }
    }
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self::new()
    }
}
