//! Cross-CPU load balancing
//!
//! A CPU about to idle, or running its periodic balance tick, pulls work from
//! the most loaded CPU. Load is the aggregate weight of a queue's ready
//! threads, so one high-priority thread counts for more than several nice-19
//! stragglers.
//!
//! The measurement pass locks one queue at a time; by the time the migration
//! loop runs, the numbers may be stale. That is fine: balancing is a
//! heuristic, and a skewed pass is corrected by the next one. The two locks
//! held during migration are always taken in ascending CPU-id order, one
//! global order shared by every CPU, so two CPUs balancing against each other
//! cannot deadlock.

use crate::types::CpuId;
use crate::weights::nice_to_weight;
use crate::Scheduler;

/// Abort threshold: skip the pass when the imbalance is under a quarter of
/// the busiest CPU's load, so small skews do not cause migration thrash.
const IMBALANCE_DENOMINATOR: u64 = 4;

impl Scheduler {
    /// Pull threads from the most loaded CPU onto `cpu` until roughly half
    /// the load difference has moved. Returns the number of threads
    /// migrated.
    pub fn load_balance(&self, cpu: CpuId) -> usize {
        let me = self.cpu(cpu).cpu_id() as usize;
        if self.cpu_count() <= 1 {
            return 0;
        }

        // Measurement pass: one lock at a time.
        let mut busiest = 0usize;
        let mut busiest_load = 0u64;
        let mut caller_load = 0u64;
        for (id, ctx) in self.contexts().iter().enumerate() {
            let load = ctx.ready.lock().load();
            if id == me {
                caller_load = load;
            }
            if load > busiest_load {
                busiest = id;
                busiest_load = load;
            }
        }

        if busiest == me || busiest_load <= caller_load {
            return 0;
        }
        let imbalance = (busiest_load - caller_load) / 2;
        if imbalance * IMBALANCE_DENOMINATOR < busiest_load {
            return 0;
        }

        // Ascending CPU-id lock order.
        let (lo, hi) = if me < busiest { (me, busiest) } else { (busiest, me) };
        let lo_guard = self.contexts()[lo].ready.lock();
        let hi_guard = self.contexts()[hi].ready.lock();
        let (mut dst, mut src) = if me == lo {
            (lo_guard, hi_guard)
        } else {
            (hi_guard, lo_guard)
        };

        // vruntime is only meaningful relative to its queue's watermark;
        // carry the offset across, exactly.
        let src_min = src.min_vruntime() as i128;
        let dst_min = dst.min_vruntime() as i128;

        let mut remaining = imbalance;
        let mut migrated = 0usize;
        while remaining > 0 {
            let mut t = match src.steal_front() {
                Some(t) => t,
                None => break,
            };
            let weight = nice_to_weight(t.nice());
            let rebased = (t.vruntime() as i128 - src_min + dst_min).max(0) as u64;
            t.set_vruntime(rebased);
            dst.receive(t);
            remaining = remaining.saturating_sub(weight);
            migrated += 1;
        }
        drop(src);
        drop(dst);

        if migrated > 0 {
            self.contexts()[me].stats.record_balance_pass();
            self.contexts()[me].stats.record_migrations_in(migrated as u64);
            self.contexts()[busiest]
                .stats
                .record_migrations_out(migrated as u64);
            log::debug!(
                "cpu {}: pulled {} thread(s) from cpu {} (load {} -> {})",
                me,
                migrated,
                busiest,
                busiest_load,
                caller_load
            );
        }
        migrated
    }
}
