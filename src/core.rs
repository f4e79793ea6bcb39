//! Scheduler entry points
//!
//! [`Scheduler`] owns the CPU-context arena, the clock, and the policy
//! configuration; every operation names the CPU it acts on. Collaborators
//! drive it from three places:
//!
//! - the timer interrupt path calls [`timer_interrupt`](Scheduler::timer_interrupt)
//!   once per tick per CPU,
//! - the context-switch path calls [`yield_current`](Scheduler::yield_current)
//!   / [`pick_next`](Scheduler::pick_next) when an operation signaled a
//!   reschedule,
//! - synchronization primitives and the thread lifecycle call
//!   [`admit`](Scheduler::admit), [`block_current`](Scheduler::block_current),
//!   [`sleep_current`](Scheduler::sleep_current), and
//!   [`exit_current`](Scheduler::exit_current).
//!
//! A returned [`SchedSignal::Reschedule`] is a request, not an effect: the
//! caller owns the actual switch, and nothing here suspends.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::clock::MonotonicClock;
use crate::config::SchedConfig;
use crate::percpu::CpuContext;
use crate::stats::CpuStatsSnapshot;
use crate::types::{
    CpuId, SchedSignal, Thread, ThreadId, ThreadSnapshot, WaitChannel,
};

/// CPU that advances the global tick counter and wall clock.
const TIMEKEEPER_CPU: CpuId = 0;

pub struct Scheduler {
    cpus: Box<[CpuContext]>,
    clock: MonotonicClock,
    config: SchedConfig,
}

impl Scheduler {
    /// Build a scheduler for `cpu_count` CPUs. All queues start empty and
    /// the clock starts at zero.
    pub fn new(cpu_count: usize, config: SchedConfig) -> Self {
        assert!(cpu_count > 0, "scheduler needs at least one CPU");
        assert!(
            cpu_count <= CpuId::MAX as usize + 1,
            "cpu_count exceeds CpuId range"
        );
        let cpus: Vec<CpuContext> = (0..cpu_count)
            .map(|id| CpuContext::new(id as CpuId))
            .collect();
        log::info!(
            "scheduler initialized: {} cpus, {} ms base slice, {} ms catch-up bound",
            cpu_count,
            config.base_slice_ns / 1_000_000,
            config.catchup_bound_ns / 1_000_000
        );
        Self {
            cpus: cpus.into_boxed_slice(),
            clock: MonotonicClock::new(config.ns_per_tick),
            config,
        }
    }

    #[inline]
    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    #[inline]
    pub fn clock(&self) -> &MonotonicClock {
        &self.clock
    }

    #[inline]
    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    pub(crate) fn cpu(&self, cpu: CpuId) -> &CpuContext {
        assert!(
            (cpu as usize) < self.cpus.len(),
            "cpu {} out of range ({} configured)",
            cpu,
            self.cpus.len()
        );
        &self.cpus[cpu as usize]
    }

    pub(crate) fn contexts(&self) -> &[CpuContext] {
        &self.cpus
    }

    /// Re-initialize one CPU's queues for bring-up. Not for use while the
    /// CPU is scheduling.
    pub fn init_cpu(&self, cpu: CpuId) {
        let ctx = self.cpu(cpu);
        ctx.ready.lock().init();
        ctx.sleep.lock().init();
    }

    /// Hand a thread to a CPU's ready queue. `is_new` distinguishes first
    /// admission from resumption out of block/sleep; placement and the
    /// returned signal differ between the two.
    pub fn admit(&self, cpu: CpuId, thread: Thread, is_new: bool) -> SchedSignal {
        let ctx = self.cpu(cpu);
        let now = self.clock.now();
        let sig = ctx.ready.lock().admit(thread, is_new, now, &self.config);
        if !is_new {
            ctx.stats.record_wakeup();
        }
        sig
    }

    /// The running thread gives up the CPU and rejoins the ready queue.
    /// Follow with [`pick_next`](Scheduler::pick_next).
    pub fn yield_current(&self, cpu: CpuId) {
        let ctx = self.cpu(cpu);
        let now = self.clock.now();
        ctx.ready.lock().yield_current(now);
        ctx.stats.record_yield();
    }

    /// Install the least-served ready thread as the CPU's current thread.
    /// `None` means the queue is empty and the CPU should run its idle path.
    pub fn pick_next(&self, cpu: CpuId) -> Option<ThreadId> {
        let ctx = self.cpu(cpu);
        let now = self.clock.now();
        let picked = ctx.ready.lock().pick_next(now);
        match picked {
            Some(_) => ctx.stats.record_pick(),
            None => ctx.stats.record_idle_pick(),
        }
        picked
    }

    /// Slice-expiry check for the CPU's current thread. Called once per
    /// timer tick (normally via [`timer_interrupt`](Scheduler::timer_interrupt)).
    pub fn tick(&self, cpu: CpuId) -> SchedSignal {
        let ctx = self.cpu(cpu);
        let now = self.clock.now();
        let sig = ctx.ready.lock().tick(now, &self.config);
        if sig.must_reschedule() {
            ctx.stats.record_preemption();
            log::trace!("cpu {}: slice expired at {} ns", cpu, now);
        }
        sig
    }

    /// Commit the running thread's accounting and hand it over for a
    /// synchronization primitive's wait set. The caller owns the thread
    /// until it readmits it.
    pub fn block_current(&self, cpu: CpuId, channel: WaitChannel) -> Thread {
        let now = self.clock.now();
        self.cpu(cpu).ready.lock().block_current(now, channel)
    }

    /// Remove the running thread for destruction. The scheduler keeps no
    /// reference to it afterwards.
    pub fn exit_current(&self, cpu: CpuId) -> Thread {
        let now = self.clock.now();
        self.cpu(cpu).ready.lock().exit_current(now)
    }

    /// Put the running thread to sleep for `duration_ns`. It moves to the
    /// CPU's sleep queue and comes back through a later wake check; until
    /// then the CPU has no current thread, so the caller picks next.
    pub fn sleep_current(&self, cpu: CpuId, duration_ns: u64) {
        let ctx = self.cpu(cpu);
        let now = self.clock.now();
        let wake_time = now.saturating_add(duration_ns);
        // Accounting is committed under the ready lock; the thread is owned
        // by this frame until the sleep queue takes it, so no wake check can
        // observe a half-moved thread.
        let t = ctx.ready.lock().remove_current_for_sleep(now, wake_time);
        log::trace!(
            "cpu {}: thread {} sleeping until {} ns",
            cpu,
            t.id(),
            wake_time
        );
        ctx.sleep.lock().insert(t);
    }

    /// Admit every sleeper whose deadline has passed. Called once per timer
    /// tick per CPU; O(1) when the earliest deadline is still in the future.
    pub fn wake_check(&self, cpu: CpuId) -> SchedSignal {
        let ctx = self.cpu(cpu);
        let now = self.clock.now();

        // Drain due entries first so the ready lock is never taken while the
        // sleep lock is held.
        let mut due: Vec<Thread> = Vec::new();
        {
            let mut sleep = ctx.sleep.lock();
            while let Some(t) = sleep.pop_due(now) {
                due.push(t);
            }
        }

        let mut sig = SchedSignal::Continue;
        for t in due {
            log::trace!("cpu {}: waking thread {} at {} ns", cpu, t.id(), now);
            sig = sig.merge(self.admit(cpu, t, false));
        }
        sig
    }

    /// Per-CPU timer interrupt: the timekeeper CPU advances the clock, then
    /// the CPU wakes its due sleepers and checks its current thread's slice.
    pub fn timer_interrupt(&self, cpu: CpuId) -> SchedSignal {
        if cpu == TIMEKEEPER_CPU {
            self.clock.advance_tick();
        }
        self.wake_check(cpu).merge(self.tick(cpu))
    }

    // ---- inspection -------------------------------------------------------

    /// Id of the thread currently running on `cpu`, if any.
    pub fn current(&self, cpu: CpuId) -> Option<ThreadId> {
        self.cpu(cpu).ready.lock().current().map(|t| t.id())
    }

    /// Number of runnable threads queued on `cpu` (excluding current).
    pub fn ready_len(&self, cpu: CpuId) -> usize {
        self.cpu(cpu).ready.lock().len()
    }

    /// Number of threads sleeping on `cpu`.
    pub fn sleeping_len(&self, cpu: CpuId) -> usize {
        self.cpu(cpu).sleep.lock().len()
    }

    /// Earliest wake deadline pending on `cpu`, if any thread is sleeping.
    pub fn next_wake(&self, cpu: CpuId) -> Option<u64> {
        self.cpu(cpu).sleep.lock().next_wake()
    }

    /// The CPU's ready-queue watermark.
    pub fn min_vruntime(&self, cpu: CpuId) -> u64 {
        self.cpu(cpu).ready.lock().min_vruntime()
    }

    /// Ticks consumed by the current slice on `cpu`.
    pub fn thread_ticks(&self, cpu: CpuId) -> u64 {
        self.cpu(cpu).ready.lock().thread_ticks()
    }

    /// Scheduling state of one thread on `cpu`, wherever it sits (current
    /// slot, ready queue, or sleep queue).
    pub fn thread_snapshot(&self, cpu: CpuId, id: ThreadId) -> Option<ThreadSnapshot> {
        let ctx = self.cpu(cpu);
        if let Some(t) = ctx.ready.lock().find(id) {
            return Some(ThreadSnapshot::of(t));
        }
        ctx.sleep.lock().find(id).map(ThreadSnapshot::of)
    }

    /// This CPU's statistics counters.
    pub fn stats(&self, cpu: CpuId) -> CpuStatsSnapshot {
        self.cpu(cpu).stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Membership, ThreadState};

    fn sched() -> Scheduler {
        Scheduler::new(1, SchedConfig::default())
    }

    #[test]
    fn test_admit_to_idle_cpu_requests_reschedule() {
        let s = sched();
        let sig = s.admit(0, Thread::new(1, 0), true);
        assert!(sig.must_reschedule());
        assert_eq!(s.ready_len(0), 1);
        assert_eq!(s.current(0), None);
    }

    #[test]
    fn test_pick_installs_current() {
        let s = sched();
        let _ = s.admit(0, Thread::new(1, 0), true);
        assert_eq!(s.pick_next(0), Some(1));
        assert_eq!(s.current(0), Some(1));
        assert_eq!(s.ready_len(0), 0);
        let snap = s.thread_snapshot(0, 1).unwrap();
        assert_eq!(snap.state, ThreadState::Running);
    }

    #[test]
    fn test_block_returns_thread_to_caller() {
        let s = sched();
        let _ = s.admit(0, Thread::new(1, 0), true);
        let _ = s.pick_next(0);
        s.clock().set_now(1_000_000);
        let t = s.block_current(0, 7);
        assert_eq!(t.id(), 1);
        assert_eq!(t.membership(), Membership::WaitingOn(7));
        assert_eq!(t.vruntime(), 1_000_000);
        assert_eq!(s.current(0), None);
        // Resume: the caller readmits the same value.
        let sig = s.admit(0, t, false);
        assert!(sig.must_reschedule()); // CPU is idle
        assert_eq!(s.stats(0).wakeups, 1);
    }

    #[test]
    fn test_sleep_then_timer_interrupts_wake_once() {
        let s = sched();
        let _ = s.admit(0, Thread::new(1, 0), true);
        let _ = s.pick_next(0);
        // Sleep for five ticks.
        let tick_ns = s.config().ns_per_tick;
        s.sleep_current(0, 5 * tick_ns);
        assert_eq!(s.sleeping_len(0), 1);
        assert_eq!(s.next_wake(0), Some(5 * tick_ns));

        for n in 1..=4 {
            let sig = s.timer_interrupt(0);
            assert!(!sig.must_reschedule(), "woke early at tick {}", n);
            assert_eq!(s.sleeping_len(0), 1);
            assert_eq!(s.ready_len(0), 0);
        }
        let sig = s.timer_interrupt(0);
        assert!(sig.must_reschedule());
        assert_eq!(s.sleeping_len(0), 0);
        assert_eq!(s.ready_len(0), 1);

        // Further interrupts must not duplicate the thread.
        let _ = s.timer_interrupt(0);
        assert_eq!(s.ready_len(0), 1);
        assert_eq!(s.stats(0).wakeups, 1);
    }

    #[test]
    fn test_timer_interrupt_only_cpu0_advances_clock() {
        let s = Scheduler::new(2, SchedConfig::default());
        let _ = s.timer_interrupt(1);
        assert_eq!(s.clock().ticks(), 0);
        assert_eq!(s.clock().now(), 0);
        let _ = s.timer_interrupt(0);
        assert_eq!(s.clock().ticks(), 1);
        assert_eq!(s.clock().now(), s.config().ns_per_tick);
    }

    #[test]
    fn test_exit_current_detaches_thread() {
        let s = sched();
        let _ = s.admit(0, Thread::new(1, 0), true);
        let _ = s.pick_next(0);
        let t = s.exit_current(0);
        assert_eq!(t.state(), ThreadState::Dying);
        assert_eq!(s.current(0), None);
        assert!(s.thread_snapshot(0, 1).is_none());
    }

    #[test]
    fn test_init_cpu_resets_queues() {
        let s = sched();
        let _ = s.admit(0, Thread::new(1, 0), true);
        let _ = s.admit(0, Thread::new(2, 0), true);
        s.init_cpu(0);
        assert_eq!(s.ready_len(0), 0);
        assert_eq!(s.min_vruntime(0), 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_bad_cpu_id_halts() {
        let s = sched();
        let _ = s.ready_len(3);
    }
}
