//! Per-CPU scheduler contexts
//!
//! Each CPU owns a ready queue, a sleep queue, and a block of statistics.
//! The queues sit behind `spin::Mutex` so the lock and the data it guards are
//! inseparable: the guard is the only path to the queue, and it releases on
//! every exit, panic included. Scheduler operations run with local interrupts
//! off, so these critical sections are short and never suspend; a spinning
//! waiter on another core rides them out.
//!
//! ## Lock Hierarchy
//!
//! 1. At most one queue lock per CPU is held at a time; a thread moving from
//!    the ready to the sleep queue is owned by the call frame in between.
//! 2. The load balancer is the only place two ready-queue locks coexist, and
//!    it acquires them in ascending CPU-id order.

use spin::Mutex;

use crate::queue::ReadyQueue;
use crate::sleep::SleepQueue;
use crate::stats::CpuStats;
use crate::types::CpuId;

/// One CPU's scheduler state.
///
/// Cache-line aligned to prevent false sharing between CPUs.
#[repr(align(64))]
pub struct CpuContext {
    cpu_id: CpuId,
    pub(crate) ready: Mutex<ReadyQueue>,
    pub(crate) sleep: Mutex<SleepQueue>,
    pub(crate) stats: CpuStats,
}

impl CpuContext {
    pub(crate) const fn new(cpu_id: CpuId) -> Self {
        Self {
            cpu_id,
            ready: Mutex::new(ReadyQueue::new(cpu_id)),
            sleep: Mutex::new(SleepQueue::new(cpu_id)),
            stats: CpuStats::new(),
        }
    }

    #[inline]
    pub fn cpu_id(&self) -> CpuId {
        self.cpu_id
    }
}
