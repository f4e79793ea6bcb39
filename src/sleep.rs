//! Per-CPU sleep queue
//!
//! Threads waiting out a deadline sit here, sorted ascending by wake time, so
//! the once-per-tick wake check is O(1) when nothing is due: if the head has
//! not expired, nothing behind it has either. Entries are drained from the
//! front one at a time; the caller admits each woken thread back to the ready
//! queue without holding this queue's lock.

use alloc::vec::Vec;

use crate::types::{CpuId, Membership, Thread, ThreadState};

pub struct SleepQueue {
    cpu_id: CpuId,
    /// Sleeping threads, ascending by (wake_time, id).
    threads: Vec<Thread>,
}

impl SleepQueue {
    pub(crate) const fn new(cpu_id: CpuId) -> Self {
        Self {
            cpu_id,
            threads: Vec::new(),
        }
    }

    pub(crate) fn init(&mut self) {
        self.threads.clear();
    }

    /// Insert a blocked thread at the position its deadline dictates.
    pub(crate) fn insert(&mut self, mut t: Thread) {
        assert!(
            t.state() == ThreadState::Blocked,
            "sleep insert: thread {} is not blocked",
            t.id()
        );
        assert!(
            t.membership() == Membership::Detached,
            "sleep insert: thread {} is already a queue member ({:?})",
            t.id(),
            t.membership()
        );
        t.set_membership(Membership::SleepingOn(self.cpu_id));
        t.set_cpu(self.cpu_id);
        let key = (t.wake_time(), t.id());
        let pos = self
            .threads
            .partition_point(|q| (q.wake_time(), q.id()) < key);
        self.threads.insert(pos, t);
        debug_assert!(self
            .threads
            .windows(2)
            .all(|w| w[0].wake_time() <= w[1].wake_time()));
    }

    /// Remove the head if its deadline has passed. Returned threads are
    /// detached, ready for admission.
    pub(crate) fn pop_due(&mut self, now: u64) -> Option<Thread> {
        if self.threads.first()?.wake_time() > now {
            return None;
        }
        let mut t = self.threads.remove(0);
        t.set_membership(Membership::Detached);
        Some(t)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.threads.len()
    }

    /// Earliest pending deadline, if any thread is sleeping.
    #[inline]
    pub(crate) fn next_wake(&self) -> Option<u64> {
        self.threads.first().map(|t| t.wake_time())
    }

    pub(crate) fn find(&self, id: crate::types::ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|t| t.id() == id)
    }
}
