//! Scheduler type definitions
//!
//! This module contains the thread control view the scheduler operates on and
//! the small enums shared by every operation. The scheduler never allocates or
//! frees a [`Thread`]; the lifecycle collaborator creates one, hands it to
//! [`admit`](crate::Scheduler::admit), and takes it back when it blocks or
//! dies. While a thread sits in a ready or sleep queue the queue owns the
//! value, so a thread can be in at most one structure at a time; the
//! [`Membership`] tag makes that invariant checkable at every transition.

/// Thread identifier. Stable for the life of the thread, used as the
/// tie-break key when two threads have equal vruntime.
pub type ThreadId = u64;

/// CPU identifier, an index into the scheduler's CPU-context arena.
pub type CpuId = u16;

/// Opaque identifier of a synchronization primitive's wait set.
pub type WaitChannel = u64;

/// Highest priority.
pub const NICE_MIN: i8 = -20;
/// Default priority.
pub const NICE_DEFAULT: i8 = 0;
/// Lowest priority.
pub const NICE_MAX: i8 = 19;

/// States in a thread's scheduling life cycle. Exactly one holds at any
/// instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    /// Occupying a CPU's `current` slot.
    Running,
    /// In a ready queue, runnable.
    Ready,
    /// Waiting: in a sleep queue or a synchronization primitive's wait set.
    Blocked,
    /// About to be destroyed; never reinserted into scheduler structures.
    Dying,
}

/// Which scheduler-visible structure a thread currently belongs to.
///
/// Running threads are members of none (they occupy the queue's `current`
/// slot), so they carry [`Membership::Detached`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Membership {
    /// In no queue or wait set: freshly created, running, or in transit
    /// between structures inside a scheduler operation.
    Detached,
    /// In the ready queue of the given CPU.
    ReadyOn(CpuId),
    /// In the sleep queue of the given CPU.
    SleepingOn(CpuId),
    /// In the wait set of a synchronization primitive.
    WaitingOn(WaitChannel),
}

/// Result of a scheduling operation: whether the calling CPU has to run its
/// reschedule path when the operation returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum SchedSignal {
    /// Keep running whatever is running.
    Continue,
    /// Yield the current thread and pick a new one.
    Reschedule,
}

impl SchedSignal {
    /// Fold two signals; a reschedule request from either side wins.
    #[inline]
    pub fn merge(self, other: SchedSignal) -> SchedSignal {
        if self == SchedSignal::Reschedule || other == SchedSignal::Reschedule {
            SchedSignal::Reschedule
        } else {
            SchedSignal::Continue
        }
    }

    #[inline]
    pub fn must_reschedule(self) -> bool {
        self == SchedSignal::Reschedule
    }
}

/// A kernel thread as the scheduler sees it.
///
/// Context-switch state, stacks, and address-space fields live with the
/// lifecycle collaborator; this is only the accounting the scheduler needs to
/// decide who runs next.
#[derive(Clone, Debug)]
pub struct Thread {
    id: ThreadId,
    nice: i8,
    state: ThreadState,
    /// Accumulated weighted virtual runtime, in nanosecond-scale units.
    vruntime: u64,
    /// Timestamp of the last vruntime accrual, in nanoseconds.
    last_update: u64,
    /// Absolute wake deadline; meaningful only while in a sleep queue.
    wake_time: u64,
    /// CPU whose queues this thread belongs (or would be admitted) to.
    cpu: CpuId,
    membership: Membership,
}

impl Thread {
    /// Create a thread ready for first admission. Niceness is clamped to
    /// [`NICE_MIN`]..=[`NICE_MAX`].
    pub fn new(id: ThreadId, nice: i8) -> Self {
        Self {
            id,
            nice: nice.clamp(NICE_MIN, NICE_MAX),
            state: ThreadState::Blocked,
            vruntime: 0,
            last_update: 0,
            wake_time: 0,
            cpu: 0,
            membership: Membership::Detached,
        }
    }

    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    pub fn nice(&self) -> i8 {
        self.nice
    }

    #[inline]
    pub fn state(&self) -> ThreadState {
        self.state
    }

    #[inline]
    pub fn vruntime(&self) -> u64 {
        self.vruntime
    }

    #[inline]
    pub fn last_update(&self) -> u64 {
        self.last_update
    }

    #[inline]
    pub fn wake_time(&self) -> u64 {
        self.wake_time
    }

    #[inline]
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    #[inline]
    pub fn membership(&self) -> Membership {
        self.membership
    }

    /// Charge the thread for the wall time since its last accrual, scaled by
    /// its weight ratio, and stamp the accrual time. Only ever called on the
    /// thread occupying a `current` slot.
    pub(crate) fn accrue(&mut self, now: u64) {
        let delta = now.saturating_sub(self.last_update);
        self.vruntime = self
            .vruntime
            .saturating_add(crate::weights::vruntime_delta(delta, self.nice));
        self.last_update = now;
    }

    /// The thread's vruntime as it would read if it accrued right now,
    /// without committing the accrual.
    pub(crate) fn projected_vruntime(&self, now: u64) -> u64 {
        let delta = now.saturating_sub(self.last_update);
        self.vruntime
            .saturating_add(crate::weights::vruntime_delta(delta, self.nice))
    }

    #[inline]
    pub(crate) fn set_vruntime(&mut self, vruntime: u64) {
        self.vruntime = vruntime;
    }

    #[inline]
    pub(crate) fn set_last_update(&mut self, now: u64) {
        self.last_update = now;
    }

    #[inline]
    pub(crate) fn set_wake_time(&mut self, wake_time: u64) {
        self.wake_time = wake_time;
    }

    #[inline]
    pub(crate) fn set_cpu(&mut self, cpu: CpuId) {
        self.cpu = cpu;
    }

    #[inline]
    pub(crate) fn set_state(&mut self, state: ThreadState) {
        self.state = state;
    }

    #[inline]
    pub(crate) fn set_membership(&mut self, membership: Membership) {
        self.membership = membership;
    }

    /// Sort key for ready queues: ascending vruntime, ties broken by id.
    #[inline]
    pub(crate) fn ready_key(&self) -> (u64, ThreadId) {
        (self.vruntime, self.id)
    }
}

/// Read-only view of one thread's scheduling state, for debugging and
/// inspection by collaborators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadSnapshot {
    pub id: ThreadId,
    pub nice: i8,
    pub state: ThreadState,
    pub vruntime: u64,
    /// Meaningful only while the thread sits in a sleep queue.
    pub wake_time: u64,
    pub cpu: CpuId,
}

impl ThreadSnapshot {
    pub(crate) fn of(t: &Thread) -> Self {
        Self {
            id: t.id,
            nice: t.nice,
            state: t.state,
            vruntime: t.vruntime,
            wake_time: t.wake_time,
            cpu: t.cpu,
        }
    }
}
