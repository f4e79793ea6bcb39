//! fairsched: per-CPU proportional-share thread scheduler
//!
//! This crate is the scheduling subsystem of a small SMP kernel: it decides,
//! per CPU, which ready thread runs next, charges each thread for the CPU
//! time it consumes relative to its priority, enforces time-slice
//! preemption, wakes sleepers from the timer tick, and evens load out across
//! CPUs.
//!
//! ## Fairness model
//!
//! - **Virtual runtime (vruntime)**: every thread carries a virtual clock
//!   that advances while it runs, scaled by `NICE_0_WEIGHT / weight`. A
//!   nice -20 thread is charged ~1/87th of wall time, a nice 19 thread ~68x,
//!   so picking the lowest vruntime yields proportional CPU shares.
//! - **Watermark (min_vruntime)**: each queue tracks a monotonically
//!   non-decreasing floor used to place new arrivals and to cap how much
//!   credit a long-blocked thread can redeem when it wakes.
//! - **Slice expiry**: on every timer tick the current thread's elapsed time
//!   is weighed against its proportional share of one scheduling period; an
//!   expired slice signals the CPU to reschedule.
//!
//! ## Per-CPU Architecture
//!
//! Every CPU owns a ready queue, a sleep queue, and statistics, all behind
//! per-CPU spin locks; one designated CPU advances the shared clock. The
//! only cross-CPU touch point is the load balancer, which takes exactly two
//! ready-queue locks in ascending CPU-id order.
//!
//! Threads are owned by their creator: admission moves a [`Thread`] value
//! into the scheduler, blocking or exiting moves it back out. The scheduler
//! relocates threads between its structures and never allocates or frees
//! them.
//!
//! ## Module Organization
//!
//! - `types`: thread control view, membership tags, signals
//! - `weights`: nice-to-weight table and vruntime arithmetic
//! - `clock`: global tick counter and monotonic nanosecond clock
//! - `config`: policy tunables
//! - `queue`: per-CPU ready queue (admission, yield, selection, tick, block)
//! - `sleep`: per-CPU deadline-ordered sleep queue
//! - `percpu`: per-CPU context, lock wrapping
//! - `core`: the `Scheduler` arena and its operation surface
//! - `balance`: cross-CPU load balancing
//! - `stats`: per-CPU counters

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod balance;
mod clock;
mod config;
mod core;
mod percpu;
mod queue;
mod sleep;
mod stats;
mod types;
mod weights;

// Scheduler surface.
pub use crate::core::Scheduler;
pub use config::SchedConfig;

// Thread-facing types.
pub use types::{
    CpuId, Membership, SchedSignal, Thread, ThreadId, ThreadSnapshot, ThreadState, WaitChannel,
};
pub use types::{NICE_DEFAULT, NICE_MAX, NICE_MIN};

// Clock and statistics.
pub use clock::MonotonicClock;
pub use stats::{CpuStats, CpuStatsSnapshot};

// Weight table.
pub use weights::{nice_to_weight, vruntime_delta, NICE_0_WEIGHT, NICE_TO_WEIGHT};
