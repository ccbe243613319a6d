//! # Systems — Demo Producer Subsystems
//!
//! One producer per active stack. Each subsystem owns its stack and a frame
//! arena for task arguments, and refills itself: the first task of every
//! recorded batch is the subsystem's own submit task, gated on the
//! subsystem's terminal checkpoint so it runs only once the frame's real
//! work has completed. Clearing the arena at the top of the submit task is
//! therefore safe: the terminal checkpoint carries a happens-before edge
//! past every task that could still hold an argument pointer.
//!
//! The workloads are simulations (busy loops) shaped like a game frame:
//! fan-in task groups that decrement a shared counter, with the last
//! finisher firing the group's checkpoint, plus independent filler tasks.
//! Cross-subsystem ordering comes entirely from checkpoint requirements.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::checkpoints;

pub mod ai;
pub mod animation;
pub mod filler;
pub mod input;
pub mod physics;
pub mod rendering;

/// Spin-work stand-in for a real workload.
pub fn simulate_work(units: u32) -> u64 {
    let mut acc = 0u64;
    for i in 0..units {
        acc = acc.wrapping_add(std::hint::black_box(i as u64));
    }
    std::hint::black_box(acc)
}

/// Default spin amount for demo tasks.
pub(crate) const WORK_UNITS: u32 = 10_000;

/// Arguments for one member of a fan-in task group. The counter lives in
/// the owning subsystem; `fires` is the checkpoint the group produces.
#[derive(Clone, Copy)]
pub(crate) struct GroupArgs {
    pub counter: *const AtomicU32,
    pub fires: u64,
}

/// Fan-in group member: the task that observes the counter hitting zero
/// fires the group checkpoint, everyone else reports nothing.
pub(crate) fn fan_in_task(args: *mut (), _worker_id: u32) -> u64 {
    // Safety: recorded with a GroupArgs allocation that outlives the batch.
    let args = unsafe { *(args as *const GroupArgs) };
    simulate_work(WORK_UNITS);
    // Safety: the counter is owned by the subsystem, which outlives workers.
    let counter = unsafe { &*args.counter };
    if counter.fetch_sub(1, Ordering::Release) == 0 {
        args.fires
    } else {
        checkpoints::NONE
    }
}

/// Arguments for an independent task.
#[derive(Clone, Copy)]
pub(crate) struct IndependentArgs {
    pub some_param: u32,
}

/// Dependency-free filler work.
pub(crate) fn independent_task(args: *mut (), _worker_id: u32) -> u64 {
    // Safety: recorded with an IndependentArgs allocation that outlives the
    // batch.
    let args = unsafe { *(args as *const IndependentArgs) };
    simulate_work(WORK_UNITS + args.some_param);
    checkpoints::NONE
}
