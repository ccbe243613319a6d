//! Physics producer: four fan-in groups chained INPUT1 -> PHYSICS1 ->
//! PHYSICS2 -> PHYSICS3 -> PHYSICS4, with a previous-frame edge on
//! RENDERING2 throttling group 3 one frame behind the renderer.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::arena::{ArenaPool, FrameArena};
use crate::checkpoints;
use crate::scheduler::Scheduler;
use crate::task::Task;

use super::{fan_in_task, independent_task, GroupArgs, IndependentArgs};

pub struct Physics {
    sched: Arc<Scheduler>,
    stack: usize,
    arena: FrameArena,
    group1: AtomicU32,
    group2: AtomicU32,
    group3: AtomicU32,
    group4: AtomicU32,
}

impl Physics {
    /// Wire the subsystem to its stack and prime the first frame.
    ///
    /// The returned `Arc` must outlive the worker pool: recorded tasks hold
    /// a raw pointer to the subsystem.
    pub fn init(sched: &Arc<Scheduler>, stack: usize, pool: &Arc<ArenaPool>) -> Arc<Self> {
        let system = Arc::new(Physics {
            sched: Arc::clone(sched),
            stack,
            arena: FrameArena::claim(pool),
            group1: AtomicU32::new(0),
            group2: AtomicU32::new(0),
            group3: AtomicU32::new(0),
            group4: AtomicU32::new(0),
        });
        info!(stack, "physics subsystem initialized");
        submit_tasks(Arc::as_ptr(&system) as *mut (), 0);
        system
    }
}

/// Record the next frame's batch. Always the first task recorded, gated on
/// PHYSICS4 so it runs after the frame's last group completes.
pub fn submit_tasks(args: *mut (), _worker_id: u32) -> u64 {
    // Safety: args is the Physics instance installed at init; init's caller
    // keeps it alive until the workers join.
    let system = unsafe { &*(args as *const Physics) };
    system.arena.clear();

    let sched = &system.sched;
    let s = system.stack;
    sched.begin_recording(s);

    sched.record_task(
        s,
        Task::new(submit_tasks, args, checkpoints::NONE, checkpoints::PHYSICS4),
    );

    record_group(system, &system.group4, checkpoints::PHYSICS4, checkpoints::NONE, checkpoints::PHYSICS3);
    record_independent(system, 42, false);
    record_group(
        system,
        &system.group3,
        checkpoints::PHYSICS3,
        checkpoints::RENDERING2,
        checkpoints::PHYSICS2,
    );
    record_independent(system, 42, false);
    record_group(system, &system.group2, checkpoints::PHYSICS2, checkpoints::NONE, checkpoints::PHYSICS1);
    record_independent(system, 42, true);
    record_group(system, &system.group1, checkpoints::PHYSICS1, checkpoints::NONE, checkpoints::INPUT1);
    record_independent(system, 42, true);

    sched.submit_recording(s);
    checkpoints::NONE
}

fn record_group(
    system: &Physics,
    counter: &AtomicU32,
    fires: u64,
    previous: u64,
    current: u64,
) {
    counter.store(9, Ordering::Relaxed);
    for _ in 0..10 {
        let group = system.arena.alloc(GroupArgs { counter, fires });
        system.sched.record_task(
            system.stack,
            Task::new(fan_in_task, group as *mut (), previous, current),
        );
    }
}

fn record_independent(system: &Physics, base: u32, ascending: bool) {
    for i in 0..4 {
        let some_param = if ascending { base + i } else { base - i };
        let args = system.arena.alloc(IndependentArgs { some_param });
        system.sched.record_task(
            system.stack,
            Task::new(
                independent_task,
                args as *mut (),
                checkpoints::NONE,
                checkpoints::NONE,
            ),
        );
    }
}
