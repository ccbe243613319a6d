//! Animation producer: three fan-in groups, with group 2 joining on both
//! the fresh input frame (INPUT1) and the subsystem's own first group
//! (ANIMATION1).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::arena::{ArenaPool, FrameArena};
use crate::checkpoints;
use crate::scheduler::Scheduler;
use crate::task::Task;

use super::{fan_in_task, independent_task, GroupArgs, IndependentArgs};

pub struct Animation {
    sched: Arc<Scheduler>,
    stack: usize,
    arena: FrameArena,
    group1: AtomicU32,
    group2: AtomicU32,
    group3: AtomicU32,
}

impl Animation {
    /// Wire the subsystem to its stack and prime the first frame.
    pub fn init(sched: &Arc<Scheduler>, stack: usize, pool: &Arc<ArenaPool>) -> Arc<Self> {
        let system = Arc::new(Animation {
            sched: Arc::clone(sched),
            stack,
            arena: FrameArena::claim(pool),
            group1: AtomicU32::new(0),
            group2: AtomicU32::new(0),
            group3: AtomicU32::new(0),
        });
        info!(stack, "animation subsystem initialized");
        submit_tasks(Arc::as_ptr(&system) as *mut (), 0);
        system
    }
}

pub fn submit_tasks(args: *mut (), _worker_id: u32) -> u64 {
    // Safety: args is the Animation instance installed at init.
    let system = unsafe { &*(args as *const Animation) };
    system.arena.clear();

    let sched = &system.sched;
    let s = system.stack;
    sched.begin_recording(s);

    sched.record_task(
        s,
        Task::new(submit_tasks, args, checkpoints::NONE, checkpoints::ANIMATION3),
    );

    group(system, &system.group3, checkpoints::ANIMATION3, checkpoints::ANIMATION2);
    independent(system, false);
    group(
        system,
        &system.group2,
        checkpoints::ANIMATION2,
        checkpoints::INPUT1 | checkpoints::ANIMATION1,
    );
    independent(system, true);
    group(system, &system.group1, checkpoints::ANIMATION1, checkpoints::NONE);

    sched.submit_recording(s);
    checkpoints::NONE
}

fn group(system: &Animation, counter: &AtomicU32, fires: u64, current: u64) {
    counter.store(9, Ordering::Relaxed);
    for _ in 0..10 {
        let args = system.arena.alloc(GroupArgs { counter, fires });
        system.sched.record_task(
            system.stack,
            Task::new(fan_in_task, args as *mut (), checkpoints::NONE, current),
        );
    }
}

fn independent(system: &Animation, ascending: bool) {
    for i in 0..4 {
        let some_param = if ascending { 42 + i } else { 42 - i };
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
