//! AI producer: two fan-in groups, AI1 feeding AI2 within the frame.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::arena::{ArenaPool, FrameArena};
use crate::checkpoints;
use crate::scheduler::Scheduler;
use crate::task::Task;

use super::{fan_in_task, independent_task, GroupArgs, IndependentArgs};

pub struct Ai {
    sched: Arc<Scheduler>,
    stack: usize,
    arena: FrameArena,
    group1: AtomicU32,
    group2: AtomicU32,
}

impl Ai {
    /// Wire the subsystem to its stack and prime the first frame.
    pub fn init(sched: &Arc<Scheduler>, stack: usize, pool: &Arc<ArenaPool>) -> Arc<Self> {
        let system = Arc::new(Ai {
            sched: Arc::clone(sched),
            stack,
            arena: FrameArena::claim(pool),
            group1: AtomicU32::new(0),
            group2: AtomicU32::new(0),
        });
        info!(stack, "ai subsystem initialized");
        submit_tasks(Arc::as_ptr(&system) as *mut (), 0);
        system
    }
}

pub fn submit_tasks(args: *mut (), _worker_id: u32) -> u64 {
    // Safety: args is the Ai instance installed at init.
    let system = unsafe { &*(args as *const Ai) };
    system.arena.clear();

    let sched = &system.sched;
    let s = system.stack;
    sched.begin_recording(s);

    sched.record_task(
        s,
        Task::new(submit_tasks, args, checkpoints::NONE, checkpoints::AI2),
    );

    system.group2.store(9, Ordering::Relaxed);
    for _ in 0..10 {
        let group = system.arena.alloc(GroupArgs {
            counter: &system.group2,
            fires: checkpoints::AI2,
        });
        sched.record_task(
            s,
            Task::new(fan_in_task, group as *mut (), checkpoints::NONE, checkpoints::AI1),
        );
    }

    for i in 0..4 {
        let args = system.arena.alloc(IndependentArgs { some_param: 42 + i });
        sched.record_task(
            s,
            Task::new(
                independent_task,
                args as *mut (),
                checkpoints::NONE,
                checkpoints::NONE,
            ),
        );
    }

    system.group1.store(9, Ordering::Relaxed);
    for _ in 0..10 {
        let group = system.arena.alloc(GroupArgs {
            counter: &system.group1,
            fires: checkpoints::AI1,
        });
        sched.record_task(
            s,
            Task::new(fan_in_task, group as *mut (), checkpoints::NONE, checkpoints::NONE),
        );
    }

    sched.submit_recording(s);
    checkpoints::NONE
}
