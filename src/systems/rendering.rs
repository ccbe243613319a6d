//! Rendering producer: three fan-in groups followed by a perf-overlay pass
//! and a present task closing the frame with RENDERING_PRESENT. The real
//! renderer is replaceable; these tasks only simulate its shape, and the
//! scheduler treats them like any others.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::arena::{ArenaPool, FrameArena};
use crate::checkpoints;
use crate::scheduler::Scheduler;
use crate::task::Task;

use super::{fan_in_task, independent_task, simulate_work, GroupArgs, IndependentArgs, WORK_UNITS};

pub struct Rendering {
    sched: Arc<Scheduler>,
    stack: usize,
    arena: FrameArena,
    group1: AtomicU32,
    group2: AtomicU32,
    group3: AtomicU32,
    overlay: AtomicU32,
}

impl Rendering {
    /// Wire the subsystem to its stack and prime the first frame.
    pub fn init(sched: &Arc<Scheduler>, stack: usize, pool: &Arc<ArenaPool>) -> Arc<Self> {
        let system = Arc::new(Rendering {
            sched: Arc::clone(sched),
            stack,
            arena: FrameArena::claim(pool),
            group1: AtomicU32::new(0),
            group2: AtomicU32::new(0),
            group3: AtomicU32::new(0),
            overlay: AtomicU32::new(0),
        });
        info!(stack, "rendering subsystem initialized");
        submit_tasks(Arc::as_ptr(&system) as *mut (), 0);
        system
    }
}

pub fn submit_tasks(args: *mut (), _worker_id: u32) -> u64 {
    // Safety: args is the Rendering instance installed at init.
    let system = unsafe { &*(args as *const Rendering) };
    system.arena.clear();

    let sched = &system.sched;
    let s = system.stack;
    sched.begin_recording(s);

    sched.record_task(
        s,
        Task::new(
            submit_tasks,
            args,
            checkpoints::NONE,
            checkpoints::RENDERING_PRESENT,
        ),
    );
    sched.record_task(
        s,
        Task::new(
            present_task,
            args,
            checkpoints::NONE,
            checkpoints::RENDERING_WRITE_PERF_OVERLAY,
        ),
    );

    // Perf overlay writes join on the frame's final scene pass.
    system.overlay.store(3, Ordering::Relaxed);
    for _ in 0..4 {
        let group = system.arena.alloc(GroupArgs {
            counter: &system.overlay,
            fires: checkpoints::RENDERING_WRITE_PERF_OVERLAY,
        });
        sched.record_task(
            s,
            Task::new(fan_in_task, group as *mut (), checkpoints::NONE, checkpoints::RENDERING3),
        );
    }

    group(system, &system.group3, checkpoints::RENDERING3, checkpoints::NONE, checkpoints::RENDERING2);
    independent(system, false);
    group(
        system,
        &system.group2,
        checkpoints::RENDERING2,
        checkpoints::NONE,
        checkpoints::PHYSICS4 | checkpoints::RENDERING1,
    );
    independent(system, true);
    group(system, &system.group1, checkpoints::RENDERING1, checkpoints::NONE, checkpoints::INPUT1);
    independent(system, true);

    sched.submit_recording(s);
    checkpoints::NONE
}

/// Frame close: presentation is a single task so RENDERING_PRESENT fires
/// exactly once.
pub fn present_task(_args: *mut (), _worker_id: u32) -> u64 {
    simulate_work(WORK_UNITS);
    checkpoints::RENDERING_PRESENT
}

fn group(
    system: &Rendering,
    counter: &AtomicU32,
    fires: u64,
    previous: u64,
    current: u64,
) {
    counter.store(9, Ordering::Relaxed);
    for _ in 0..10 {
        let args = system.arena.alloc(GroupArgs { counter, fires });
        system.sched.record_task(
            system.stack,
            Task::new(fan_in_task, args as *mut (), previous, current),
        );
    }
}

fn independent(system: &Rendering, ascending: bool) {
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
