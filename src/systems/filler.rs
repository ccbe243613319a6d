//! Filler producer for extra active stacks: a self-refilling batch of
//! dependency-free spin tasks. Keeps additional stacks participating in the
//! convoy without introducing new checkpoint edges.

use std::sync::Arc;

use tracing::info;

use crate::checkpoints;
use crate::scheduler::Scheduler;
use crate::task::Task;

use super::simulate_work;

pub struct Filler {
    sched: Arc<Scheduler>,
    stack: usize,
    tasks_per_frame: u32,
}

impl Filler {
    /// Wire a filler to its stack and prime the first frame.
    pub fn init(sched: &Arc<Scheduler>, stack: usize, tasks_per_frame: u32) -> Arc<Self> {
        let system = Arc::new(Filler {
            sched: Arc::clone(sched),
            stack,
            tasks_per_frame,
        });
        info!(stack, tasks_per_frame, "filler subsystem initialized");
        submit_tasks(Arc::as_ptr(&system) as *mut (), 0);
        system
    }
}

/// Refill with spin tasks. No arena and no checkpoints: the batch drains
/// top-down, so this task is claimed last without needing a gate, and the
/// work tasks carry no argument pointers that could dangle.
pub fn submit_tasks(args: *mut (), _worker_id: u32) -> u64 {
    // Safety: args is the Filler instance installed at init.
    let system = unsafe { &*(args as *const Filler) };

    let sched = &system.sched;
    let s = system.stack;
    sched.begin_recording(s);
    sched.record_task(
        s,
        Task::new(submit_tasks, args, checkpoints::NONE, checkpoints::NONE),
    );
    for _ in 0..system.tasks_per_frame {
        sched.record_task(
            s,
            Task::new(work_task, std::ptr::null_mut(), checkpoints::NONE, checkpoints::NONE),
        );
    }
    sched.submit_recording(s);
    checkpoints::NONE
}

fn work_task(_args: *mut (), _worker_id: u32) -> u64 {
    simulate_work(super::WORK_UNITS);
    checkpoints::NONE
}
