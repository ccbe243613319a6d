//! # Scheduler — Lock-Free Frame Scheduler Core
//!
//! The scheduler is one shared structure accessed by a pool of worker
//! threads through atomics only; there are no locks on the hot path. Work is
//! partitioned into per-subsystem task stacks. Each worker repeatedly picks
//! the highest-priority granted stack, tests the top task's checkpoint
//! dependencies, claims it with a CAS decrement of the stack's packed state
//! word, executes it, and publishes the checkpoints it reached.
//!
//! ## Frame Progression
//!
//! There is no global frame barrier. Each stack advances one iteration at a
//! time: when a worker claims a stack's last task, it bumps that stack's
//! iteration counter and recomputes the priority word (see
//! [`priority`](crate::priority)), and the claimed task itself is the
//! producer's submit task, which records the next iteration's batch. Stacks
//! are throttled into a convoy by the priority recomputation and ordered
//! within and across frames by checkpoint dependencies (see
//! [`checkpoints`](crate::checkpoints)).
//!
//! ## Shutdown
//!
//! `quit_request` is a cooperative flag: set by the executed-task threshold
//! or by [`Scheduler::request_quit`], observed once per worker iteration.
//! In-flight tasks always run to completion.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use crate::checkpoints;
use crate::config::Config;
use crate::priority;
use crate::task::{self, Task, TaskStack};
use crate::{INACTIVE_ITERATION, NUM_STACKS, STACK_SIZE};

#[cfg(feature = "profiling")]
use crate::profiling::{Profiler, WorkerLog};
#[cfg(feature = "profiling")]
use std::sync::Mutex;
#[cfg(feature = "profiling")]
use std::time::Instant;

/// Sentinel task body installed in slot 0 of every stack. Its checkpoint
/// requirements make it permanently ineligible; reaching it means a producer
/// violated the recording contract.
pub fn dont_do_it(args: *mut (), worker_id: u32) -> u64 {
    let stack = args as usize;
    error!(stack, worker_id, "sentinel task executed, producer contract violated");
    checkpoints::NONE
}

/// Shared scheduler state. Construct once at boot with [`Scheduler::new`],
/// share via `Arc`, and drive with [`Scheduler::spawn_workers`].
pub struct Scheduler {
    stacks: [TaskStack; NUM_STACKS],
    /// Per-stack iteration counters, the input of the priority
    /// recomputation. Inactive stacks are preloaded so they never win a
    /// minimum-iteration vote.
    iterations: [AtomicU32; NUM_STACKS],
    /// Packed `(main_stack, priority_mask)` word.
    pri_mask_main_stack: AtomicU64,
    /// Checkpoint slots indexed by frame parity.
    checkpoints: [AtomicU64; 2],
    quit_request: AtomicU32,
    total_executed: AtomicU64,
    shutdown_after: u64,
    num_active_stacks: u32,
    active_mask: u32,
    #[cfg(feature = "profiling")]
    epoch: Instant,
    #[cfg(feature = "profiling")]
    profiles: Mutex<Vec<WorkerLog>>,
}

impl Scheduler {
    /// Boot a scheduler from a validated configuration.
    pub fn new(config: &Config) -> Arc<Self> {
        let active = config.active_stacks;
        assert!(
            (1..=8).contains(&active),
            "active stack count {active} out of range"
        );

        let stacks = std::array::from_fn(|index| {
            let sentinel = Task::new(
                dont_do_it,
                index as *mut (),
                checkpoints::NEVER,
                checkpoints::NEVER,
            );
            TaskStack::new(index as u32, sentinel)
        });
        let iterations = std::array::from_fn(|index| {
            AtomicU32::new(if index < active as usize {
                0
            } else {
                INACTIVE_ITERATION
            })
        });

        let active_mask = (1u32 << active) - 1;
        info!(
            active_stacks = active,
            shutdown_after = config.shutdown_after,
            "scheduler booted"
        );

        Arc::new(Scheduler {
            stacks,
            iterations,
            pri_mask_main_stack: AtomicU64::new(priority::pack(0, active_mask)),
            checkpoints: [
                AtomicU64::new(checkpoints::BOOT_STATE),
                AtomicU64::new(checkpoints::BOOT_STATE),
            ],
            quit_request: AtomicU32::new(0),
            total_executed: AtomicU64::new(0),
            shutdown_after: config.shutdown_after,
            num_active_stacks: active,
            active_mask,
            #[cfg(feature = "profiling")]
            epoch: Instant::now(),
            #[cfg(feature = "profiling")]
            profiles: Mutex::new(Vec::new()),
        })
    }

    // ── Recording (producer side) ───────────────────────────────

    pub fn begin_recording(&self, stack: usize) {
        self.stacks[stack].begin_recording();
    }

    pub fn record_task(&self, stack: usize, task: Task) {
        self.stacks[stack].record(task);
    }

    /// Publish the recorded batch under the stack's current iteration.
    pub fn submit_recording(&self, stack: usize) {
        let iteration = self.iterations[stack].load(Ordering::Relaxed);
        self.stacks[stack].submit_recording(iteration);
    }

    // ── Observable state ────────────────────────────────────────

    pub fn total_executed(&self) -> u64 {
        self.total_executed.load(Ordering::Relaxed)
    }

    pub fn iteration(&self, stack: usize) -> u32 {
        self.iterations[stack].load(Ordering::Relaxed)
    }

    /// Packed `(main_stack, priority_mask)` snapshot.
    pub fn priority_word(&self) -> (u32, u32) {
        priority::unpack(self.pri_mask_main_stack.load(Ordering::Acquire))
    }

    /// Published `(iteration, size)` snapshot of one stack.
    pub fn published(&self, stack: usize) -> (u32, u32) {
        task::unpack(self.stacks[stack].published())
    }

    /// Fired-checkpoint set of `frame`, normalized so set means fired.
    pub fn fired_checkpoints(&self, frame: u64) -> u64 {
        checkpoints::effective(&self.checkpoints, frame)
    }

    pub fn num_active_stacks(&self) -> u32 {
        self.num_active_stacks
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_request.load(Ordering::Relaxed) != 0
    }

    pub fn request_quit(&self) {
        self.quit_request.store(1, Ordering::Relaxed);
    }

    // ── Worker side ─────────────────────────────────────────────

    /// Spawn `count` worker threads running [`worker_thread`](Self::worker_thread).
    pub fn spawn_workers(self: &Arc<Self>, count: u32) -> Result<Vec<JoinHandle<()>>> {
        (0..count)
            .map(|worker_id| {
                let sched = Arc::clone(self);
                thread::Builder::new()
                    .name(format!("worker-{worker_id}"))
                    .spawn(move || sched.worker_thread(worker_id))
                    .with_context(|| format!("spawning worker {worker_id}"))
            })
            .collect()
    }

    /// The worker main loop: select, claim, execute, publish, until quit.
    pub fn worker_thread(&self, worker_id: u32) {
        debug!(worker_id, "worker started");

        // Dispatch affinity: re-pick the stack this worker last ran while it
        // is still in the iteration we last saw, for cache locality.
        let mut last_stack: usize = 0;
        let mut last_iteration: u32 = 0;

        #[cfg(feature = "profiling")]
        let mut profiler = Profiler::new(worker_id, self.epoch);

        'frame: while self.quit_request.load(Ordering::Relaxed) == 0 {
            #[cfg(feature = "profiling")]
            profiler.sched_start();

            let word = self.pri_mask_main_stack.load(Ordering::Acquire);
            let (mut main_stack, mut m) = priority::unpack(word);

            let affine = (last_iteration
                == self.iterations[last_stack].load(Ordering::Relaxed))
                as u32;
            let distance = (last_stack as u32).wrapping_sub(main_stack) % 32;
            let mut k = priority::bsr32(((affine << distance) | 1) & m);
            m &= !(1u32 << k);

            let (stack, iteration, size, task) = loop {
                let s = ((k + main_stack) % 32) as usize;
                let state = self.stacks[s].published();
                let (iteration, size) = task::unpack(state);
                let task = self.stacks[s].read_slot(size as usize & (STACK_SIZE - 1));

                let blocked = checkpoints::blocked(
                    task.checkpoints_previous_frame,
                    task.checkpoints_current_frame,
                    &self.checkpoints,
                    iteration as u64,
                ) | (size == 0) as u64;

                if blocked == 0 && self.stacks[s].try_claim(state) {
                    break (s, iteration, size, task);
                }
                if blocked != 0 {
                    if m == 0 {
                        // Out of granted stacks: a concurrent drain may have
                        // granted more since we loaded the word.
                        if self.quit_request.load(Ordering::Relaxed) != 0 {
                            continue 'frame;
                        }
                        std::hint::spin_loop();
                        let word = self.pri_mask_main_stack.load(Ordering::Acquire);
                        let (reload_main, reload_mask) = priority::unpack(word);
                        main_stack = reload_main;
                        m = reload_mask;
                    }
                    k = m.trailing_zeros();
                    m &= !(1u32 << k);
                }
            };
            last_stack = stack;
            last_iteration = iteration;

            if size == 1 {
                // This claim drained the stack: advance its iteration, then
                // rederive the grant set. The claimed task is the producer's
                // submit task and will publish the next batch under the
                // bumped iteration.
                self.iterations[stack].fetch_add(1, Ordering::Relaxed);
                self.recompute_priority_mask();
            }

            #[cfg(feature = "profiling")]
            profiler.sched_end(stack as u32, &task);

            let reached = (task.execute)(task.args, worker_id);

            #[cfg(feature = "profiling")]
            profiler.exec_end(reached);

            if self.total_executed.fetch_add(1, Ordering::Relaxed) == self.shutdown_after {
                info!(worker_id, threshold = self.shutdown_after, "shutdown threshold reached");
                self.quit_request.store(1, Ordering::Relaxed);
            }

            if reached != 0 {
                checkpoints::publish(&self.checkpoints, iteration as u64, reached);
            }
        }

        #[cfg(feature = "profiling")]
        self.profiles.lock().unwrap().push(profiler.into_log());

        debug!(worker_id, "worker exited");
    }

    /// CAS-retried rederivation of the priority word from the iteration
    /// counters. Any two workers racing here compute identical words for
    /// identical counter views, so the CAS is a sufficient linearization.
    fn recompute_priority_mask(&self) {
        let mut old = self.pri_mask_main_stack.load(Ordering::Relaxed);
        loop {
            let (main_stack, _) = priority::unpack(old);
            let mut snapshot = [0u32; NUM_STACKS];
            for (slot, iteration) in snapshot.iter_mut().zip(&self.iterations) {
                *slot = iteration.load(Ordering::Relaxed);
            }
            let new = priority::recompute_mask(&snapshot, main_stack, self.active_mask);
            match self.pri_mask_main_stack.compare_exchange_weak(
                old,
                new,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(current) => old = current,
            }
        }
    }

    /// Worker profiling logs collected after the pool drains.
    #[cfg(feature = "profiling")]
    pub fn take_profiling_logs(&self) -> Vec<WorkerLog> {
        std::mem::take(&mut *self.profiles.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop(_args: *mut (), _worker: u32) -> u64 {
        checkpoints::NONE
    }

    fn test_config(active: u32) -> Config {
        Config {
            active_stacks: active,
            ..Config::default()
        }
    }

    #[test]
    fn boot_state_matches_contract() {
        let sched = Scheduler::new(&test_config(5));
        let (main, mask) = sched.priority_word();
        assert_eq!(main, 0);
        assert_eq!(mask, 0b11111);
        for stack in 0..5 {
            assert_eq!(sched.iteration(stack), 0);
            assert_eq!(sched.published(stack), (0, 0));
        }
        for stack in 5..NUM_STACKS {
            assert_eq!(sched.iteration(stack), INACTIVE_ITERATION);
        }
        assert_eq!(sched.fired_checkpoints(0), 0);
        assert_eq!(sched.fired_checkpoints(0u64.wrapping_sub(1)), u64::MAX);
        assert_eq!(sched.total_executed(), 0);
        assert!(!sched.quit_requested());
    }

    #[test]
    fn recording_round_trip_publishes_exact_count() {
        let sched = Scheduler::new(&test_config(2));
        sched.begin_recording(0);
        for _ in 0..7 {
            sched.record_task(0, Task::new(nop, std::ptr::null_mut(), 0, 0));
        }
        sched.submit_recording(0);
        assert_eq!(sched.published(0), (0, 7));
    }

    #[test]
    fn request_quit_is_sticky() {
        let sched = Scheduler::new(&test_config(1));
        sched.request_quit();
        assert!(sched.quit_requested());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn zero_active_stacks_is_rejected_at_boot() {
        let _ = Scheduler::new(&test_config(0));
    }
}
