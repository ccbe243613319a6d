//! # Progress — Background Scheduler Progress Reporter
//!
//! A dedicated thread samples the scheduler's observable counters on an
//! interval and logs one structured line: executed-task count, throughput
//! since the previous sample, and the frame window (min/max iteration among
//! active stacks). The reporter is outside every hot path and shuts down
//! cleanly via an atomic flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::scheduler::Scheduler;

pub struct Reporter {
    sched: Arc<Scheduler>,
    interval: Duration,
    start: Instant,
    last_executed: AtomicU64,
    shutdown: AtomicBool,
}

impl Reporter {
    pub fn new(sched: Arc<Scheduler>, interval: Duration) -> Arc<Self> {
        Arc::new(Reporter {
            sched,
            interval,
            start: Instant::now(),
            last_executed: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn start_reporter(self: &Arc<Self>) -> thread::JoinHandle<()> {
        let reporter = Arc::clone(self);
        thread::spawn(move || loop {
            thread::sleep(reporter.interval);
            if reporter.shutdown.load(Ordering::Relaxed) {
                break;
            }
            reporter.report_once();
        })
    }

    pub fn report_once(&self) {
        let executed = self.sched.total_executed();
        let previous = self.last_executed.swap(executed, Ordering::Relaxed);
        let rate = (executed.saturating_sub(previous)) as f64 / self.interval.as_secs_f64();

        let active = self.sched.num_active_stacks() as usize;
        let mut frame_min = u32::MAX;
        let mut frame_max = 0u32;
        for stack in 0..active {
            let iteration = self.sched.iteration(stack);
            frame_min = frame_min.min(iteration);
            frame_max = frame_max.max(iteration);
        }

        info!(
            executed,
            rate_per_sec = rate as u64,
            frame_min,
            frame_max,
            elapsed_secs = self.start.elapsed().as_secs(),
            "scheduler progress"
        );
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
