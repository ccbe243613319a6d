//! # Profiling — Per-Worker Scheduling/Execution Timelines
//!
//! A compile-time opt-in (`--features profiling`). Each worker owns a
//! wrapping 256-slot ring of timing records: wall-clock marks for schedule
//! start, schedule end and execute end, cycle counts for the schedule and
//! execute phases, and the scheduling inputs of the task that ran (stack,
//! declared checkpoints, reached checkpoints). Writes are strictly
//! thread-local; the rings are collected only after the worker pool drains,
//! so the hot path never synchronizes for the profiler's sake.
//!
//! The dump format is JSON with a wall-clock capture header; the `report`
//! subcommand summarizes a dump without needing the feature enabled.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Slots per worker ring; older records are overwritten modulo this.
pub const RING_SIZE: usize = 256;

/// One scheduled-and-executed task as seen by its worker. Wall-clock fields
/// are milliseconds since the scheduler epoch.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub sched_start: f64,
    pub sched_end: f64,
    pub exec_end: f64,
    pub rdtscp_sched: u64,
    pub rdtscp_exec: u64,
    pub stack: u32,
    pub checkpoints_previous_frame: u64,
    pub checkpoints_current_frame: u64,
    pub reached_checkpoints: u64,
}

/// One worker's collected ring, in chronological order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerLog {
    pub worker_id: u32,
    /// Total tasks profiled; may exceed `records.len()` once the ring wraps.
    pub executed: u64,
    pub records: Vec<ProfileRecord>,
}

/// Top-level dump written at teardown.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProfilingDump {
    pub captured_at: DateTime<Utc>,
    pub workers: Vec<WorkerLog>,
}

pub fn write_dump(path: &Path, workers: Vec<WorkerLog>) -> Result<()> {
    let dump = ProfilingDump {
        captured_at: Utc::now(),
        workers,
    };
    let json = serde_json::to_string_pretty(&dump)?;
    std::fs::write(path, json)
        .with_context(|| format!("writing profiling dump {}", path.display()))?;
    Ok(())
}

pub fn load_dump(path: &Path) -> Result<ProfilingDump> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading profiling dump {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("parsing profiling dump {}", path.display()))
}

/// Human-readable per-worker summary of a dump.
pub fn summarize(dump: &ProfilingDump) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "captured at: {}", dump.captured_at.to_rfc3339());
    for worker in &dump.workers {
        let n = worker.records.len();
        if n == 0 {
            let _ = writeln!(out, "worker {}: no records", worker.worker_id);
            continue;
        }
        let mean_sched: f64 =
            worker.records.iter().map(|r| r.rdtscp_sched as f64).sum::<f64>() / n as f64;
        let mean_exec: f64 =
            worker.records.iter().map(|r| r.rdtscp_exec as f64).sum::<f64>() / n as f64;

        let mut per_stack = std::collections::BTreeMap::new();
        for record in &worker.records {
            *per_stack.entry(record.stack).or_insert(0u64) += 1;
        }
        let stacks: Vec<String> = per_stack
            .iter()
            .map(|(stack, count)| format!("{stack}:{count}"))
            .collect();

        let _ = writeln!(
            out,
            "worker {}: {} executed, {} in ring, sched {:.0} cycles avg, exec {:.0} cycles avg, stacks [{}]",
            worker.worker_id,
            worker.executed,
            n,
            mean_sched,
            mean_exec,
            stacks.join(" ")
        );
    }
    out
}

#[cfg(feature = "profiling")]
pub use recorder::Profiler;

#[cfg(feature = "profiling")]
mod recorder {
    use super::{ProfileRecord, WorkerLog, RING_SIZE};
    use crate::task::Task;
    use std::time::Instant;

    #[inline]
    fn cycle_counter() -> u64 {
        #[cfg(target_arch = "x86_64")]
        {
            // Safety: rdtscp is unprivileged and available on all x86_64.
            unsafe {
                let mut aux = 0u32;
                std::arch::x86_64::__rdtscp(&mut aux)
            }
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            0
        }
    }

    /// Thread-local recorder driven by the worker loop.
    pub struct Profiler {
        worker_id: u32,
        epoch: Instant,
        index: u64,
        ring: Vec<ProfileRecord>,
        cycle_mark: u64,
    }

    impl Profiler {
        pub fn new(worker_id: u32, epoch: Instant) -> Self {
            Profiler {
                worker_id,
                epoch,
                index: 0,
                ring: vec![ProfileRecord::default(); RING_SIZE],
                cycle_mark: 0,
            }
        }

        #[inline]
        fn millis(&self) -> f64 {
            self.epoch.elapsed().as_secs_f64() * 1e3
        }

        #[inline]
        fn slot(&mut self) -> &mut ProfileRecord {
            &mut self.ring[(self.index % RING_SIZE as u64) as usize]
        }

        #[inline]
        pub fn sched_start(&mut self) {
            let now = self.millis();
            self.slot().sched_start = now;
            self.cycle_mark = cycle_counter();
        }

        #[inline]
        pub fn sched_end(&mut self, stack: u32, task: &Task) {
            let cycles = cycle_counter().wrapping_sub(self.cycle_mark);
            let now = self.millis();
            let previous = task.checkpoints_previous_frame;
            let current = task.checkpoints_current_frame;
            let record = self.slot();
            record.rdtscp_sched = cycles;
            record.sched_end = now;
            record.stack = stack;
            record.checkpoints_previous_frame = previous;
            record.checkpoints_current_frame = current;
            self.cycle_mark = cycle_counter();
        }

        #[inline]
        pub fn exec_end(&mut self, reached: u64) {
            let cycles = cycle_counter().wrapping_sub(self.cycle_mark);
            let now = self.millis();
            let record = self.slot();
            record.rdtscp_exec = cycles;
            record.exec_end = now;
            record.reached_checkpoints = reached;
            self.index += 1;
        }

        /// Consume the recorder into a chronologically ordered log.
        pub fn into_log(self) -> WorkerLog {
            let executed = self.index;
            let records = if executed >= RING_SIZE as u64 {
                // Ring wrapped: oldest record sits at the write index.
                let split = (executed % RING_SIZE as u64) as usize;
                let mut ordered = Vec::with_capacity(RING_SIZE);
                ordered.extend_from_slice(&self.ring[split..]);
                ordered.extend_from_slice(&self.ring[..split]);
                ordered
            } else {
                self.ring[..executed as usize].to_vec()
            };
            WorkerLog {
                worker_id: self.worker_id,
                executed,
                records,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(stack: u32, sched: u64, exec: u64) -> ProfileRecord {
        ProfileRecord {
            rdtscp_sched: sched,
            rdtscp_exec: exec,
            stack,
            ..Default::default()
        }
    }

    #[test]
    fn dump_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        let workers = vec![WorkerLog {
            worker_id: 0,
            executed: 2,
            records: vec![record(0, 100, 5000), record(1, 120, 4000)],
        }];
        write_dump(&path, workers).unwrap();

        let dump = load_dump(&path).unwrap();
        assert_eq!(dump.workers.len(), 1);
        assert_eq!(dump.workers[0].executed, 2);
        assert_eq!(dump.workers[0].records[1].stack, 1);
    }

    #[test]
    fn summarize_reports_per_worker_lines() {
        let dump = ProfilingDump {
            captured_at: Utc::now(),
            workers: vec![
                WorkerLog {
                    worker_id: 0,
                    executed: 2,
                    records: vec![record(0, 100, 5000), record(0, 200, 7000)],
                },
                WorkerLog {
                    worker_id: 1,
                    executed: 0,
                    records: vec![],
                },
            ],
        };
        let text = summarize(&dump);
        assert!(text.contains("worker 0: 2 executed"));
        assert!(text.contains("sched 150 cycles avg"));
        assert!(text.contains("worker 1: no records"));
    }

    #[cfg(feature = "profiling")]
    #[test]
    fn recorder_wraps_and_orders_chronologically() {
        use crate::checkpoints;
        use crate::task::Task;

        fn nop(_args: *mut (), _worker: u32) -> u64 {
            checkpoints::NONE
        }

        let mut profiler = Profiler::new(7, std::time::Instant::now());
        let task = Task::new(nop, std::ptr::null_mut(), 0, 0);
        for stack in 0..(RING_SIZE + 10) as u32 {
            profiler.sched_start();
            profiler.sched_end(stack, &task);
            profiler.exec_end(0);
        }
        let log = profiler.into_log();
        assert_eq!(log.executed, (RING_SIZE + 10) as u64);
        assert_eq!(log.records.len(), RING_SIZE);
        // Oldest surviving record is the one written right after the wrap
        // overwrote slot 0 through 9.
        assert_eq!(log.records[0].stack, 10);
        assert_eq!(log.records[RING_SIZE - 1].stack, (RING_SIZE + 10 - 1) as u32);
    }
}
