//! # CLI Execution Functions
//!
//! Extracted from `main.rs` to keep the entry point slim. Contains the
//! execution logic for each subcommand: the demo frame loop (boot, subsystem
//! wiring, worker pool, event pump, teardown) and the profiling report.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Result};
use tracing::info;

use lockstep::arena::ArenaPool;
use lockstep::config::Config;
use lockstep::profiling;
use lockstep::progress::Reporter;
use lockstep::scheduler::Scheduler;
use lockstep::systems;
use lockstep::systems::input::SyntheticEvents;

use super::{Cli, Commands};

/// Resolve the effective configuration: file values first, then CLI
/// overrides.
pub fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(active) = cli.active_stacks {
        config.active_stacks = active;
    }
    if let Some(threads) = cli.threads {
        config.workers = threads;
    }
    if let Some(after) = cli.shutdown_after {
        config.shutdown_after = after;
    }
    if let Some(interval) = cli.report_interval {
        config.report_interval_secs = interval;
    }
    config.validate()?;
    Ok(config)
}

/// Run the demo frame loop until the shutdown threshold or a quit from the
/// input subsystem.
pub fn run(cli: &Cli) -> Result<()> {
    let config = resolve_config(cli)?;
    // The demo wires the five named subsystems onto stacks 0..5; extra
    // active stacks get filler producers.
    ensure!(
        config.active_stacks >= 5,
        "the demo needs at least 5 active stacks, got {}",
        config.active_stacks
    );

    let (quit_after_frames, profile_out) = match &cli.command {
        Commands::Run {
            quit_after_frames,
            profile_out,
        } => (*quit_after_frames, profile_out.clone()),
        _ => (None, None),
    };

    let workers = config.effective_workers();
    info!(
        workers,
        active_stacks = config.active_stacks,
        "starting frame loop"
    );

    let pool = ArenaPool::new();
    let sched = Scheduler::new(&config);

    let input = systems::input::Input::init(&sched, 0);
    let _physics = systems::physics::Physics::init(&sched, 1, &pool);
    let _animation = systems::animation::Animation::init(&sched, 2, &pool);
    let _ai = systems::ai::Ai::init(&sched, 3, &pool);
    let _rendering = systems::rendering::Rendering::init(&sched, 4, &pool);
    let _fillers: Vec<_> = (5..config.active_stacks as usize)
        .map(|stack| systems::filler::Filler::init(&sched, stack, 20))
        .collect();

    let reporter = if config.report_interval_secs > 0 {
        let reporter = Reporter::new(
            Arc::clone(&sched),
            Duration::from_secs(config.report_interval_secs),
        );
        reporter.start_reporter();
        Some(reporter)
    } else {
        None
    };

    let handles = sched.spawn_workers(workers)?;

    // The pump owns this thread until shutdown, like a real OS event loop.
    let mut source = SyntheticEvents::new(quit_after_frames);
    input.input_loop(&mut source);

    for handle in handles {
        handle.join().expect("worker panicked");
    }
    if let Some(reporter) = reporter {
        reporter.stop();
    }

    #[cfg(feature = "profiling")]
    if let Some(path) = &profile_out {
        let logs = sched.take_profiling_logs();
        profiling::write_dump(path, logs)?;
        info!(path = %path.display(), "profiling dump written");
    }
    #[cfg(not(feature = "profiling"))]
    if profile_out.is_some() {
        tracing::warn!("built without the profiling feature, no dump written");
    }

    let frames: Vec<u32> = (0..config.active_stacks as usize)
        .map(|stack| sched.iteration(stack))
        .collect();
    info!(
        total_executed = sched.total_executed(),
        frames = ?frames,
        "frame loop finished"
    );
    Ok(())
}

/// Summarize a profiling dump.
pub fn report(path: &std::path::Path) -> Result<()> {
    let dump = profiling::load_dump(path)?;
    print!("{}", profiling::summarize(&dump));
    Ok(())
}
