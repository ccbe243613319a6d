use criterion::{black_box, criterion_group, criterion_main, Criterion};

use lockstep::checkpoints;
use lockstep::priority;
use lockstep::task::{Task, TaskStack};
use lockstep::{INACTIVE_ITERATION, NUM_STACKS, STACK_SIZE};

use std::sync::atomic::AtomicU64;

fn convoy_iterations() -> [u32; NUM_STACKS] {
    std::array::from_fn(|j| match j {
        0..=4 => 1000 + (j as u32 & 1),
        _ => INACTIVE_ITERATION,
    })
}

fn bench_recompute_scalar(c: &mut Criterion) {
    let iterations = convoy_iterations();
    c.bench_function("recompute_mask_scalar(5 active)", |b| {
        b.iter(|| {
            priority::recompute_mask_scalar(black_box(&iterations), black_box(2), black_box(0b11111))
        });
    });
}

#[cfg(target_arch = "x86_64")]
fn bench_recompute_sse(c: &mut Criterion) {
    if !std::arch::is_x86_feature_detected!("sse4.1")
        || !std::arch::is_x86_feature_detected!("ssse3")
    {
        return;
    }
    let iterations = convoy_iterations();
    c.bench_function("recompute_mask_sse(5 active)", |b| {
        b.iter(|| unsafe {
            priority::recompute_mask_sse(black_box(&iterations), black_box(2), black_box(0b11111))
        });
    });
}

fn bench_dependency_test(c: &mut Criterion) {
    let slots = [
        AtomicU64::new(checkpoints::BOOT_STATE),
        AtomicU64::new(checkpoints::BOOT_STATE),
    ];
    checkpoints::publish(&slots, 4, checkpoints::INPUT1 | checkpoints::PHYSICS1);
    c.bench_function("checkpoint_dependency_test", |b| {
        b.iter(|| {
            checkpoints::blocked(
                black_box(checkpoints::RENDERING2),
                black_box(checkpoints::PHYSICS1),
                black_box(&slots),
                black_box(4),
            )
        });
    });
}

fn nop(_args: *mut (), _worker: u32) -> u64 {
    checkpoints::NONE
}

fn bench_claim_drain_cycle(c: &mut Criterion) {
    let sentinel = Task::new(nop, std::ptr::null_mut(), checkpoints::NEVER, checkpoints::NEVER);
    let stack = TaskStack::new(0, sentinel);
    let batch = (STACK_SIZE - 1) as u64;

    c.bench_function("claim_drain_cycle(127 tasks)", |b| {
        let mut iteration = 0u32;
        b.iter(|| {
            stack.begin_recording();
            for _ in 0..batch {
                stack.record(Task::new(nop, std::ptr::null_mut(), 0, 0));
            }
            stack.submit_recording(iteration);
            for _ in 0..batch {
                let word = stack.published();
                while !stack.try_claim(word) {}
                black_box(stack.read_slot((word as u32 as usize) & (STACK_SIZE - 1)));
            }
            iteration += 1;
        });
    });
}

#[cfg(target_arch = "x86_64")]
criterion_group!(
    benches,
    bench_recompute_scalar,
    bench_recompute_sse,
    bench_dependency_test,
    bench_claim_drain_cycle
);
#[cfg(not(target_arch = "x86_64"))]
criterion_group!(
    benches,
    bench_recompute_scalar,
    bench_dependency_test,
    bench_claim_drain_cycle
);
criterion_main!(benches);
