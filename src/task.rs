//! # Task Stacks — Fixed-Capacity Producer-Owned Work Stacks
//!
//! A task stack is a fixed array of task records owned by exactly one
//! producer subsystem. Workers consume from the top: the published size
//! indexes the next claimable slot, and claiming is a CAS decrement. Slot 0
//! holds a sentinel task that is never eligible to run.
//!
//! ## The Packed State Word
//!
//! A single atomic u64, `iterations_size`, packs the stack's current frame
//! iteration (high 32 bits) with its remaining size (low 32 bits). Every read
//! of the size therefore also tells the reader which iteration produced it,
//! and a claim CAS on the whole word safely rejects stale readers whose
//! observed iteration has been superseded: the high half changed, so the
//! exchange fails. Readers use acquire, publication uses release, the claim
//! CAS is acq-rel.
//!
//! ## Recording
//!
//! Producers refill their own stack with a three-phase sequence
//! (`begin_recording`, `record` repeated, `submit_recording`). Recording
//! happens while the published size is zero, so workers cannot observe a
//! half-written batch; the final release store of the packed word exposes the
//! whole batch atomically. The first recorded task of every batch is the
//! producer's own submit task, which is claimed last (the stack drains
//! top-down) and re-records the next frame, so the scheduler runs
//! indefinitely without a coordinator.

use std::cell::{Cell, UnsafeCell};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::STACK_SIZE;

/// A task body: receives its argument pointer and the executing worker id,
/// returns the mask of checkpoints it reached.
pub type TaskFn = fn(*mut (), u32) -> u64;

/// One unit of work plus its scheduling preconditions. Trivially copyable
/// and cache-line friendly; `args` points into the producer's frame arena.
#[derive(Clone, Copy)]
pub struct Task {
    pub execute: TaskFn,
    pub args: *mut (),
    pub checkpoints_previous_frame: u64,
    pub checkpoints_current_frame: u64,
}

impl Task {
    pub fn new(execute: TaskFn, args: *mut (), previous: u64, current: u64) -> Self {
        Task {
            execute,
            args,
            checkpoints_previous_frame: previous,
            checkpoints_current_frame: current,
        }
    }
}

/// Pack an `(iteration, size)` pair into one state word.
#[inline]
pub fn pack(iteration: u32, size: u32) -> u64 {
    (iteration as u64) << 32 | size as u64
}

/// Split a state word back into `(iteration, size)`.
#[inline]
pub fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

/// Fixed-capacity task stack for one subsystem.
#[repr(align(64))]
pub struct TaskStack {
    index: u32,
    /// Recording scratch, touched only by the owning producer.
    unpublished_size: Cell<u32>,
    iterations_size: AtomicU64,
    tasks: [UnsafeCell<Task>; STACK_SIZE],
}

// Safety: the lock-free protocol partitions access. `iterations_size` is
// atomic. Slots at indices covered by a published size are immutable until
// that batch drains; recording writes happen only while the published size
// is zero and only from the single owning producer, which also holds
// exclusive use of `unpublished_size`. Stale readers may race a slot being
// rewritten, but every racy read is discarded unless the claim CAS on the
// packed word succeeds, and the iteration half makes a superseded word
// impossible to exchange.
unsafe impl Send for TaskStack {}
unsafe impl Sync for TaskStack {}

impl TaskStack {
    /// A fresh stack with `sentinel` installed in slot 0 and nothing
    /// published (iteration 0, size 0).
    pub fn new(index: u32, sentinel: Task) -> Self {
        TaskStack {
            index,
            unpublished_size: Cell::new(1),
            iterations_size: AtomicU64::new(pack(0, 0)),
            tasks: std::array::from_fn(|_| UnsafeCell::new(sentinel)),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Current packed `(iteration, size)` word.
    #[inline]
    pub fn published(&self) -> u64 {
        self.iterations_size.load(Ordering::Acquire)
    }

    /// Copy out a slot. The copy may race a concurrent rewrite by the
    /// producer; callers must validate with [`try_claim`](Self::try_claim)
    /// before acting on it.
    #[inline]
    pub fn read_slot(&self, slot: usize) -> Task {
        debug_assert!(slot < STACK_SIZE);
        // Volatile keeps the racy copy from being elided or torn further by
        // the optimizer; the claim CAS is the actual validation.
        unsafe { self.tasks[slot].get().read_volatile() }
    }

    /// Claim the top task of the batch observed as `word` by decrementing
    /// the size half. Fails if another worker claimed first or the batch was
    /// superseded. May fail spuriously.
    #[inline]
    pub fn try_claim(&self, word: u64) -> bool {
        debug_assert!(word as u32 != 0, "claiming from an empty batch");
        self.iterations_size
            .compare_exchange_weak(word, word - 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn begin_recording(&self) {
        self.unpublished_size.set(1);
    }

    /// Append a task to the unpublished batch.
    ///
    /// Panics if the batch would exceed the stack capacity; overflowing a
    /// recording is a producer programming error.
    pub fn record(&self, task: Task) {
        let at = self.unpublished_size.get();
        assert!(
            (at as usize) < STACK_SIZE,
            "task stack {} overflow while recording",
            self.index
        );
        unsafe { *self.tasks[at as usize].get() = task };
        self.unpublished_size.set(at + 1);
    }

    /// Publish the recorded batch for `iteration`, exposing it to workers in
    /// a single release store.
    pub fn submit_recording(&self, iteration: u32) {
        let size = self.unpublished_size.get() - 1;
        self.iterations_size
            .store(pack(iteration, size), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoints;

    fn nop(_args: *mut (), _worker: u32) -> u64 {
        checkpoints::NONE
    }

    fn sentinel() -> Task {
        Task::new(nop, std::ptr::null_mut(), checkpoints::NEVER, checkpoints::NEVER)
    }

    /// Retry wrapper: the weak CAS may fail spuriously even uncontended.
    fn claim(stack: &TaskStack, word: u64) -> bool {
        (0..64).any(|_| stack.try_claim(word))
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let word = pack(7, 42);
        assert_eq!(unpack(word), (7, 42));
        assert_eq!(unpack(pack(u32::MAX, 0)), (u32::MAX, 0));
        assert_eq!(unpack(pack(0, u32::MAX)), (0, u32::MAX));
    }

    #[test]
    fn fresh_stack_publishes_nothing() {
        let stack = TaskStack::new(3, sentinel());
        assert_eq!(unpack(stack.published()), (0, 0));
        assert_eq!(stack.index(), 3);
    }

    #[test]
    fn recording_exposes_batch_atomically() {
        let stack = TaskStack::new(0, sentinel());
        stack.begin_recording();
        for _ in 0..10 {
            stack.record(Task::new(nop, std::ptr::null_mut(), 0, 0));
        }
        // Nothing visible until submit.
        assert_eq!(unpack(stack.published()), (0, 0));
        stack.submit_recording(5);
        assert_eq!(unpack(stack.published()), (5, 10));
    }

    #[test]
    fn claim_decrements_size_only() {
        let stack = TaskStack::new(0, sentinel());
        stack.begin_recording();
        stack.record(Task::new(nop, std::ptr::null_mut(), 0, 0));
        stack.submit_recording(2);

        let word = stack.published();
        assert!(claim(&stack, word));
        assert_eq!(unpack(stack.published()), (2, 0));
    }

    #[test]
    fn stale_claim_is_rejected() {
        let stack = TaskStack::new(0, sentinel());
        stack.begin_recording();
        stack.record(Task::new(nop, std::ptr::null_mut(), 0, 0));
        stack.submit_recording(0);
        let stale = stack.published();

        // The batch drains and the next iteration is published.
        assert!(claim(&stack, stale));
        stack.begin_recording();
        stack.record(Task::new(nop, std::ptr::null_mut(), 0, 0));
        stack.submit_recording(1);

        // A reader still holding the frame-0 word cannot claim from frame 1.
        assert!(!stack.try_claim(stale));
        assert_eq!(unpack(stack.published()), (1, 1));
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn recording_past_capacity_panics() {
        let stack = TaskStack::new(0, sentinel());
        stack.begin_recording();
        for _ in 0..STACK_SIZE {
            stack.record(Task::new(nop, std::ptr::null_mut(), 0, 0));
        }
    }

    #[test]
    fn slot_zero_keeps_the_sentinel() {
        let stack = TaskStack::new(0, sentinel());
        stack.begin_recording();
        stack.record(Task::new(nop, std::ptr::null_mut(), 0, 0));
        stack.submit_recording(0);
        let slot0 = stack.read_slot(0);
        assert_eq!(slot0.checkpoints_previous_frame, checkpoints::NEVER);
        assert_eq!(slot0.checkpoints_current_frame, checkpoints::NEVER);
    }
}
