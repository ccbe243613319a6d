//! # Frame Arenas — Per-Producer Bump Allocation for Task Arguments
//!
//! Task argument structs live for exactly one frame of their producing
//! subsystem: recorded with a batch, read by workers executing that batch,
//! dead once the subsystem's next submit task runs. A bump arena fits that
//! lifetime: allocation is a cursor add, and "free" is resetting the cursor
//! at the start of the next recording.
//!
//! ## Pool Layout
//!
//! One [`ArenaPool`] owns a 512 x 32 KiB backing region. Eight atomic u64
//! bitmaps track free blocks (set bit == free); claiming a block is a CAS
//! clearing the lowest set bit, releasing is a fetch-or. A [`FrameArena`]
//! holds one claimed block for its whole life and returns it on drop.
//!
//! The allocation cursor is atomic so a producer struct holding an arena
//! stays shareable across worker threads; the recording protocol guarantees
//! only one task is actually allocating at a time.
//!
//! Exhausting a block is a producer programming error and asserts fatally,
//! matching the scheduler's no-recoverable-errors posture.

use std::alloc::{alloc, dealloc, Layout};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Size of one arena block.
pub const BLOCK_SIZE: usize = 32 * 1024;
/// Blocks per pool.
pub const POOL_BLOCKS: usize = 512;
const SEGMENTS: usize = POOL_BLOCKS / 64;

/// Backing storage for every frame arena in the process.
pub struct ArenaPool {
    base: *mut u8,
    free_mask: [AtomicU64; SEGMENTS],
}

// Safety: `base` is owned for the pool's lifetime and all block handout is
// mediated by the atomic bitmaps; distinct arenas never alias.
unsafe impl Send for ArenaPool {}
unsafe impl Sync for ArenaPool {}

impl ArenaPool {
    pub fn new() -> Arc<Self> {
        let layout = Self::layout();
        // Safety: layout is non-zero and valid.
        let base = unsafe { alloc(layout) };
        assert!(!base.is_null(), "arena pool allocation failed");
        Arc::new(ArenaPool {
            base,
            free_mask: std::array::from_fn(|_| AtomicU64::new(u64::MAX)),
        })
    }

    fn layout() -> Layout {
        Layout::from_size_align(POOL_BLOCKS * BLOCK_SIZE, 64).expect("arena pool layout")
    }

    /// Number of currently free blocks, for diagnostics.
    pub fn free_blocks(&self) -> u32 {
        self.free_mask
            .iter()
            .map(|m| m.load(Ordering::Relaxed).count_ones())
            .sum()
    }

    fn claim_block(&self) -> (usize, u32) {
        for segment in 0..SEGMENTS {
            let mut old = self.free_mask[segment].load(Ordering::Relaxed);
            while old != 0 {
                let block = old.trailing_zeros();
                match self.free_mask[segment].compare_exchange_weak(
                    old,
                    old & !(1u64 << block),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return (segment, block),
                    Err(current) => old = current,
                }
            }
        }
        panic!("arena pool exhausted: all {POOL_BLOCKS} blocks claimed");
    }

    fn release_block(&self, segment: usize, block: u32) {
        self.free_mask[segment].fetch_or(1u64 << block, Ordering::Relaxed);
    }

    fn block_base(&self, segment: usize, block: u32) -> *mut u8 {
        // Safety: segment/block come from claim_block, so the offset is in
        // bounds of the backing allocation.
        unsafe { self.base.add((segment * 64 + block as usize) * BLOCK_SIZE) }
    }
}

impl Drop for ArenaPool {
    fn drop(&mut self) {
        // Safety: allocated in new() with the same layout.
        unsafe { dealloc(self.base, Self::layout()) };
    }
}

/// One claimed 32 KiB block with a bump cursor.
pub struct FrameArena {
    pool: Arc<ArenaPool>,
    segment: usize,
    block: u32,
    /// Offset of the next free byte within the block.
    cursor: AtomicUsize,
}

impl FrameArena {
    /// Claim a free block from the pool. Panics if the pool is exhausted.
    pub fn claim(pool: &Arc<ArenaPool>) -> Self {
        let (segment, block) = pool.claim_block();
        FrameArena {
            pool: Arc::clone(pool),
            segment,
            block,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Reset the cursor, invalidating every pointer handed out since the
    /// last clear. Callers own the proof that no reader remains.
    pub fn clear(&self) {
        self.cursor.store(0, Ordering::Relaxed);
    }

    /// Bytes currently allocated.
    pub fn used(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Move `value` into the arena and return a pointer valid until the next
    /// [`clear`](Self::clear).
    ///
    /// `T: Copy` because the arena never runs destructors. Panics when the
    /// block cannot fit the allocation.
    pub fn alloc<T: Copy>(&self, value: T) -> *mut T {
        let size = std::mem::size_of::<T>();
        let align = std::mem::align_of::<T>();

        let mut old = self.cursor.load(Ordering::Relaxed);
        loop {
            let aligned = (old + align - 1) & !(align - 1);
            assert!(
                aligned + size <= BLOCK_SIZE,
                "frame arena exhausted: {} bytes requested at offset {}",
                size,
                aligned
            );
            match self.cursor.compare_exchange_weak(
                old,
                aligned + size,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    let base = self.pool.block_base(self.segment, self.block);
                    // Safety: the offset is in bounds and exclusively ours by
                    // the cursor exchange; alignment was just computed.
                    unsafe {
                        let ptr = base.add(aligned) as *mut T;
                        ptr.write(value);
                        return ptr;
                    }
                }
                Err(current) => old = current,
            }
        }
    }
}

impl Drop for FrameArena {
    fn drop(&mut self) {
        self.pool.release_block(self.segment, self.block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_returns_distinct_aligned_pointers() {
        let pool = ArenaPool::new();
        let arena = FrameArena::claim(&pool);
        let a = arena.alloc(1u64);
        let b = arena.alloc(2u64);
        assert_ne!(a, b);
        assert_eq!(a as usize % std::mem::align_of::<u64>(), 0);
        assert_eq!(b as usize % std::mem::align_of::<u64>(), 0);
        unsafe {
            assert_eq!(*a, 1);
            assert_eq!(*b, 2);
        }
    }

    #[test]
    fn clear_reuses_the_same_addresses() {
        let pool = ArenaPool::new();
        let arena = FrameArena::claim(&pool);
        let first = arena.alloc(0xABu32);
        arena.clear();
        assert_eq!(arena.used(), 0);
        let second = arena.alloc(0xCDu32);
        assert_eq!(first, second, "cleared arena should bump from the block base again");
    }

    #[test]
    fn arenas_claim_disjoint_blocks() {
        let pool = ArenaPool::new();
        let a = FrameArena::claim(&pool);
        let b = FrameArena::claim(&pool);
        let pa = a.alloc(0u8) as usize;
        let pb = b.alloc(0u8) as usize;
        assert!(pa.abs_diff(pb) >= BLOCK_SIZE);
        assert_eq!(pool.free_blocks(), (POOL_BLOCKS - 2) as u32);
    }

    #[test]
    fn dropping_an_arena_releases_its_block() {
        let pool = ArenaPool::new();
        {
            let _arena = FrameArena::claim(&pool);
            assert_eq!(pool.free_blocks(), (POOL_BLOCKS - 1) as u32);
        }
        assert_eq!(pool.free_blocks(), POOL_BLOCKS as u32);
    }

    #[test]
    #[should_panic(expected = "frame arena exhausted")]
    fn overflowing_a_block_panics() {
        let pool = ArenaPool::new();
        let arena = FrameArena::claim(&pool);
        for _ in 0..(BLOCK_SIZE / std::mem::size_of::<u64>()) + 1 {
            arena.alloc(0u64);
        }
    }
}
