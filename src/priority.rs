//! # Priority Mask — Lock-Step Convoy Recomputation
//!
//! One atomic u64 packs the current main stack index (high 32 bits) with a
//! 32-bit priority mask (low 32 bits). The mask lives in *rotated*
//! coordinates: bit 0 is the main stack, bit `b` is stack
//! `(main_stack + b) % 32`. A set bit grants a stack permission to run its
//! current batch; the main stack is always granted.
//!
//! ## Recomputation
//!
//! Whenever a stack drains, the grant set is rederived from the per-stack
//! iteration counters. The convoy rule: only stacks at the globally smallest
//! iteration may run, so no stack advances more than one iteration past the
//! slowest active stack. The reduction:
//!
//! 1. Normalize the 16 counters into main-relative order by adding -1 to
//!    stacks whose absolute index precedes the main stack (they sit one
//!    iteration ahead of the wavefront when level with it).
//! 2. Horizontal min, then a per-stack equality compare against the min.
//! 3. Pack the 16 compares into a bitmask in absolute stack order, rotate it
//!    into main-relative coordinates.
//! 4. Advance the main stack to the nearest granted stack (`bsf`), rotate
//!    again so bit 0 tracks it, and force the bits that wrapped off the
//!    bottom: stacks between the old and new main sit at the minimum under
//!    the new normalization.
//! 5. Mask to the active stacks, rotated to match.
//!
//! The result is a pure function of `(iterations, old_main_stack,
//! active_mask)`; concurrent recomputations observing the same counters
//! produce identical words, so a CAS commit is a sufficient linearization.
//! Inactive stacks hold an iteration of `0x7FFF_FFFF` and can never tie the
//! minimum (the equality compare is signed, active counters are far
//! smaller), and the active mask clears them regardless.
//!
//! An SSE path (SSE2 loads/min/compare, SSSE3 shuffle, SSE4.1 byte blend)
//! mirrors the scalar reduction lane-for-lane and is selected at runtime on
//! x86_64; the scalar path is the reference the SSE path is tested against.

use crate::NUM_STACKS;

/// Pack a `(main_stack, mask)` pair into one priority word.
#[inline]
pub fn pack(main_stack: u32, mask: u32) -> u64 {
    (main_stack as u64) << 32 | mask as u64
}

/// Split a priority word into `(main_stack, mask)`.
#[inline]
pub fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

/// Highest set bit index. Callers guarantee `m != 0`.
#[inline]
pub fn bsr32(m: u32) -> u32 {
    debug_assert!(m != 0);
    31 - m.leading_zeros()
}

/// Recompute the priority word from an iteration snapshot.
///
/// `active_mask` has one bit per active stack in absolute coordinates
/// (`(1 << num_active_stacks) - 1`).
#[inline]
pub fn recompute_mask(iterations: &[u32; NUM_STACKS], main_stack: u32, active_mask: u32) -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("sse4.1")
            && std::arch::is_x86_feature_detected!("ssse3")
        {
            // Safety: feature presence checked above.
            return unsafe { recompute_mask_sse(iterations, main_stack, active_mask) };
        }
    }
    recompute_mask_scalar(iterations, main_stack, active_mask)
}

/// Scalar reference reduction. Semantically identical to the SSE path.
pub fn recompute_mask_scalar(
    iterations: &[u32; NUM_STACKS],
    main_stack: u32,
    active_mask: u32,
) -> u64 {
    let ms = main_stack as i32;
    let mut rotated = [0i32; NUM_STACKS];
    for (j, slot) in rotated.iter_mut().enumerate() {
        let ahead = (ms > j as i32) as i32;
        *slot = (iterations[j] as i32).wrapping_sub(ahead);
    }
    let min = rotated.iter().copied().min().unwrap_or(0);

    let mut m: u32 = 0;
    for (j, &it) in rotated.iter().enumerate() {
        m |= ((it == min) as u32) << j;
    }
    finish(m, main_stack, active_mask)
}

/// Shared tail: rotate the absolute-order minimum mask into main-relative
/// coordinates, advance the main stack, force the wrapped interval, apply
/// the active mask.
#[inline]
fn finish(minimum_mask: u32, main_stack: u32, active_mask: u32) -> u64 {
    let mut m = minimum_mask.rotate_right(main_stack);
    let k = m.trailing_zeros();
    let new_main = (k + main_stack) % 32;
    m = m.rotate_right(k);
    // Stacks in [old_main, new_main) wrapped off the bottom of the rotation;
    // under the new main they are exactly at the minimum. The 64-bit
    // intermediate makes a zero advance force nothing.
    let advance = new_main.wrapping_sub(main_stack) % 32;
    m |= !(((1u64 << (32 - advance)) as u32).wrapping_sub(1));
    m &= active_mask.rotate_right(new_main);
    pack(new_main, m)
}

/// SSE2/SSSE3/SSE4.1 reduction, ported lane-for-lane from the scalar path.
///
/// Safety: requires SSSE3 and SSE4.1.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2,ssse3,sse4.1")]
pub unsafe fn recompute_mask_sse(
    iterations: &[u32; NUM_STACKS],
    main_stack: u32,
    active_mask: u32,
) -> u64 {
    use std::arch::x86_64::*;

    // Absolute stack indices per 4-lane group.
    const RANGE_16: [i32; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];
    // Byte-blend selectors plus the final shuffle that gathers one byte per
    // stack into absolute order for movemask.
    const LANE_MASK: [u32; 16] = [
        0x0080_0000, 0x0080_0000, 0x0080_0000, 0x0080_0000,
        0x0000_8000, 0x0000_8000, 0x0000_8000, 0x0000_8000,
        0x0000_0080, 0x0000_0080, 0x0000_0080, 0x0000_0080,
        0x0F0B_0703, 0x0E0A_0602, 0x0D09_0501, 0x0C08_0400,
    ];

    let base = iterations.as_ptr() as *const __m128i;
    let range = RANGE_16.as_ptr() as *const __m128i;
    let lanes = LANE_MASK.as_ptr() as *const __m128i;

    let ms = _mm_set1_epi32(main_stack as i32);

    let mut i0 = _mm_loadu_si128(base);
    let mut i1 = _mm_loadu_si128(base.add(1));
    let mut i2 = _mm_loadu_si128(base.add(2));
    let mut i3 = _mm_loadu_si128(base.add(3));

    // cmpgt yields -1 where main_stack > index: the rotation adjustment.
    i0 = _mm_add_epi32(i0, _mm_cmpgt_epi32(ms, _mm_loadu_si128(range)));
    i1 = _mm_add_epi32(i1, _mm_cmpgt_epi32(ms, _mm_loadu_si128(range.add(1))));
    i2 = _mm_add_epi32(i2, _mm_cmpgt_epi32(ms, _mm_loadu_si128(range.add(2))));
    i3 = _mm_add_epi32(i3, _mm_cmpgt_epi32(ms, _mm_loadu_si128(range.add(3))));

    // Horizontal signed min, splatted across all four lanes.
    let mut l0 = _mm_min_epi32(i0, i1);
    l0 = _mm_min_epi32(l0, i2);
    l0 = _mm_min_epi32(l0, i3);
    let mut l1 = _mm_shuffle_epi32::<0x1B>(l0);
    l0 = _mm_min_epi32(l0, l1);
    l1 = _mm_shuffle_epi32::<0x01>(l0);
    l0 = _mm_min_epi32(l0, l1);
    l0 = _mm_shuffle_epi32::<0x00>(l0);

    let c0 = _mm_cmpeq_epi32(i0, l0);
    let c1 = _mm_cmpeq_epi32(i1, l0);
    let c2 = _mm_cmpeq_epi32(i2, l0);
    let c3 = _mm_cmpeq_epi32(i3, l0);

    // Blend one byte per register into each dword, then shuffle those bytes
    // into absolute stack order so movemask produces bit j == stack j.
    let mut c = _mm_blendv_epi8(c0, c1, _mm_loadu_si128(lanes));
    c = _mm_blendv_epi8(c, c2, _mm_loadu_si128(lanes.add(1)));
    c = _mm_blendv_epi8(c, c3, _mm_loadu_si128(lanes.add(2)));
    c = _mm_shuffle_epi8(c, _mm_loadu_si128(lanes.add(3)));

    let m = _mm_movemask_epi8(c) as u32;
    finish(m, main_stack, active_mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::INACTIVE_ITERATION;

    #[test]
    fn pack_unpack_roundtrip() {
        assert_eq!(unpack(pack(5, 0b11011)), (5, 0b11011));
        assert_eq!(unpack(pack(31, u32::MAX)), (31, u32::MAX));
    }

    #[test]
    fn bsr_picks_highest_bit() {
        assert_eq!(bsr32(1), 0);
        assert_eq!(bsr32(0b1010_0000), 7);
        assert_eq!(bsr32(u32::MAX), 31);
    }

    fn fresh_iterations(active: usize) -> [u32; NUM_STACKS] {
        std::array::from_fn(|j| if j < active { 0 } else { INACTIVE_ITERATION })
    }

    #[test]
    fn boot_state_grants_all_active_stacks() {
        let iters = fresh_iterations(5);
        let (main, mask) = unpack(recompute_mask_scalar(&iters, 0, 0b11111));
        assert_eq!(main, 0);
        assert_eq!(mask, 0b11111);
    }

    #[test]
    fn drained_main_stack_rotates_to_next_straggler() {
        // Stack 0 has advanced to iteration 1; stacks 1..5 still at 0.
        let mut iters = fresh_iterations(5);
        iters[0] = 1;
        let (main, mask) = unpack(recompute_mask_scalar(&iters, 0, 0b11111));
        assert_eq!(main, 1);
        // Bits 0..3 are stacks 1..4, still at the minimum. Bit 31 is stack 0
        // riding the forced interval: under the new main its normalized
        // iteration drops back to the minimum, so its freshly published
        // batch may start while the stragglers finish theirs.
        assert_eq!(mask, 0x8000_000F);
    }

    #[test]
    fn wavefront_wraps_back_to_stack_zero() {
        // All active stacks level at iteration 1 with the main at 3. The
        // stacks preceding the main normalize one lower, so the main wraps
        // around to stack 0 and the trailing stacks ride in on the forced
        // interval: every active stack is granted again.
        let mut iters = fresh_iterations(5);
        for it in iters.iter_mut().take(5) {
            *it = 1;
        }
        let (main, mask) = unpack(recompute_mask_scalar(&iters, 3, 0b11111));
        assert_eq!(main, 0);
        assert_eq!(mask, 0b11111);
    }

    #[test]
    fn inactive_stacks_are_never_granted() {
        let iters = fresh_iterations(5);
        for main in 0..5u32 {
            let (new_main, mask) = unpack(recompute_mask_scalar(&iters, main, 0b11111));
            // Rotate the grant mask back to absolute coordinates.
            let absolute = mask.rotate_left(new_main);
            assert_eq!(absolute & !0b11111, 0, "main {main} granted an inactive stack");
        }
    }

    #[test]
    fn single_active_stack_keeps_sole_grant() {
        let iters = fresh_iterations(1);
        let (main, mask) = unpack(recompute_mask_scalar(&iters, 0, 0b1));
        assert_eq!(main, 0);
        assert_eq!(mask, 0b1);
    }

    #[test]
    fn zero_advance_forces_nothing() {
        // Main stays at the minimum: the wrapped-interval force must not
        // grant stacks that are ahead.
        let mut iters = fresh_iterations(5);
        iters[2] = 1;
        let (main, mask) = unpack(recompute_mask_scalar(&iters, 0, 0b11111));
        assert_eq!(main, 0);
        let absolute = mask.rotate_left(main);
        assert_eq!(absolute & (1 << 2), 0, "stack 2 is ahead and must not be granted");
        assert_eq!(absolute, 0b11011);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn sse_matches_scalar_on_structured_vectors() {
        if !std::arch::is_x86_feature_detected!("sse4.1")
            || !std::arch::is_x86_feature_detected!("ssse3")
        {
            return;
        }
        let cases: Vec<[u32; NUM_STACKS]> = vec![
            fresh_iterations(5),
            fresh_iterations(8),
            {
                let mut v = fresh_iterations(5);
                v[0] = 1;
                v
            },
            {
                let mut v = fresh_iterations(8);
                for (j, it) in v.iter_mut().enumerate().take(8) {
                    *it = (j as u32) % 2 + 10;
                }
                v
            },
        ];
        for iters in &cases {
            for main in 0..8u32 {
                for active in [0b1, 0b11111, 0xFF] {
                    let scalar = recompute_mask_scalar(iters, main, active);
                    let sse = unsafe { recompute_mask_sse(iters, main, active) };
                    assert_eq!(scalar, sse, "iters {iters:?} main {main} active {active:#x}");
                }
            }
        }
    }
}
