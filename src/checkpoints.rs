//! # Checkpoints — Frame-Scoped Execution Events
//!
//! A checkpoint is a named 1-bit event fired at most once per frame by exactly
//! one task. Tasks declare checkpoint *requirements* (bits that must have fired
//! in the current or previous frame before they may run) and *publish* the
//! checkpoints they reach by returning a bitmask from their execute function.
//!
//! ## Polarity Rotation
//!
//! Two 64-bit atomic slots carry the fired-state, indexed by frame parity
//! (`frame & 1`). The *meaning* of a bit alternates with `frame >> 1`: in one
//! rotation a set bit means "fired", in the next a clear bit does. Because
//! every declared checkpoint fires exactly once per frame (a contract on
//! producers), publishing by XOR flips each bit once per frame and the slot is
//! automatically in the correct state for its next reuse two frames later.
//! No reset write is ever needed.
//!
//! `effective(slots, f)` normalizes a slot to "set bit == fired in frame f"
//! regardless of which rotation frame `f` is in, so the dependency test is a
//! constant-time, branch-free pair of AND-NOTs.
//!
//! ## Boot State
//!
//! Both slots boot as all-ones: under the polarity scheme this reads as
//! "nothing has fired yet in frame 0; everything fired in frame -1", which
//! lets first-frame tasks with no real history start immediately.

use std::sync::atomic::{AtomicU64, Ordering};

pub const NONE: u64 = 0;
pub const INPUT1: u64 = 1 << 0;
pub const PHYSICS1: u64 = 1 << 1;
pub const PHYSICS2: u64 = 1 << 2;
pub const PHYSICS3: u64 = 1 << 3;
pub const PHYSICS4: u64 = 1 << 4;
pub const ANIMATION1: u64 = 1 << 5;
pub const ANIMATION2: u64 = 1 << 6;
pub const ANIMATION3: u64 = 1 << 7;
pub const AI1: u64 = 1 << 8;
pub const AI2: u64 = 1 << 9;
pub const STREAMING1: u64 = 1 << 10;
pub const STREAMING2: u64 = 1 << 11;
pub const STREAMING3: u64 = 1 << 12;
pub const STREAMING4: u64 = 1 << 13;
pub const SOUND1: u64 = 1 << 14;
pub const RENDERING1: u64 = 1 << 15;
pub const RENDERING2: u64 = 1 << 16;
pub const RENDERING3: u64 = 1 << 17;
pub const RENDERING_WRITE_PERF_OVERLAY: u64 = 1 << 18;
pub const RENDERING_PRESENT: u64 = 1 << 19;

/// Reserved for the sentinel task in slot 0 of every stack. Never fired by
/// any task, so anything requiring it is permanently blocked.
pub const NEVER: u64 = 1 << 63;

/// Boot value for both checkpoint slots.
pub const BOOT_STATE: u64 = u64::MAX;

const NAMES: [(&str, u64); 21] = [
    ("INPUT1", INPUT1),
    ("PHYSICS1", PHYSICS1),
    ("PHYSICS2", PHYSICS2),
    ("PHYSICS3", PHYSICS3),
    ("PHYSICS4", PHYSICS4),
    ("ANIMATION1", ANIMATION1),
    ("ANIMATION2", ANIMATION2),
    ("ANIMATION3", ANIMATION3),
    ("AI1", AI1),
    ("AI2", AI2),
    ("STREAMING1", STREAMING1),
    ("STREAMING2", STREAMING2),
    ("STREAMING3", STREAMING3),
    ("STREAMING4", STREAMING4),
    ("SOUND1", SOUND1),
    ("RENDERING1", RENDERING1),
    ("RENDERING2", RENDERING2),
    ("RENDERING3", RENDERING3),
    ("RENDERING_WRITE_PERF_OVERLAY", RENDERING_WRITE_PERF_OVERLAY),
    ("RENDERING_PRESENT", RENDERING_PRESENT),
    ("NEVER", NEVER),
];

/// XOR mask that normalizes a checkpoint slot for frame `frame`. Alternates
/// between all-zeros and all-ones with `frame >> 1`.
#[inline]
pub fn parity_mask(frame: u64) -> u64 {
    ((frame >> 1) & 1).wrapping_sub(1)
}

/// The fired-set of frame `frame`, normalized so a set bit means "fired".
///
/// `frame` is the 64-bit extension of a stack iteration; frame -1 is reached
/// by wrapping subtraction and resolves to the opposite-parity slot with the
/// opposite normalization, which the boot state encodes as "all fired".
#[inline]
pub fn effective(slots: &[AtomicU64; 2], frame: u64) -> u64 {
    slots[(frame & 1) as usize].load(Ordering::Acquire) ^ parity_mask(frame)
}

/// Branch-free dependency test: nonzero iff some required checkpoint has not
/// fired yet. `required_previous` is tested against frame `frame - 1`,
/// `required_current` against frame `frame`.
#[inline]
pub fn blocked(
    required_previous: u64,
    required_current: u64,
    slots: &[AtomicU64; 2],
    frame: u64,
) -> u64 {
    let previous = frame.wrapping_sub(1);
    (required_current & !effective(slots, frame))
        | (required_previous & !effective(slots, previous))
}

/// Publish reached checkpoints for frame `frame`. Release ordering makes the
/// task's writes visible to any task whose dependency test observes the bits.
#[inline]
pub fn publish(slots: &[AtomicU64; 2], frame: u64, reached: u64) {
    slots[(frame & 1) as usize].fetch_xor(reached, Ordering::Release);
}

/// Render a checkpoint mask as a `|`-separated name list, for diagnostics.
pub fn describe(mask: u64) -> String {
    if mask == NONE {
        return "NONE".to_string();
    }
    let mut names: Vec<&str> = NAMES
        .iter()
        .filter(|(_, bit)| mask & bit != 0)
        .map(|(name, _)| *name)
        .collect();
    let known: u64 = NAMES.iter().map(|(_, bit)| bit).sum();
    if mask & !known != 0 {
        names.push("?");
    }
    names.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot_slots() -> [AtomicU64; 2] {
        [AtomicU64::new(BOOT_STATE), AtomicU64::new(BOOT_STATE)]
    }

    #[test]
    fn boot_state_nothing_fired_in_frame_zero() {
        let slots = boot_slots();
        assert_eq!(effective(&slots, 0), 0);
    }

    #[test]
    fn boot_state_everything_fired_in_frame_minus_one() {
        let slots = boot_slots();
        // Frame -1 as seen from frame 0.
        assert_eq!(effective(&slots, 0u64.wrapping_sub(1)), u64::MAX);
    }

    #[test]
    fn task_with_no_requirements_is_never_blocked() {
        let slots = boot_slots();
        for frame in 0..4 {
            assert_eq!(blocked(NONE, NONE, &slots, frame), 0);
        }
    }

    #[test]
    fn current_frame_requirement_blocks_until_published() {
        let slots = boot_slots();
        assert_ne!(blocked(NONE, PHYSICS1, &slots, 0), 0);
        publish(&slots, 0, PHYSICS1);
        assert_eq!(blocked(NONE, PHYSICS1, &slots, 0), 0);
    }

    #[test]
    fn previous_frame_requirement_satisfied_by_boot_history() {
        // Frame -1 is "everything fired", so previous-frame requirements
        // never block the very first frame.
        let slots = boot_slots();
        assert_eq!(blocked(RENDERING_PRESENT, NONE, &slots, 0), 0);
    }

    #[test]
    fn previous_frame_requirement_tracks_real_history() {
        let slots = boot_slots();
        // Frame 1 depends on AI1 from frame 0.
        assert_ne!(blocked(AI1, NONE, &slots, 1), 0);
        publish(&slots, 0, AI1);
        assert_eq!(blocked(AI1, NONE, &slots, 1), 0);
    }

    #[test]
    fn polarity_rotates_across_four_frames() {
        // Fire one bit per frame for frames 0..4 and verify the slot reuse
        // two frames later starts out clean in both rotation senses.
        let slots = boot_slots();
        for frame in 0u64..4 {
            assert_eq!(
                effective(&slots, frame) & INPUT1,
                0,
                "frame {frame} should start with INPUT1 unfired"
            );
            publish(&slots, frame, INPUT1);
            assert_eq!(
                effective(&slots, frame) & INPUT1,
                INPUT1,
                "frame {frame} should observe INPUT1 after publish"
            );
        }
    }

    #[test]
    fn firing_every_checkpoint_each_frame_cancels_over_two_rotations() {
        let slots = boot_slots();
        let all_named: u64 = NAMES
            .iter()
            .filter(|(name, _)| *name != "NEVER")
            .map(|(_, bit)| bit)
            .sum();
        let initial = [
            slots[0].load(Ordering::Relaxed),
            slots[1].load(Ordering::Relaxed),
        ];
        for frame in 0u64..4 {
            publish(&slots, frame, all_named);
        }
        // Four frames toggle each slot twice, restoring the raw words.
        assert_eq!(slots[0].load(Ordering::Relaxed), initial[0]);
        assert_eq!(slots[1].load(Ordering::Relaxed), initial[1]);
    }

    #[test]
    fn never_bit_stays_blocked() {
        let slots = boot_slots();
        for frame in 0..8 {
            assert_ne!(blocked(NEVER, NEVER, &slots, frame), 0);
        }
    }

    #[test]
    fn describe_lists_bit_names() {
        assert_eq!(describe(NONE), "NONE");
        assert_eq!(describe(INPUT1 | PHYSICS2), "INPUT1|PHYSICS2");
        assert_eq!(describe(NEVER), "NEVER");
    }
}
