//! History register and folded-history tests.
//!
//! Verifies the incremental XOR-fold against the naive fold of the
//! authoritative register, recovery semantics, and the speculative-history
//! log's squash/commit behaviour.

use bpsim_core::history::{FoldedHistory, GlobalHistory, HistoryKind, HistoryManager};
use bpsim_core::stream::BranchInfo;
use proptest::prelude::*;

// ══════════════════════════════════════════════════════════
// 1. GlobalHistory basics
// ══════════════════════════════════════════════════════════

#[test]
fn global_history_starts_zero() {
    let ghr = GlobalHistory::new(128);
    assert_eq!(ghr.len(), 128);
    assert!((0..128).all(|i| !ghr.bit(i)));
}

#[test]
fn shift_in_writes_bit_zero() {
    let mut ghr = GlobalHistory::new(64);
    ghr.shift_in(1, true);
    assert!(ghr.bit(0));
    ghr.shift_in(1, false);
    assert!(!ghr.bit(0));
    assert!(ghr.bit(1), "previous outcome moved up");
}

#[test]
fn shift_zero_is_identity() {
    let mut ghr = GlobalHistory::new(64);
    ghr.shift_in(1, true);
    let before = ghr.clone();
    ghr.shift_in(0, false);
    assert_eq!(ghr, before, "shamt 0 must not touch the register");
}

#[test]
fn shift_crosses_word_boundary() {
    let mut ghr = GlobalHistory::new(128);
    ghr.shift_in(1, true);
    ghr.shift_left(63);
    assert!(ghr.bit(63));
    ghr.shift_left(1);
    assert!(ghr.bit(64), "bit must cross into the second word");
}

#[test]
fn bits_fall_off_the_end() {
    let mut ghr = GlobalHistory::new(8);
    ghr.shift_in(1, true);
    ghr.shift_left(8);
    assert!((0..8).all(|i| !ghr.bit(i)));
}

// ══════════════════════════════════════════════════════════
// 2. FoldedHistory against the naive fold
// ══════════════════════════════════════════════════════════

#[test]
fn folded_single_update() {
    let mut ghr = GlobalHistory::new(8);
    let mut fh = FoldedHistory::new(HistoryKind::Global, 8, 4, 2);
    fh.update(&ghr, 1, true, 0);
    ghr.shift_in(1, true);
    assert_eq!(fh.get(), 1);
    assert!(fh.check(&ghr));
}

#[test]
fn folded_sequence_matches_naive_fold() {
    let mut ghr = GlobalHistory::new(8);
    let mut fh = FoldedHistory::new(HistoryKind::Global, 8, 4, 2);
    for taken in [true, false, true] {
        fh.update(&ghr, 1, taken, 0);
        ghr.shift_in(1, taken);
        assert!(fh.check(&ghr));
    }
    assert!(fh.get() & 1 == 1, "latest outcome at bit 0");
}

#[test]
fn folded_wraps_bits_leaving_window() {
    // Push enough bits that the oldest ones leave the 8-bit window and have
    // to be XOR-ed back out of the 4-bit fold.
    let mut ghr = GlobalHistory::new(8);
    let mut fh = FoldedHistory::new(HistoryKind::Global, 8, 4, 2);
    for i in 0..20 {
        let taken = i % 3 == 0;
        fh.update(&ghr, 1, taken, 0);
        ghr.shift_in(1, taken);
        assert!(fh.check(&ghr), "fold diverged at step {i}");
    }
}

#[test]
fn folded_wide_fold_needs_no_wrap() {
    // folded_len >= hist_len: the window fits the fold directly.
    let mut ghr = GlobalHistory::new(4);
    let mut fh = FoldedHistory::new(HistoryKind::Global, 4, 8, 2);
    for taken in [true, true, false, true, false] {
        fh.update(&ghr, 1, taken, 0);
        ghr.shift_in(1, taken);
        assert!(fh.check(&ghr));
    }
    assert!(fh.get() < 16, "bits above the window stay zero");
}

#[test]
fn folded_recover_copies_state() {
    let mut ghr = GlobalHistory::new(8);
    let mut fh1 = FoldedHistory::new(HistoryKind::Global, 8, 4, 2);
    let fh2 = FoldedHistory::new(HistoryKind::Global, 8, 4, 2);
    for taken in [true, false, true, true] {
        fh1.update(&ghr, 1, taken, 0);
        ghr.shift_in(1, taken);
    }
    let snapshot = fh1.clone();
    fh1.recover(&fh2);
    assert_eq!(fh1.get(), 0, "recovered to the empty state");
    fh1.recover(&snapshot);
    assert!(fh1.check(&ghr), "recovered back to the live state");
}

#[test]
fn imli_counts_and_clears() {
    let ghr = GlobalHistory::new(8);
    let mut fh = FoldedHistory::new(HistoryKind::Imli, 7, 7, 2);
    fh.update(&ghr, 1, true, 0);
    fh.update(&ghr, 1, true, 0);
    assert_eq!(fh.get(), 2, "consecutive single-shift taken increments");
    fh.update(&ghr, 2, true, 0);
    assert_eq!(fh.get(), 1, "multi-shift taken restarts the count");
    fh.update(&ghr, 1, false, 0);
    assert_eq!(fh.get(), 0, "not-taken clears the count");
}

#[test]
fn path_fold_only_moves_on_taken() {
    let ghr = GlobalHistory::new(16);
    let mut fh = FoldedHistory::new(HistoryKind::Path, 8, 8, 2);
    fh.update(&ghr, 1, false, 0x1234);
    assert_eq!(fh.get(), 0, "not-taken leaves the path fold alone");
    fh.update(&ghr, 1, true, 0x1234);
    assert_ne!(fh.get(), 0, "taken shifts in the pc hash");
}

proptest! {
    // Invariant: after any update sequence the incremental fold equals the
    // naive fold of the register.
    #[test]
    fn folded_consistency_holds_for_any_sequence(
        steps in prop::collection::vec((0usize..=4, any::<bool>()), 1..200)
    ) {
        let mut ghr = GlobalHistory::new(64);
        let mut fh = FoldedHistory::new(HistoryKind::Global, 13, 8, 8);
        for (shamt, taken) in steps {
            fh.update(&ghr, shamt, taken, 0);
            ghr.shift_in(shamt, taken);
            prop_assert!(fh.check(&ghr));
        }
    }
}

// ══════════════════════════════════════════════════════════
// 3. HistoryManager squash/commit
// ══════════════════════════════════════════════════════════

fn cond_branch(pc: u64) -> BranchInfo {
    BranchInfo::cond(pc, pc + 0x40, 4)
}

#[test]
fn manager_replays_recorded_shifts() {
    let mut mgr = HistoryManager::new(8);
    mgr.add_speculative(0x1000, 1, true, &cond_branch(0x1008), 1);
    mgr.add_speculative(0x2000, 2, false, &cond_branch(0x2008), 2);
    let (ideal, size) = mgr.ideal_history(64);
    assert_eq!(size, 3);
    // Oldest shift first: 1 taken, then 2 with bit 0 = 0.
    assert!(!ideal.bit(0) && !ideal.bit(1) && ideal.bit(2));
}

#[test]
fn manager_commit_drops_old_entries() {
    let mut mgr = HistoryManager::new(8);
    mgr.add_speculative(0x1000, 1, true, &cond_branch(0x1008), 1);
    mgr.add_speculative(0x2000, 1, true, &cond_branch(0x2008), 2);
    mgr.commit(1);
    assert_eq!(mgr.speculative_entries().len(), 1);
    assert_eq!(mgr.speculative_entries()[0].stream_id, 2);
}

#[test]
fn manager_squash_rewrites_and_truncates() {
    let mut mgr = HistoryManager::new(8);
    mgr.add_speculative(0x1000, 1, true, &cond_branch(0x1008), 1);
    mgr.add_speculative(0x2000, 1, true, &cond_branch(0x2008), 2);
    mgr.add_speculative(0x3000, 1, true, &cond_branch(0x3008), 3);

    let resolved = cond_branch(0x2004);
    mgr.squash(2, 2, false, &resolved);

    let entries = mgr.speculative_entries();
    assert_eq!(entries.len(), 2, "younger entries truncated");
    assert_eq!(entries[1].stream_id, 2);
    assert_eq!(entries[1].shamt, 2, "squashed entry rewritten");
    assert!(!entries[1].cond_taken);
}

#[test]
fn manager_squash_then_add_replays_deterministically() {
    let mut mgr = HistoryManager::new(8);
    mgr.add_speculative(0x1000, 1, true, &cond_branch(0x1008), 1);
    mgr.add_speculative(0x2000, 1, true, &cond_branch(0x2008), 2);
    mgr.squash(1, 1, false, &cond_branch(0x1008));
    mgr.add_speculative(0x1008, 1, true, &cond_branch(0x1010), 2);

    let (ideal, size) = mgr.ideal_history(64);
    assert_eq!(size, 2);
    assert!(ideal.bit(0), "replayed entry visible at bit 0");
    assert!(!ideal.bit(1), "squash outcome visible at bit 1");
}
