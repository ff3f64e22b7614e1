//! TAGE direction-predictor tests.
//!
//! Exercises provider/alternate selection, alt-on-weak, allocation on
//! misprediction, useful-bit protection, and the useful-reset wipe, all
//! through the component's public lookup/update interface.

use bpsim_core::config::{PipelineConfig, TageConfig};
use bpsim_core::history::GlobalHistory;
use bpsim_core::predictors::tage::{TageMeta, TagePredictor};
use bpsim_core::predictors::{BasePredictor, PredMeta};
use bpsim_core::stats::BpuStats;
use bpsim_core::stream::{BTBEntry, BranchInfo, FetchStream, FullPrediction, SquashType};

fn pipeline() -> PipelineConfig {
    PipelineConfig {
        history_bits: 64,
        ..PipelineConfig::default()
    }
}

fn small_tage() -> TagePredictor {
    let config = TageConfig {
        num_predictors: 4,
        table_sizes: vec![64, 64, 64, 64],
        tag_bits: vec![8, 8, 8, 8],
        hist_lengths: vec![4, 8, 16, 32],
        num_delay_stages: 1,
    };
    TagePredictor::new(&config, &pipeline())
}

/// A conditional BTB entry whose own counter predicts not-taken.
fn weak_not_taken_entry(pc: u64) -> BTBEntry {
    BTBEntry {
        branch: BranchInfo::cond(pc, pc + 0x100, 4),
        valid: true,
        always_taken: false,
        ctr: -1,
        tag: 0,
    }
}

/// Runs a lookup for `entry` at `start_pc` and returns the predicted
/// direction plus the recorded meta.
fn predict(tage: &mut TagePredictor, start_pc: u64, entry: BTBEntry) -> (bool, TageMeta) {
    let ghr = GlobalHistory::new(64);
    let mut preds = vec![FullPrediction::default(); 3];
    for p in &mut preds {
        p.bb_start = start_pc;
        p.btb_entries = vec![entry];
    }
    tage.put_pc_history(start_pc, &ghr, &mut preds);
    let taken = preds[1].cond_takens[&entry.branch.pc];
    let PredMeta::Tage(meta) = tage.prediction_meta() else {
        panic!("tage must produce tage meta");
    };
    (taken, meta)
}

/// Trains one resolved outcome for `entry`; `mispredicted` marks the stream
/// as control-squashed at the branch.
fn train(
    tage: &mut TagePredictor,
    start_pc: u64,
    entry: BTBEntry,
    meta: TageMeta,
    actual_taken: bool,
    mispredicted: bool,
    stats: &mut BpuStats,
) {
    let mut exe_branch = entry.branch;
    if !actual_taken {
        exe_branch.target = exe_branch.end_pc();
    }
    let stream = FetchStream {
        start_pc,
        pred_btb_entries: vec![entry],
        exe_taken: actual_taken,
        exe_branch,
        resolved: true,
        squash_type: if mispredicted {
            SquashType::Ctrl
        } else {
            SquashType::None
        },
        squash_pc: if mispredicted { entry.branch.pc } else { 0 },
        update_entries: vec![entry],
        update_end_pc: entry.branch.pc,
        pred_metas: vec![PredMeta::Tage(meta)],
        ..FetchStream::default()
    };
    tage.update(&stream, stats);
}

// ══════════════════════════════════════════════════════════
// 1. Base fallback and allocation
// ══════════════════════════════════════════════════════════

#[test]
fn empty_tables_fall_back_to_base_counter() {
    let mut tage = small_tage();
    let entry = weak_not_taken_entry(0x1008);
    let (taken, meta) = predict(&mut tage, 0x1000, entry);
    assert!(!taken, "no provider: the BTB counter decides");
    assert!(!meta.preds[&0x1008].main.found);
}

#[test]
fn mispredict_allocates_weak_entry() {
    let mut tage = small_tage();
    let mut stats = BpuStats::default();
    let entry = weak_not_taken_entry(0x1008);

    let (taken, meta) = predict(&mut tage, 0x1000, entry);
    assert!(!taken);
    train(&mut tage, 0x1000, entry, meta, true, true, &mut stats);
    assert_eq!(stats.tage_alloc_success, 1, "mispredict must allocate");

    let (_, meta) = predict(&mut tage, 0x1000, entry);
    let pred = &meta.preds[&0x1008];
    assert!(pred.main.found, "allocated entry becomes the provider");
    assert_eq!(pred.main.entry.ctr, 0, "taken allocation starts at 0");
    assert!(!pred.main.entry.useful, "allocation starts not-useful");
}

#[test]
fn weak_provider_defers_to_alternate() {
    let mut tage = small_tage();
    let mut stats = BpuStats::default();
    let entry = weak_not_taken_entry(0x1008);

    let (_, meta) = predict(&mut tage, 0x1000, entry);
    train(&mut tage, 0x1000, entry, meta, true, true, &mut stats);

    // Provider now exists with weak counter 0: alt (the base counter, which
    // says not-taken) still decides.
    let (taken, meta) = predict(&mut tage, 0x1000, entry);
    assert!(meta.preds[&0x1008].main.found);
    assert!(meta.preds[&0x1008].use_alt, "weak provider defers to alt");
    assert!(!taken);
}

#[test]
fn trained_provider_overrides_base() {
    let mut tage = small_tage();
    let mut stats = BpuStats::default();
    let entry = weak_not_taken_entry(0x1008);

    // Round 1 allocates, round 2 strengthens the provider to ctr 1.
    let (_, meta) = predict(&mut tage, 0x1000, entry);
    train(&mut tage, 0x1000, entry, meta, true, true, &mut stats);
    let (_, meta) = predict(&mut tage, 0x1000, entry);
    train(&mut tage, 0x1000, entry, meta, true, true, &mut stats);

    let (taken, meta) = predict(&mut tage, 0x1000, entry);
    assert!(taken, "strong provider overrides the not-taken base");
    assert!(!meta.preds[&0x1008].use_alt);
    assert_eq!(stats.tage_alloc_success, 1, "no second allocation needed");
}

#[test]
fn counter_saturates_at_plus_3() {
    let mut tage = small_tage();
    let mut stats = BpuStats::default();
    let entry = weak_not_taken_entry(0x1008);
    for _ in 0..8 {
        let (_, meta) = predict(&mut tage, 0x1000, entry);
        let mispredicted = !meta.preds[&0x1008].taken;
        train(&mut tage, 0x1000, entry, meta, true, mispredicted, &mut stats);
    }
    let (_, meta) = predict(&mut tage, 0x1000, entry);
    assert_eq!(meta.preds[&0x1008].main.entry.ctr, 3);
}

// ══════════════════════════════════════════════════════════
// 2. Useful bits and the reset counter
// ══════════════════════════════════════════════════════════

/// Drives one branch until its provider row is useful: allocate, then let
/// the provider predict correctly while the alternate disagrees.
fn make_useful(tage: &mut TagePredictor, start_pc: u64, pc: u64, stats: &mut BpuStats) {
    let entry = weak_not_taken_entry(pc);
    let (_, meta) = predict(tage, start_pc, entry);
    train(tage, start_pc, entry, meta, true, true, stats);
    let (_, meta) = predict(tage, start_pc, entry);
    train(tage, start_pc, entry, meta, true, false, stats);
}

#[test]
fn correct_provider_with_disagreeing_alt_becomes_useful() {
    let mut tage = small_tage();
    let mut stats = BpuStats::default();
    make_useful(&mut tage, 0x1000, 0x1008, &mut stats);

    let entry = weak_not_taken_entry(0x1008);
    let (_, meta) = predict(&mut tage, 0x1000, entry);
    assert!(
        meta.preds[&0x1008].main.entry.useful,
        "correct provider with disagreeing alt is protected"
    );
}

#[test]
fn useful_reset_counter_wipes_all_useful_bits() {
    let mut tage = small_tage();
    let mut stats = BpuStats::default();

    // Fill every table's row for this block with a useful entry owned by a
    // different branch pc.
    for i in 0..4 {
        make_useful(&mut tage, 0x1000, 0x1008 + 2 * i, &mut stats);
    }
    let probe = weak_not_taken_entry(0x1010);
    let (_, meta) = predict(&mut tage, 0x1000, probe);
    assert_ne!(meta.useful_mask, 0, "setup must have set useful bits");

    // A fifth branch now mispredicts repeatedly; every allocation attempt
    // fails and pushes the reset counter until all useful bits are wiped.
    let victim = weak_not_taken_entry(0x1018);
    for _ in 0..64 {
        let (_, meta) = predict(&mut tage, 0x1000, victim);
        if meta.preds[&0x1018].main.found {
            break;
        }
        train(&mut tage, 0x1000, victim, meta, true, true, &mut stats);
        if stats.tage_reset_useful > 0 {
            break;
        }
    }
    assert_eq!(stats.tage_reset_useful, 1, "the reset must fire");

    let (_, meta) = predict(&mut tage, 0x1000, probe);
    assert_eq!(meta.useful_mask, 0, "every useful bit was cleared");
}
