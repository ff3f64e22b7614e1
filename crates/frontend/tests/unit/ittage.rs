//! ITTAGE indirect-target predictor tests.
//!
//! Exercises the confidence-gated target override, allocation on target
//! misprediction, confidence decay with target replacement, and fallback to
//! the BTB target.

use bpsim_core::config::{ItageConfig, PipelineConfig};
use bpsim_core::history::GlobalHistory;
use bpsim_core::predictors::ittage::{ItageMeta, ItagePredictor};
use bpsim_core::predictors::{BasePredictor, PredMeta};
use bpsim_core::stats::BpuStats;
use bpsim_core::stream::{BTBEntry, BranchInfo, FetchStream, FullPrediction, SquashType};

fn pipeline() -> PipelineConfig {
    PipelineConfig {
        history_bits: 64,
        ..PipelineConfig::default()
    }
}

fn small_ittage() -> ItagePredictor {
    let config = ItageConfig {
        num_predictors: 4,
        table_sizes: vec![64, 64, 64, 64],
        tag_bits: vec![9, 9, 9, 9],
        hist_lengths: vec![4, 8, 16, 32],
        num_delay_stages: 2,
    };
    ItagePredictor::new(&config, &pipeline())
}

/// An indirect BTB entry with a stored (stale) target.
fn indirect_entry(pc: u64, target: u64) -> BTBEntry {
    BTBEntry {
        branch: BranchInfo::indirect_jump(pc, target, 4),
        valid: true,
        always_taken: false,
        ctr: 0,
        tag: 0,
    }
}

/// Runs a lookup and returns the predicted target plus the meta.
fn predict(ittage: &mut ItagePredictor, start_pc: u64, entry: BTBEntry) -> (u64, ItageMeta) {
    let ghr = GlobalHistory::new(64);
    let mut preds = vec![FullPrediction::default(); 3];
    for p in &mut preds {
        p.bb_start = start_pc;
        p.btb_entries = vec![entry];
    }
    ittage.put_pc_history(start_pc, &ghr, &mut preds);
    let target = preds[2].indirect_targets[&entry.branch.pc];
    let PredMeta::Ittage(meta) = ittage.prediction_meta() else {
        panic!("ittage must produce ittage meta");
    };
    (target, meta)
}

/// Trains one executed indirect transfer to `exe_target`.
fn train(
    ittage: &mut ItagePredictor,
    start_pc: u64,
    entry: BTBEntry,
    meta: ItageMeta,
    exe_target: u64,
    mispredicted: bool,
    stats: &mut BpuStats,
) {
    let mut exe_branch = entry.branch;
    exe_branch.target = exe_target;
    let stream = FetchStream {
        start_pc,
        pred_btb_entries: vec![entry],
        exe_taken: true,
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
        pred_metas: vec![PredMeta::Ittage(meta)],
        ..FetchStream::default()
    };
    ittage.update(&stream, stats);
}

// ══════════════════════════════════════════════════════════
// 1. Fallback and override
// ══════════════════════════════════════════════════════════

#[test]
fn empty_tables_use_btb_target() {
    let mut ittage = small_ittage();
    let entry = indirect_entry(0x1008, 0x2000);
    let (target, meta) = predict(&mut ittage, 0x1000, entry);
    assert_eq!(target, 0x2000, "no provider: BTB target stands");
    assert!(!meta.preds[&0x1008].main.found);
}

#[test]
fn mispredict_allocates_confident_provider() {
    let mut ittage = small_ittage();
    let mut stats = BpuStats::default();
    let entry = indirect_entry(0x1008, 0x2000);

    // Execution goes to 0x5000 while the BTB still said 0x2000.
    let (target, meta) = predict(&mut ittage, 0x1000, entry);
    assert_eq!(target, 0x2000);
    train(&mut ittage, 0x1000, entry, meta, 0x5000, true, &mut stats);
    assert_eq!(stats.ittage_mispred, 1);

    let (target, meta) = predict(&mut ittage, 0x1000, entry);
    assert_eq!(target, 0x5000, "allocated provider overrides the BTB");
    let pred = &meta.preds[&0x1008];
    assert!(pred.main.found);
    assert_eq!(pred.main.entry.ctr, 2, "allocation starts at full confidence");
}

#[test]
fn returns_are_not_ittage_business() {
    let mut ittage = small_ittage();
    let ret = BTBEntry {
        branch: BranchInfo::ret(0x1008, 0x2000, 4),
        valid: true,
        always_taken: false,
        ctr: 0,
        tag: 0,
    };
    let ghr = GlobalHistory::new(64);
    let mut preds = vec![FullPrediction::default(); 3];
    for p in &mut preds {
        p.bb_start = 0x1000;
        p.btb_entries = vec![ret];
    }
    ittage.put_pc_history(0x1000, &ghr, &mut preds);
    assert!(
        preds[2].indirect_targets.is_empty(),
        "returns are predicted by the RAS, not ITTAGE"
    );
}

// ══════════════════════════════════════════════════════════
// 2. Confidence decay and target replacement
// ══════════════════════════════════════════════════════════

#[test]
fn wrong_target_decays_confidence_then_replaces() {
    let mut ittage = small_ittage();
    let mut stats = BpuStats::default();
    let entry = indirect_entry(0x1008, 0x2000);

    // Establish a provider for 0x5000.
    let (_, meta) = predict(&mut ittage, 0x1000, entry);
    train(&mut ittage, 0x1000, entry, meta, 0x5000, true, &mut stats);

    // The branch now keeps going to 0x6000 (resolved upstream, so no
    // control squash reaches ITTAGE): confidence 2 -> 1 -> 0, and at zero
    // the row's target is replaced.
    let (_, meta) = predict(&mut ittage, 0x1000, entry);
    train(&mut ittage, 0x1000, entry, meta, 0x6000, false, &mut stats);
    let (target, meta) = predict(&mut ittage, 0x1000, entry);
    assert_eq!(target, 0x2000, "confidence below 2 falls back to the BTB");
    assert_eq!(meta.preds[&0x1008].main.entry.ctr, 1);

    train(&mut ittage, 0x1000, entry, meta, 0x6000, false, &mut stats);
    let (_, meta) = predict(&mut ittage, 0x1000, entry);
    assert_eq!(
        meta.preds[&0x1008].main.entry.target,
        0x6000,
        "a fully decayed row adopts the executed target"
    );
}

#[test]
fn mispredicted_confident_provider_relearns_new_target() {
    let mut ittage = small_ittage();
    let mut stats = BpuStats::default();
    let entry = indirect_entry(0x1008, 0x2000);

    let (_, meta) = predict(&mut ittage, 0x1000, entry);
    train(&mut ittage, 0x1000, entry, meta, 0x5000, true, &mut stats);

    // The branch permanently moves to 0x6000. Repeated control squashes
    // either allocate a corrected row above the provider or decay the
    // provider until it adopts the new target; both converge.
    let mut converged = false;
    for _ in 0..8 {
        let (target, meta) = predict(&mut ittage, 0x1000, entry);
        if target == 0x6000 {
            converged = true;
            break;
        }
        train(&mut ittage, 0x1000, entry, meta, 0x6000, true, &mut stats);
    }
    assert!(converged, "the corrected target must take over");
}

#[test]
fn confident_provider_with_absent_alt_keeps_useful_clear() {
    let mut ittage = small_ittage();
    let mut stats = BpuStats::default();
    let entry = indirect_entry(0x1008, 0x2000);

    // Allocate a provider at full confidence; no alternate exists.
    let (_, meta) = predict(&mut ittage, 0x1000, entry);
    train(&mut ittage, 0x1000, entry, meta, 0x5000, true, &mut stats);

    // A correct outcome with a confident provider and an absent alternate
    // is not a disagreement: the useful bit must stay untouched.
    let (_, meta) = predict(&mut ittage, 0x1000, entry);
    train(&mut ittage, 0x1000, entry, meta, 0x5000, false, &mut stats);
    let (_, meta) = predict(&mut ittage, 0x1000, entry);
    assert!(
        !meta.preds[&0x1008].main.entry.useful,
        "no alt disagreement, so the row must not be marked useful"
    );
}

#[test]
fn weak_provider_with_absent_alt_trains_useful() {
    let mut ittage = small_ittage();
    let mut stats = BpuStats::default();
    let entry = indirect_entry(0x1008, 0x2000);

    let (_, meta) = predict(&mut ittage, 0x1000, entry);
    train(&mut ittage, 0x1000, entry, meta, 0x5000, true, &mut stats);

    // Decay the provider below confidence, then confirm its target: the
    // weak provider now disagrees with the implicitly confident absent
    // alternate, and the correct outcome protects the row.
    let (_, meta) = predict(&mut ittage, 0x1000, entry);
    train(&mut ittage, 0x1000, entry, meta, 0x6000, false, &mut stats);
    let (_, meta) = predict(&mut ittage, 0x1000, entry);
    assert_eq!(meta.preds[&0x1008].main.entry.ctr, 1, "provider is weak");
    train(&mut ittage, 0x1000, entry, meta, 0x5000, false, &mut stats);

    let (_, meta) = predict(&mut ittage, 0x1000, entry);
    assert!(
        meta.preds[&0x1008].main.entry.useful,
        "weak provider confirmed against the absent alt is protected"
    );
}

#[test]
fn stable_target_reaches_saturation() {
    let mut ittage = small_ittage();
    let mut stats = BpuStats::default();
    let entry = indirect_entry(0x1008, 0x2000);

    let (_, meta) = predict(&mut ittage, 0x1000, entry);
    train(&mut ittage, 0x1000, entry, meta, 0x5000, true, &mut stats);
    for _ in 0..3 {
        let (_, meta) = predict(&mut ittage, 0x1000, entry);
        train(&mut ittage, 0x1000, entry, meta, 0x5000, false, &mut stats);
    }
    let (target, meta) = predict(&mut ittage, 0x1000, entry);
    assert_eq!(target, 0x5000);
    assert_eq!(meta.preds[&0x1008].main.entry.ctr, 3, "confidence saturates");
}
