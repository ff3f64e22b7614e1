//! End-to-end driver tests.
//!
//! Runs the full predictor against programmed workloads through the shared
//! execution rig: steady-state loop prediction, call/return pairs through
//! the RAS, stage override bubbles, control-squash recovery, and the
//! universal queue/ordering invariants.

use bpsim_core::stream::BranchInfo;
use bpsim_core::{Config, DecoupledPredictor};
use pretty_assertions::assert_eq;

use crate::common::{Behavior, ExecRig};

// ══════════════════════════════════════════════════════════
// 1. Steady-state prediction
// ══════════════════════════════════════════════════════════

#[test]
fn tight_loop_becomes_predicted_taken() {
    let mut rig = ExecRig::new(0x1000);
    // Backward conditional at 0x1008 looping to 0x1000.
    rig.add_branch(BranchInfo::cond(0x1008, 0x1000, 4), Behavior::AlwaysTaken);
    rig.run(300);

    let tail: Vec<_> = rig.supplied.iter().rev().take(10).collect();
    assert!(!tail.is_empty(), "the rig must make forward progress");
    assert!(
        tail.iter()
            .all(|e| e.taken && e.taken_pc == 0x1008 && e.target == 0x1000),
        "steady state predicts the loop branch taken to 0x1000"
    );
    let stats = rig.bpu.stats();
    assert!(stats.cond_num > 50, "the loop branch commits repeatedly");
    assert!(
        stats.cond_miss <= 2,
        "only the cold start may mispredict, got {}",
        stats.cond_miss
    );
}

#[test]
fn fall_through_blocks_are_predicted_not_taken() {
    let mut rig = ExecRig::new(0x1000);
    rig.add_branch(BranchInfo::cond(0x1008, 0x8000, 4), Behavior::NeverTaken);
    rig.run(100);

    let tail: Vec<_> = rig.supplied.iter().rev().take(5).collect();
    assert!(tail.iter().all(|e| !e.taken), "never-taken stays not-taken");
    assert_eq!(rig.bpu.stats().control_squash, 0, "nothing to squash");
}

// ══════════════════════════════════════════════════════════
// 2. Call/return through the RAS
// ══════════════════════════════════════════════════════════

#[test]
fn call_return_pair_round_trips_through_ras() {
    let mut rig = ExecRig::new(0x2000);
    // 0x2000: call 0x3000; callee returns at 0x3010; back at 0x2004 the
    // block jumps to the loop head.
    rig.add_branch(BranchInfo::direct_call(0x2000, 0x3000, 4), Behavior::Call);
    rig.add_branch(BranchInfo::ret(0x3010, 0, 4), Behavior::Return);
    rig.add_branch(BranchInfo::direct_jump(0x2008, 0x2000, 4), Behavior::Jump);
    rig.run(400);

    let stats = rig.bpu.stats();
    assert!(stats.return_num > 20, "returns commit repeatedly");
    assert!(
        stats.return_miss <= 2,
        "after warmup the RAS supplies 0x2004, got {} misses",
        stats.return_miss
    );
    assert!(rig.call_depth() <= 1, "calls and returns stay balanced");

    let ret_blocks: Vec<_> = rig
        .supplied
        .iter()
        .filter(|e| e.taken && e.taken_pc == 0x3010)
        .collect();
    assert!(
        ret_blocks.iter().rev().take(5).all(|e| e.target == 0x2004),
        "steady-state return blocks target the call fall-through"
    );
}

// ══════════════════════════════════════════════════════════
// 3. Override bubbles
// ══════════════════════════════════════════════════════════

#[test]
fn ubtb_capacity_pressure_causes_overrides() {
    // A chain of 48 always-taken jumps cycles through more blocks than the
    // 32-entry micro-BTB can hold, so stage 0 keeps missing blocks the L1
    // BTB still hits: the later stage overrides and inserts bubbles.
    let mut rig = ExecRig::new(0x1_0000);
    let blocks = 48u64;
    for i in 0..blocks {
        let pc = 0x1_0000 + i * 0x40;
        let next = 0x1_0000 + ((i + 1) % blocks) * 0x40;
        rig.add_branch(BranchInfo::direct_jump(pc + 8, next, 4), Behavior::Jump);
    }
    rig.run(2000);

    let stats = rig.bpu.stats();
    assert!(stats.override_count > 0, "stage disagreement must occur");
    assert!(
        stats.override_bubble_num >= stats.override_count,
        "each override inserts at least one bubble"
    );
    assert!(stats.override_fall_thru > 0, "uBTB misses show up as fall-thru overrides");
}

// ══════════════════════════════════════════════════════════
// 4. Control squash and recovery
// ══════════════════════════════════════════════════════════

#[test]
fn loop_exit_squashes_and_resumes_at_fall_through() {
    let mut rig = ExecRig::new(0x6000);
    // Taken three times, then one not-taken exit to 0x6004, where a jump
    // restarts the loop.
    rig.add_branch(BranchInfo::cond(0x6000, 0x7000, 4), Behavior::LoopExit(3));
    rig.add_branch(BranchInfo::direct_jump(0x7008, 0x6000, 4), Behavior::Jump);
    rig.add_branch(BranchInfo::direct_jump(0x6004, 0x6000, 4), Behavior::Jump);
    rig.run(600);

    let stats = rig.bpu.stats();
    assert!(stats.control_squash > 0, "the loop exit must squash at least once");
    assert!(
        rig.supplied.iter().any(|e| e.start_pc == 0x6004),
        "fetch resumed at the squash fall-through"
    );
    assert!(stats.cond_num > 20);
}

#[test]
fn squash_erases_younger_streams() {
    let mut bpu = DecoupledPredictor::new(&Config::default()).unwrap();
    bpu.reset_pc(0x1000);
    // Let the predictor run ahead speculatively with no feedback: every
    // block falls through and the FSQ fills with consecutive streams.
    for _ in 0..12 {
        bpu.tick();
    }
    assert!(bpu.fsq().len() > 3, "the front end must run ahead");

    let (&squash_id, stream) = bpu.fsq().iter().nth(1).unwrap();
    let squash_pc = stream.start_pc + 8;
    let branch = BranchInfo::cond(squash_pc, 0x9000, 4);
    bpu.control_squash(0, squash_id, branch, true);

    assert_eq!(
        bpu.fsq().keys().last(),
        Some(&squash_id),
        "streams younger than the squash are erased"
    );
    assert_eq!(bpu.s0_pc(), 0x9000, "fetch head redirected to the real target");
    assert_eq!(bpu.next_fsq_id(), squash_id + 1, "stream ids continue past the squash");

    // The squashed stream carries the resolved outcome for training.
    let stream = &bpu.fsq()[&squash_id];
    assert!(stream.resolved && stream.exe_taken);
    assert_eq!(stream.squash_pc, squash_pc);
}

#[test]
fn non_control_squash_restarts_same_pc() {
    let mut bpu = DecoupledPredictor::new(&Config::default()).unwrap();
    bpu.reset_pc(0x1000);
    for _ in 0..10 {
        bpu.tick();
    }
    let (&id, stream) = bpu.fsq().iter().next().unwrap();
    let pc = stream.start_pc + 4;
    bpu.non_control_squash(0, id, pc);

    assert_eq!(bpu.s0_pc(), pc, "fetch restarts at the disturbing pc");
    let stream = &bpu.fsq()[&id];
    assert!(stream.resolved && !stream.exe_taken);
    assert_eq!(bpu.stats().non_control_squash, 1);
}

#[test]
fn trap_squash_restarts_at_faulting_pc() {
    let mut bpu = DecoupledPredictor::new(&Config::default()).unwrap();
    bpu.reset_pc(0x1000);
    for _ in 0..10 {
        bpu.tick();
    }
    let (&id, stream) = bpu.fsq().iter().next().unwrap();
    let pc = stream.start_pc;
    bpu.trap_squash(0, id, pc);

    assert_eq!(bpu.s0_pc(), pc);
    assert_eq!(bpu.stats().trap_squash, 1);
    // Commit the trapped stream: no branch outcome is trained, and the
    // queue drains.
    bpu.update(id);
    assert!(!bpu.fsq().contains_key(&id));
}

// ══════════════════════════════════════════════════════════
// 5. Universal invariants
// ══════════════════════════════════════════════════════════

/// A mixed workload exercising every branch kind.
fn mixed_rig() -> ExecRig {
    let mut rig = ExecRig::new(0x1000);
    rig.add_branch(BranchInfo::cond(0x1008, 0x2000, 4), Behavior::LoopExit(5));
    rig.add_branch(BranchInfo::direct_jump(0x1048, 0x2000, 4), Behavior::Jump);
    rig.add_branch(BranchInfo::direct_call(0x2008, 0x3000, 4), Behavior::Call);
    rig.add_branch(BranchInfo::ret(0x3008, 0, 4), Behavior::Return);
    rig.add_branch(
        BranchInfo::indirect_jump(0x2010, 0x4000, 4),
        Behavior::IndirectCycle(vec![0x4000, 0x4000, 0x5000]),
    );
    rig.add_branch(BranchInfo::direct_jump(0x4008, 0x1000, 4), Behavior::Jump);
    rig.add_branch(BranchInfo::direct_jump(0x5008, 0x1000, 4), Behavior::Jump);
    rig
}

#[test]
fn fsq_streams_chain_contiguously() {
    use bpsim_core::stream::SquashType;

    let mut rig = mixed_rig();
    for _ in 0..500 {
        let _ = rig.step();

        let streams: Vec<_> = rig.bpu.fsq().values().collect();
        for pair in streams.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            // A resolved stream chains through its executed outcome, an
            // unresolved one through its prediction.
            let expected_next = if a.resolved {
                match a.squash_type {
                    SquashType::Ctrl => {
                        if a.exe_taken {
                            a.exe_branch.target
                        } else {
                            a.exe_branch.end_pc()
                        }
                    }
                    SquashType::Trap | SquashType::Other => a.squash_pc,
                    SquashType::None => {
                        if a.exe_taken {
                            a.exe_branch.target
                        } else {
                            a.pred_end_pc
                        }
                    }
                }
            } else if a.pred_taken {
                a.pred_branch.target
            } else {
                a.pred_end_pc
            };
            assert_eq!(
                expected_next, b.start_pc,
                "stream at {:#x} must chain into the one at {:#x}",
                a.start_pc, b.start_pc
            );
        }
    }
}

#[test]
fn fsq_ids_are_monotonic() {
    let mut rig = mixed_rig();
    let mut oldest_seen = 0u64;
    for _ in 0..400 {
        let _ = rig.step();
        let ids: Vec<u64> = rig.bpu.fsq().keys().copied().collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        if let Some(&oldest) = ids.first() {
            // Commit removes from the front and squash from the back, so
            // the oldest live id never moves backwards.
            assert!(oldest >= oldest_seen, "committed ids must never reappear");
            oldest_seen = oldest;
        }
        let ids_max = ids.last().copied().unwrap_or(0);
        assert!(rig.bpu.next_fsq_id() > ids_max);
    }
}

#[test]
fn predicted_entries_stay_sorted() {
    let mut rig = mixed_rig();
    for _ in 0..400 {
        let _ = rig.step();
        for stream in rig.bpu.fsq().values() {
            let pcs: Vec<u64> = stream
                .pred_btb_entries
                .iter()
                .map(|e| e.branch.pc)
                .collect();
            assert!(
                pcs.windows(2).all(|w| w[0] < w[1]),
                "btb entries of a stream must be strictly increasing"
            );
        }
    }
}

#[test]
fn identical_runs_are_deterministic() {
    let run = || {
        let mut rig = mixed_rig();
        rig.run(600);
        let supplied: Vec<_> = rig
            .supplied
            .iter()
            .map(|e| (e.start_pc, e.taken_pc, e.taken, e.target))
            .collect();
        (supplied, rig.bpu.stats().clone())
    };
    let (a_supplied, a_stats) = run();
    let (b_supplied, b_stats) = run();
    assert_eq!(a_supplied, b_supplied, "prediction stream must be deterministic");
    assert_eq!(a_stats.control_squash, b_stats.control_squash);
    assert_eq!(a_stats.fsq_enqueued, b_stats.fsq_enqueued);
}

#[test]
fn stable_indirect_target_is_predicted() {
    let mut rig = ExecRig::new(0x1000);
    rig.add_branch(
        BranchInfo::indirect_jump(0x1008, 0x4000, 4),
        Behavior::IndirectCycle(vec![0x4000]),
    );
    rig.add_branch(BranchInfo::direct_jump(0x4008, 0x1000, 4), Behavior::Jump);
    rig.run(400);

    let stats = rig.bpu.stats();
    assert!(stats.other_num > 20, "the indirect branch commits repeatedly");
    assert!(
        stats.other_miss <= 2,
        "a stable indirect target is learned after the cold start, got {} misses",
        stats.other_miss
    );
}

#[test]
fn reset_pc_restarts_fetch() {
    let mut bpu = DecoupledPredictor::new(&Config::default()).unwrap();
    bpu.reset_pc(0x1000);
    for _ in 0..5 {
        bpu.tick();
    }
    bpu.reset_pc(0x8000);
    assert_eq!(bpu.s0_pc(), 0x8000);
}
