//! Core data model of the decoupled front-end.
//!
//! This module defines the types that flow between the prediction pipeline,
//! the fetch stream queue, and the fetch target queue:
//! 1. [`BranchInfo`] / [`BTBEntry`]: a control-flow transfer and its
//!    predictor state.
//! 2. [`FullPrediction`]: the per-stage aggregate of all component outputs.
//! 3. [`FetchStream`]: one predicted block, alive from prediction to commit.
//! 4. [`FtqEntry`]: the fetch-ready view of a stream handed to fetch.

use std::collections::{BTreeMap, VecDeque};

use crate::history::GlobalHistory;
use crate::predictors::PredMeta;

/// How a squash was classified by the back end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SquashType {
    /// No squash: the stream resolved as predicted.
    #[default]
    None,
    /// A trap or fault disturbed the stream.
    Trap,
    /// A control instruction resolved against the prediction.
    Ctrl,
    /// A non-control disturbance (e.g. memory order violation).
    Other,
}

/// Why a later pipeline stage overrode an earlier stage's prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverrideReason {
    /// The stages agreed.
    #[default]
    NoOverride,
    /// One stage predicted a taken branch, the other fell through.
    FallThru,
    /// Different control-instruction addresses.
    ControlAddr,
    /// Different targets.
    Target,
    /// Different block end addresses.
    End,
    /// Different history shift info.
    HistInfo,
}

/// Direction-predictor confidence handed from TAGE to the statistical
/// corrector alongside each conditional prediction.
#[derive(Debug, Clone, Copy, Default)]
pub struct TageConfInfo {
    /// TAGE's predicted direction.
    pub taken: bool,
    /// Provider counter saturated.
    pub conf_high: bool,
    /// Provider counter in the middle range.
    pub conf_mid: bool,
    /// Provider counter weak (or no provider).
    pub conf_low: bool,
    /// Main and alternate predictions disagreed.
    pub alt_diff: bool,
}

/// 64-bit Fibonacci LFSR driving table-allocation randomization.
#[derive(Debug, Clone)]
pub struct Lfsr64 {
    state: u64,
}

impl Default for Lfsr64 {
    fn default() -> Self {
        Self::new()
    }
}

impl Lfsr64 {
    /// Creates the generator with its fixed seed.
    pub const fn new() -> Self {
        Self {
            state: 0x1234_5678_8765_4321,
        }
    }

    /// Advances the register and returns the new value.
    pub const fn get(&mut self) -> u64 {
        self.next();
        self.state
    }

    const fn next(&mut self) {
        if self.state == 0 {
            self.state = 1;
        } else {
            let bit = (self.state ^ (self.state >> 1) ^ (self.state >> 3) ^ (self.state >> 4)) & 1;
            self.state = (self.state >> 1) | (bit << 63);
        }
    }
}

/// A resolved or predicted control-flow transfer.
///
/// At most one of `is_call`/`is_return` is set for indirect branches, and a
/// conditional branch is never a call or return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BranchInfo {
    /// Address of the control instruction.
    pub pc: u64,
    /// Taken target.
    pub target: u64,
    /// Instruction size in bytes.
    pub size: u8,
    /// Conditional branch.
    pub is_cond: bool,
    /// Target comes from a register.
    pub is_indirect: bool,
    /// Pushes a return address.
    pub is_call: bool,
    /// Pops a return address.
    pub is_return: bool,
}

impl BranchInfo {
    /// A conditional direct branch.
    pub const fn cond(pc: u64, target: u64, size: u8) -> Self {
        Self {
            pc,
            target,
            size,
            is_cond: true,
            is_indirect: false,
            is_call: false,
            is_return: false,
        }
    }

    /// An unconditional direct jump.
    pub const fn direct_jump(pc: u64, target: u64, size: u8) -> Self {
        Self {
            pc,
            target,
            size,
            is_cond: false,
            is_indirect: false,
            is_call: false,
            is_return: false,
        }
    }

    /// A direct call.
    pub const fn direct_call(pc: u64, target: u64, size: u8) -> Self {
        Self {
            pc,
            target,
            size,
            is_cond: false,
            is_indirect: false,
            is_call: true,
            is_return: false,
        }
    }

    /// An indirect jump.
    pub const fn indirect_jump(pc: u64, target: u64, size: u8) -> Self {
        Self {
            pc,
            target,
            size,
            is_cond: false,
            is_indirect: true,
            is_call: false,
            is_return: false,
        }
    }

    /// An indirect call.
    pub const fn indirect_call(pc: u64, target: u64, size: u8) -> Self {
        Self {
            pc,
            target,
            size,
            is_cond: false,
            is_indirect: true,
            is_call: true,
            is_return: false,
        }
    }

    /// A return.
    pub const fn ret(pc: u64, target: u64, size: u8) -> Self {
        Self {
            pc,
            target,
            size,
            is_cond: false,
            is_indirect: true,
            is_call: false,
            is_return: true,
        }
    }

    /// True for any non-conditional transfer.
    pub const fn is_uncond(&self) -> bool {
        !self.is_cond
    }

    /// Address of the instruction after this one.
    pub const fn end_pc(&self) -> u64 {
        self.pc + self.size as u64
    }

    /// Two infos describe the same static branch iff their PCs match.
    pub const fn same_branch(&self, other: &Self) -> bool {
        self.pc == other.pc
    }
}

/// A BTB row: branch info plus prediction state.
///
/// `always_taken` is only meaningful for conditional entries and is cleared
/// by the first not-taken outcome; `ctr` is the signed 2-bit direction
/// counter in `[-2, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BTBEntry {
    /// The branch this row describes.
    pub branch: BranchInfo,
    /// Row holds live data.
    pub valid: bool,
    /// Conditional branch has never been observed not-taken.
    pub always_taken: bool,
    /// Signed 2-bit saturating direction counter.
    pub ctr: i8,
    /// Tag of the owning block address.
    pub tag: u64,
}

impl BTBEntry {
    /// A fresh entry for a newly observed branch: valid, always-taken.
    pub const fn new_for(branch: BranchInfo) -> Self {
        Self {
            branch,
            valid: true,
            always_taken: true,
            ctr: 0,
            tag: 0,
        }
    }

    /// Direction the entry itself predicts (base prediction).
    pub const fn base_taken(&self) -> bool {
        self.always_taken || self.ctr >= 0
    }
}

/// Per-stage aggregate prediction assembled from every component.
///
/// `btb_entries` is sorted by `pc` ascending; `cond_takens` is keyed only by
/// PCs of conditional entries and `indirect_targets` only by PCs of
/// non-return indirect entries.
#[derive(Debug, Clone, Default)]
pub struct FullPrediction {
    /// Start address of the predicted block.
    pub bb_start: u64,
    /// BTB entries hit for this block, in instruction order.
    pub btb_entries: Vec<BTBEntry>,
    /// Direction per conditional branch PC.
    pub cond_takens: BTreeMap<u64, bool>,
    /// Predicted target per indirect branch PC.
    pub indirect_targets: BTreeMap<u64, u64>,
    /// Predicted target of a return instruction.
    pub return_target: u64,
    /// TAGE confidence per conditional branch PC, for the corrector.
    pub tage_conf: BTreeMap<u64, TageConfInfo>,
    /// Pipeline stage that produced this prediction.
    pub pred_source: usize,
}

impl FullPrediction {
    /// Clears all per-block fields, keeping `pred_source`.
    pub fn clear(&mut self) {
        self.btb_entries.clear();
        self.cond_takens.clear();
        self.indirect_targets.clear();
        self.tage_conf.clear();
        self.return_target = 0;
    }

    /// First entry whose direction resolves to taken, or the first
    /// unconditional entry. Relies on `btb_entries` being sorted.
    pub fn taken_entry(&self) -> Option<&BTBEntry> {
        self.btb_entries.iter().find(|entry| {
            entry.valid
                && if entry.branch.is_cond {
                    self.cond_takens.get(&entry.branch.pc) == Some(&true)
                } else {
                    true
                }
        })
    }

    /// Whether any branch in the block is predicted taken.
    pub fn is_taken(&self) -> bool {
        self.taken_entry().is_some()
    }

    /// Block-aligned fall-through address.
    pub fn fall_through(&self, predict_width: u64) -> u64 {
        fall_through_of(self.bb_start, predict_width)
    }

    /// Next fetch address: taken target (routed through the indirect
    /// predictor or the RAS where applicable) or the fall-through.
    pub fn target(&self, predict_width: u64) -> u64 {
        self.taken_entry().map_or_else(
            || self.fall_through(predict_width),
            |entry| {
                if entry.branch.is_indirect {
                    if entry.branch.is_return {
                        self.return_target
                    } else {
                        self.indirect_targets
                            .get(&entry.branch.pc)
                            .copied()
                            .unwrap_or(entry.branch.target)
                    }
                } else {
                    entry.branch.target
                }
            },
        )
    }

    /// End address of the block: past the taken branch, or the fall-through.
    pub fn end(&self, predict_width: u64) -> u64 {
        self.taken_entry().map_or_else(
            || self.fall_through(predict_width),
            |entry| entry.branch.end_pc(),
        )
    }

    /// PC of the taken control instruction, if any.
    pub fn control_pc(&self) -> u64 {
        self.taken_entry().map_or(0, |entry| entry.branch.pc)
    }

    /// History shift info: number of conditional branches up to and
    /// including the first taken branch, and whether that branch was taken.
    pub fn hist_info(&self) -> (usize, bool) {
        let mut shamt = 0;
        for entry in &self.btb_entries {
            if !entry.valid {
                continue;
            }
            if entry.branch.is_cond {
                shamt += 1;
                if self.cond_takens.get(&entry.branch.pc) == Some(&true) {
                    return (shamt, true);
                }
            } else {
                break;
            }
        }
        (shamt, false)
    }

    /// Backward-history shift info: the shifted-in bit is set only when the
    /// taken conditional branch jumps backward.
    pub fn bw_hist_info(&self) -> (usize, bool) {
        let mut shamt = 0;
        for entry in &self.btb_entries {
            if !entry.valid {
                continue;
            }
            if entry.branch.is_cond {
                shamt += 1;
                if self.cond_takens.get(&entry.branch.pc) == Some(&true) {
                    return (shamt, entry.branch.target < entry.branch.pc);
                }
            } else {
                break;
            }
        }
        (shamt, false)
    }

    /// Path-history info: PC of the first taken conditional branch.
    pub fn path_hist_info(&self) -> (u64, bool) {
        for entry in &self.btb_entries {
            if !entry.valid {
                continue;
            }
            if entry.branch.is_cond {
                if self.cond_takens.get(&entry.branch.pc) == Some(&true) {
                    return (entry.branch.pc, true);
                }
            } else {
                break;
            }
        }
        (0, false)
    }

    /// Compares this stage's prediction against a later stage's.
    ///
    /// Returns whether they agree and, if not, the first differing aspect in
    /// the order validity, control address, target, end, history info.
    pub fn matches(&self, other: &Self, predict_width: u64) -> (bool, OverrideReason) {
        let this_taken = self.taken_entry().is_some();
        let other_taken = other.taken_entry().is_some();
        if this_taken != other_taken {
            return (false, OverrideReason::FallThru);
        }
        if !(this_taken && other_taken) {
            return (true, OverrideReason::NoOverride);
        }
        if self.control_pc() != other.control_pc() {
            (false, OverrideReason::ControlAddr)
        } else if self.target(predict_width) != other.target(predict_width) {
            (false, OverrideReason::Target)
        } else if self.end(predict_width) != other.end(predict_width) {
            (false, OverrideReason::End)
        } else if self.hist_info() != other.hist_info() {
            (false, OverrideReason::HistInfo)
        } else {
            (true, OverrideReason::NoOverride)
        }
    }
}

/// Block-aligned fall-through address of a fetch block.
///
/// Blocks span at most `predict_width` bytes and end at the next
/// half-width-aligned boundary.
pub const fn fall_through_of(start_pc: u64, predict_width: u64) -> u64 {
    let align_mask = (predict_width >> 1) - 1;
    (start_pc + predict_width) & !align_mask
}

/// One predicted contiguous block: the unit of FSQ occupancy.
///
/// Created at prediction, annotated with execution results at squash or
/// fetch, and discarded after the components consumed it at commit.
#[derive(Debug, Clone, Default)]
pub struct FetchStream {
    /// Start PC of the block.
    pub start_pc: u64,
    /// Predicted taken?
    pub pred_taken: bool,
    /// Predicted block end (fall-through address).
    pub pred_end_pc: u64,
    /// Predicted stream-ending branch.
    pub pred_branch: BranchInfo,
    /// BTB entries the prediction was based on, sorted by pc.
    pub pred_btb_entries: Vec<BTBEntry>,

    /// Execution resolved this stream.
    pub resolved: bool,
    /// Resolved taken outcome.
    pub exe_taken: bool,
    /// Resolved stream-ending branch.
    pub exe_branch: BranchInfo,

    /// New or refreshed BTB entry derived at commit by the L1 BTB.
    pub update_new_entry: BTBEntry,
    /// Whether `update_new_entry` refreshes an existing row.
    pub update_is_old_entry: bool,
    /// PC of the last instruction that actually executed in this block.
    pub update_end_pc: u64,
    /// Predicted entries whose instructions actually executed.
    pub update_entries: Vec<BTBEntry>,

    /// How this stream was squashed, if at all.
    pub squash_type: SquashType,
    /// PC of the squashing instruction.
    pub squash_pc: u64,
    /// Pipeline stage that produced the winning prediction.
    pub pred_source: usize,

    /// Per-component rollback snapshots, indexed by component id.
    pub pred_metas: Vec<PredMeta>,
    /// Global history at prediction time.
    pub history: GlobalHistory,
    /// Start PCs of the most recent streams, for ahead-pipelined BTB update.
    pub previous_pcs: VecDeque<u64>,
}

impl FetchStream {
    /// The stream-ending branch: resolved if available, else predicted.
    pub const fn branch_info(&self) -> &BranchInfo {
        if self.resolved {
            &self.exe_branch
        } else {
            &self.pred_branch
        }
    }

    /// PC of the stream-ending control instruction.
    pub const fn control_pc(&self) -> u64 {
        self.branch_info().pc
    }

    /// Taken outcome: resolved if available, else predicted.
    pub const fn taken(&self) -> bool {
        if self.resolved {
            self.exe_taken
        } else {
            self.pred_taken
        }
    }

    /// Target of the stream-ending branch.
    pub const fn taken_target(&self) -> u64 {
        self.branch_info().target
    }

    /// Seeds the execution result with the prediction, so an untouched
    /// stream commits as correctly predicted.
    pub fn set_default_resolve(&mut self) {
        self.resolved = false;
        self.exe_branch = self.pred_branch;
        self.exe_taken = self.pred_taken;
    }

    /// History shift info as of a squash at `squash_pc`: predicted
    /// conditional branches before the squash point, plus the squashing
    /// branch itself when conditional.
    pub fn hist_info_for_squash(
        &self,
        squash_pc: u64,
        is_cond: bool,
        actually_taken: bool,
    ) -> (usize, bool) {
        let mut shamt = self
            .pred_btb_entries
            .iter()
            .filter(|e| e.valid && e.branch.pc >= self.start_pc && e.branch.pc < squash_pc)
            .count();
        let mut cond_taken = false;
        if is_cond {
            shamt += 1;
            cond_taken = actually_taken;
        }
        (shamt, cond_taken)
    }

    /// Backward-history variant of [`Self::hist_info_for_squash`]: the
    /// shifted-in bit is set only for a taken backward branch.
    pub fn bw_hist_info_for_squash(
        &self,
        squash_pc: u64,
        is_cond: bool,
        actually_taken: bool,
        target: u64,
    ) -> (usize, bool) {
        let (shamt, _) = self.hist_info_for_squash(squash_pc, is_cond, actually_taken);
        let cond_taken = is_cond && actually_taken && squash_pc > target;
        (shamt, cond_taken)
    }

    /// Fixes `update_end_pc` before component update: the taken control PC,
    /// the aligned fall-through, or the squash PC.
    pub fn set_update_end_pc(&mut self, predict_width: u64) {
        self.update_end_pc = if self.squash_type == SquashType::None {
            if self.exe_taken {
                self.control_pc()
            } else {
                fall_through_of(self.start_pc, predict_width)
            }
        } else {
            self.squash_pc
        };
    }

    /// Selects the predicted entries whose instructions actually executed.
    /// Must run after [`Self::set_update_end_pc`].
    pub fn set_update_entries(&mut self) {
        self.update_entries = self
            .pred_btb_entries
            .iter()
            .filter(|e| {
                e.valid && e.branch.pc >= self.start_pc && e.branch.pc <= self.update_end_pc
            })
            .copied()
            .collect();
    }
}

/// A fetch block handed to the fetch unit, derived from a [`FetchStream`].
#[derive(Debug, Clone, Default)]
pub struct FtqEntry {
    /// First instruction address of the block.
    pub start_pc: u64,
    /// End address (exclusive).
    pub end_pc: u64,
    /// PC of the taken control instruction, 0 when not taken.
    pub taken_pc: u64,
    /// Whether the block ends in a taken branch.
    pub taken: bool,
    /// Target of the taken branch, 0 when not taken.
    pub target: u64,
    /// Id of the originating fetch stream.
    pub fsq_id: u64,
}
