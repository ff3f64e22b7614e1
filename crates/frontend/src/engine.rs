//! The decoupled branch prediction driver.
//!
//! [`DecoupledPredictor`] owns every prediction component and both queues
//! and advances them one cycle per [`DecoupledPredictor::tick`]. Within a
//! tick the order is fixed: finalize a pending prediction (counting
//! override bubbles), drain FSQ blocks into the FTQ, enqueue a new fetch
//! stream, consume one bubble, and finally issue the next PC and history to
//! every component. Execution and commit feed back through the squash
//! protocols and [`DecoupledPredictor::update`].

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::config::{Config, ConfigError};
use crate::ftq::FetchTargetQueue;
use crate::history::{GlobalHistory, HistoryManager};
use crate::predictors::{
    BasePredictor, Component, ItagePredictor, MgscPredictor, ReturnAddressStack, SetAssocBtb,
    TagePredictor,
};
use crate::stats::BpuStats;
use crate::stream::{
    BranchInfo, FetchStream, FtqEntry, FullPrediction, OverrideReason, SquashType,
};

/// Sentinel for "no valid fetch PC".
const MAX_ADDR: u64 = u64::MAX;

/// Index of the L1 BTB in the component vector.
const L1_BTB_IDX: usize = 1;

/// The decoupled branch predictor: pipeline driver, FSQ, and FTQ.
#[derive(Debug)]
pub struct DecoupledPredictor {
    components: Vec<Component>,
    max_ahead_stages: usize,

    fsq: BTreeMap<u64, FetchStream>,
    fsq_size: usize,
    fsq_id: u64,
    ftq: FetchTargetQueue,

    num_stages: usize,
    predict_width: u64,
    history_bits: usize,

    s0_pc: u64,
    s0_history: GlobalHistory,
    preds_of_each_stage: Vec<FullPrediction>,
    final_pred: FullPrediction,

    sent_pc_hist: bool,
    received_pred: bool,
    squashing: bool,
    num_override_bubbles: usize,

    history_manager: HistoryManager,
    stats: BpuStats,
}

impl DecoupledPredictor {
    /// Builds the predictor and all components from a validated config.
    ///
    /// # Errors
    ///
    /// Propagates [`ConfigError`] for inconsistent geometry.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let pipeline = &config.pipeline;
        let mut components = vec![
            Component::Btb(SetAssocBtb::new(&config.ubtb, pipeline)),
            Component::Btb(SetAssocBtb::new(&config.btb, pipeline)),
            Component::Tage(TagePredictor::new(&config.tage, pipeline)),
            Component::Ittage(ItagePredictor::new(&config.ittage, pipeline)),
            Component::Mgsc(MgscPredictor::new(&config.mgsc, pipeline)),
            Component::Ras(ReturnAddressStack::new(&config.ras)),
        ];
        for (idx, component) in components.iter_mut().enumerate() {
            component.set_component_idx(idx);
        }
        let max_ahead_stages = components
            .iter()
            .map(BasePredictor::ahead_pipelined_stages)
            .max()
            .unwrap_or(0);

        let mut preds = vec![FullPrediction::default(); pipeline.num_stages];
        for (i, pred) in preds.iter_mut().enumerate() {
            pred.pred_source = i;
        }

        Ok(Self {
            components,
            max_ahead_stages,
            fsq: BTreeMap::new(),
            fsq_size: config.queues.fsq_size,
            fsq_id: 1,
            ftq: FetchTargetQueue::new(config.queues.ftq_size),
            num_stages: pipeline.num_stages,
            predict_width: pipeline.predict_width,
            history_bits: pipeline.history_bits,
            s0_pc: MAX_ADDR,
            s0_history: GlobalHistory::new(pipeline.history_bits),
            preds_of_each_stage: preds,
            final_pred: FullPrediction::default(),
            sent_pc_hist: false,
            received_pred: false,
            squashing: true,
            num_override_bubbles: 0,
            history_manager: HistoryManager::new(pipeline.max_shamt),
            stats: BpuStats::default(),
        })
    }

    /// Collected statistics.
    pub const fn stats(&self) -> &BpuStats {
        &self.stats
    }

    /// Current fetch PC at the head of the prediction pipeline.
    pub const fn s0_pc(&self) -> u64 {
        self.s0_pc
    }

    /// Pending override bubbles.
    pub const fn override_bubbles(&self) -> usize {
        self.num_override_bubbles
    }

    /// Read access to the fetch stream queue, oldest first.
    pub const fn fsq(&self) -> &BTreeMap<u64, FetchStream> {
        &self.fsq
    }

    /// Id the next enqueued fetch stream will get.
    pub const fn next_fsq_id(&self) -> u64 {
        self.fsq_id
    }

    /// Id of the fetch target currently being supplied (or demanded).
    pub const fn supplying_target_id(&self) -> u64 {
        self.ftq.supplying_target_id()
    }

    fn stream_queue_full(&self) -> bool {
        self.fsq.len() >= self.fsq_size
    }

    /// Advances the predictor by one cycle.
    pub fn tick(&mut self) {
        self.stats.cycles += 1;
        if self.stream_queue_full() {
            self.stats.fsq_full_cannot_enq += 1;
        }

        if !self.received_pred && self.num_override_bubbles == 0 && self.sent_pc_hist {
            self.generate_final_prediction();
        }

        if self.squashing {
            self.received_pred = false;
        } else {
            self.try_enq_fetch_target();
            self.try_enq_fetch_stream();
        }

        if self.num_override_bubbles > 0 {
            self.num_override_bubbles -= 1;
            self.stats.override_bubble_num += 1;
        }

        self.sent_pc_hist = false;

        // Issue the next lookup once the pipeline has room for its result.
        if !self.received_pred && !self.stream_queue_full() && self.s0_pc != MAX_ADDR {
            for pred in &mut self.preds_of_each_stage {
                pred.clear();
                pred.bb_start = self.s0_pc;
            }
            let s0_pc = self.s0_pc;
            for component in &mut self.components {
                component.put_pc_history(s0_pc, &self.s0_history, &mut self.preds_of_each_stage);
            }
            self.sent_pc_hist = true;
        }

        self.squashing = false;
    }

    /// Selects the best per-stage prediction and counts the bubbles needed
    /// when a later stage overrides an earlier one.
    fn generate_final_prediction(&mut self) {
        let chosen_stage = (0..self.num_stages)
            .rev()
            .find(|&s| !self.preds_of_each_stage[s].btb_entries.is_empty())
            .unwrap_or(0);
        let chosen = self.preds_of_each_stage[chosen_stage].clone();

        let mut first_hit_stage = 0;
        let mut reason = OverrideReason::NoOverride;
        while first_hit_stage < self.num_stages - 1 {
            let (matches, r) =
                self.preds_of_each_stage[first_hit_stage].matches(&chosen, self.predict_width);
            if matches {
                break;
            }
            first_hit_stage += 1;
            reason = r;
        }

        self.num_override_bubbles = first_hit_stage;
        if self.num_override_bubbles > 0 {
            self.stats.override_count += 1;
            match reason {
                OverrideReason::FallThru => self.stats.override_fall_thru += 1,
                OverrideReason::ControlAddr => self.stats.override_control_addr += 1,
                OverrideReason::Target => self.stats.override_target += 1,
                OverrideReason::End => self.stats.override_end += 1,
                OverrideReason::HistInfo => self.stats.override_hist_info += 1,
                OverrideReason::NoOverride => {}
            }
        }

        self.final_pred = chosen;
        self.final_pred.pred_source = first_hit_stage;
        self.received_pred = true;
        trace!(
            target: "override",
            "final prediction from stage {chosen_stage}, {} bubbles",
            self.num_override_bubbles
        );

        for pred in &mut self.preds_of_each_stage {
            pred.clear();
        }
    }

    /// Carves the next fetch block out of the FSQ head and hands it to the
    /// FTQ.
    fn try_enq_fetch_target(&mut self) {
        if self.ftq.is_full() {
            return;
        }
        if self.fsq.is_empty() {
            self.stats.fsq_not_valid += 1;
            return;
        }
        let stream_id = self.ftq.enq_state().stream_id;
        let Some(stream) = self.fsq.get(&stream_id) else {
            self.stats.fsq_not_valid += 1;
            return;
        };

        let start_pc = self.ftq.enq_state().pc;
        let end_pc = stream.pred_end_pc;
        let taken = stream.taken();
        let entry = if taken {
            FtqEntry {
                start_pc,
                end_pc,
                taken_pc: stream.control_pc(),
                taken: true,
                target: stream.taken_target(),
                fsq_id: stream_id,
            }
        } else {
            FtqEntry {
                start_pc,
                end_pc,
                taken_pc: 0,
                taken: false,
                target: 0,
                fsq_id: stream_id,
            }
        };

        let next_pc = if taken { entry.target } else { end_pc };
        {
            let enq = self.ftq.enq_state_mut();
            enq.pc = next_pc;
            enq.stream_id += 1;
        }
        self.ftq.enqueue(entry);
        debug_assert!(self.ftq.enq_state().stream_id <= self.fsq_id + 1);
    }

    /// Enqueues the finalized prediction as a new fetch stream, once all
    /// override bubbles have drained.
    fn try_enq_fetch_stream(&mut self) {
        if !self.received_pred {
            return;
        }
        if self.s0_pc == MAX_ADDR {
            return;
        }
        if self.num_override_bubbles > 0 {
            trace!(target: "override", "holding enqueue for {} bubbles", self.num_override_bubbles);
            return;
        }
        debug_assert!(!self.stream_queue_full());
        self.make_new_prediction();
        self.received_pred = false;
    }

    /// Builds the FSQ entry for the final prediction, snapshots every
    /// component, and speculatively advances PC and history.
    fn make_new_prediction(&mut self) {
        let taken = self.final_pred.is_taken();
        let fall_through = self.final_pred.fall_through(self.predict_width);
        let next_pc = self.final_pred.target(self.predict_width);

        let mut entry = FetchStream {
            start_pc: self.s0_pc,
            pred_taken: taken,
            pred_end_pc: fall_through,
            pred_btb_entries: self.final_pred.btb_entries.clone(),
            pred_source: self.final_pred.pred_source,
            ..FetchStream::default()
        };
        if taken {
            if let Some(taken_entry) = self.final_pred.taken_entry() {
                entry.pred_branch = taken_entry.branch;
                // The routed target may come from ITTAGE or the RAS rather
                // than the BTB entry itself.
                entry.pred_branch.target = next_pc;
            }
        }

        debug!(
            target: "bpu",
            "new stream {}: {:#x} -> {:#x}, taken {taken}",
            self.fsq_id, entry.start_pc, next_pc
        );

        self.s0_pc = next_pc;
        entry.history = self.s0_history.clone();

        for component in &mut self.components {
            component.spec_update_hist(&self.s0_history, &self.final_pred);
            entry.pred_metas.push(component.prediction_meta());
        }

        let (shamt, shift_taken) = self.final_pred.hist_info();
        self.s0_history.shift_in(shamt, shift_taken);
        self.history_manager.add_speculative(
            entry.start_pc,
            shamt,
            shift_taken,
            &entry.pred_branch,
            self.fsq_id,
        );
        debug_assert!(self.check_folded_hists());

        entry.set_default_resolve();

        // Ahead-pipelined BTBs rebuild their read index from the starts of
        // the streams that preceded this one.
        if self.max_ahead_stages > 0 {
            for i in 0..self.max_ahead_stages {
                let id = (self.fsq_id + i as u64).checked_sub(self.max_ahead_stages as u64);
                if let Some(id) = id {
                    if let Some(prev) = self.fsq.get(&id) {
                        entry.previous_pcs.push_back(prev.start_pc);
                    }
                }
            }
        }

        let inserted = self.fsq.insert(self.fsq_id, entry);
        debug_assert!(inserted.is_none(), "fsq id reused");
        self.fsq_id += 1;
        self.stats.fsq_enqueued += 1;
    }

    /// Fetch demands the block containing `demand_pc`.
    ///
    /// Returns the supplying block, or `None` when the FTQ has nothing for
    /// the current demand.
    pub fn try_supply_fetch_with_target(&mut self, demand_pc: u64) -> Option<FtqEntry> {
        if self.ftq.try_supply_fetch_with_target(demand_pc) {
            self.ftq.target().cloned()
        } else {
            self.stats.ftq_not_valid += 1;
            None
        }
    }

    /// Per-instruction fetch handshake at `pc`.
    ///
    /// Returns `(taken, run_out_of_entry)`; the supplying block is retired
    /// when its taken branch is consumed.
    pub fn decoupled_predict(&mut self, pc: u64) -> (bool, bool) {
        if !self.ftq.fetch_target_available() {
            trace!(target: "bpu", "no ftq entry for pc {pc:#x}, dummy prediction");
            self.stats.ftq_not_valid += 1;
            return (false, true);
        }
        let Some(entry) = self.ftq.target().cloned() else {
            return (false, true);
        };
        debug_assert!(pc >= entry.start_pc && pc < entry.end_pc);
        let taken = entry.taken && pc == entry.taken_pc;
        let run_out = taken;
        if run_out {
            self.ftq.finish_current_fetch_target();
        }
        (taken, run_out)
    }

    /// Removes every stream younger than the squashing one.
    fn squash_streams_after(&mut self, squash_stream_id: u64) {
        let doomed: Vec<u64> = self
            .fsq
            .range(squash_stream_id + 1..)
            .map(|(id, _)| *id)
            .collect();
        for id in doomed {
            trace!(target: "bpu", "erasing stream {id} while squashing {squash_stream_id}");
            let _ = self.fsq.remove(&id);
        }
    }

    /// Rewinds every component's history to a squashed stream's snapshot and
    /// replays the resolved outcome, then re-shifts the primary history.
    fn recover_histories(&mut self, stream: &FetchStream, shamt: usize, cond_taken: bool) {
        self.s0_history = stream.history.clone();
        for component in &mut self.components {
            component.recover_hist(&self.s0_history, stream, shamt, cond_taken);
        }
        self.s0_history.shift_in(shamt, cond_taken);
    }

    /// The back end resolved a control instruction against the prediction.
    ///
    /// `branch` describes the squashing instruction with its real target; a
    /// return whose target the caller could not resolve may carry target 0,
    /// in which case the RAS snapshot taken at prediction supplies it.
    pub fn control_squash(
        &mut self,
        ftq_id: u64,
        fsq_id: u64,
        mut branch: BranchInfo,
        actually_taken: bool,
    ) {
        self.stats.control_squash += 1;
        self.squashing = true;

        if !self.fsq.contains_key(&fsq_id) {
            debug!(target: "bpu", "squashing stream {fsq_id} is gone, ignoring");
            return;
        }

        if branch.is_return && actually_taken && branch.target == 0 {
            if let Some(stream) = self.fsq.get(&fsq_id) {
                branch.target = ras_target_from_meta(stream);
            }
        }
        let real_target = branch.target;

        debug!(
            target: "bpu",
            "control squash: ftq {ftq_id}, fsq {fsq_id}, pc {:#x} -> {real_target:#x}, taken {actually_taken}",
            branch.pc
        );

        if let Some(stream) = self.fsq.get_mut(&fsq_id) {
            stream.squash_type = SquashType::Ctrl;
            stream.exe_branch = branch;
            stream.exe_taken = actually_taken;
            stream.squash_pc = branch.pc;
            stream.resolved = true;
        }
        self.squash_streams_after(fsq_id);

        let stream = self.fsq[&fsq_id].clone();
        let (shamt, cond_taken) =
            stream.hist_info_for_squash(branch.pc, branch.is_cond, actually_taken);
        self.recover_histories(&stream, shamt, cond_taken);
        self.history_manager
            .squash(fsq_id, shamt, cond_taken, &stream.exe_branch);
        debug_assert!(self.check_history());
        debug_assert!(self.check_folded_hists());

        self.s0_pc = real_target;
        for pred in &mut self.preds_of_each_stage {
            pred.clear();
        }
        self.fsq_id = fsq_id + 1;
        self.ftq.squash(ftq_id + 1, fsq_id + 1, real_target);
    }

    /// A non-control disturbance (e.g. memory order violation) at `pc`:
    /// the stream's prediction may still be right, but fetch must restart.
    pub fn non_control_squash(&mut self, ftq_id: u64, fsq_id: u64, pc: u64) {
        self.stats.non_control_squash += 1;
        self.squashing = true;

        if !self.fsq.contains_key(&fsq_id) {
            return;
        }
        debug!(target: "bpu", "non-control squash: ftq {ftq_id}, fsq {fsq_id}, pc {pc:#x}");

        if let Some(stream) = self.fsq.get_mut(&fsq_id) {
            stream.exe_taken = false;
            stream.resolved = true;
            stream.squash_pc = pc;
            stream.squash_type = SquashType::Other;
        }
        self.squash_streams_after(fsq_id);

        let stream = self.fsq[&fsq_id].clone();
        let (shamt, cond_taken) = stream.hist_info_for_squash(pc, false, false);
        self.recover_histories(&stream, shamt, cond_taken);
        self.history_manager
            .squash(fsq_id, shamt, cond_taken, &BranchInfo::default());
        debug_assert!(self.check_history());
        debug_assert!(self.check_folded_hists());

        self.s0_pc = pc;
        for pred in &mut self.preds_of_each_stage {
            pred.clear();
        }
        self.fsq_id = fsq_id + 1;
        self.ftq.squash(ftq_id + 1, fsq_id + 1, pc);
    }

    /// A trap or fault disturbed the stream at `pc`; fetch restarts there
    /// and no branch outcome is trained.
    pub fn trap_squash(&mut self, ftq_id: u64, fsq_id: u64, pc: u64) {
        self.stats.trap_squash += 1;
        self.squashing = true;

        if !self.fsq.contains_key(&fsq_id) {
            return;
        }
        debug!(target: "bpu", "trap squash: ftq {ftq_id}, fsq {fsq_id}, pc {pc:#x}");

        if let Some(stream) = self.fsq.get_mut(&fsq_id) {
            stream.exe_taken = false;
            stream.resolved = true;
            stream.squash_pc = pc;
            stream.squash_type = SquashType::Trap;
        }
        self.squash_streams_after(fsq_id);

        let stream = self.fsq[&fsq_id].clone();
        let (shamt, cond_taken) = stream.hist_info_for_squash(pc, false, false);
        self.recover_histories(&stream, shamt, cond_taken);
        self.history_manager
            .squash(fsq_id, shamt, cond_taken, &BranchInfo::default());
        debug_assert!(self.check_history());
        debug_assert!(self.check_folded_hists());

        self.s0_pc = pc;
        for pred in &mut self.preds_of_each_stage {
            pred.clear();
        }
        self.fsq_id = fsq_id + 1;
        self.ftq.squash(ftq_id + 1, fsq_id + 1, pc);
    }

    /// Commit boundary: trains every component with all streams up to and
    /// including `committed_fsq_id` and drops them from the FSQ.
    pub fn update(&mut self, committed_fsq_id: u64) {
        let committed: Vec<u64> = self
            .fsq
            .range(..=committed_fsq_id)
            .map(|(id, _)| *id)
            .collect();
        for id in committed {
            let Some(mut stream) = self.fsq.remove(&id) else {
                continue;
            };
            let is_hit = !stream.pred_btb_entries.is_empty();
            let miss_predicted = stream.squash_type == SquashType::Ctrl;
            debug!(
                target: "bpu",
                "commit stream {id} start {:#x}, {} predicted",
                stream.start_pc,
                if miss_predicted { "miss" } else { "correctly" }
            );

            if is_hit {
                self.stats.btb_hit += 1;
            } else if stream.exe_taken {
                self.stats.btb_miss += 1;
            }

            if is_hit || stream.exe_taken {
                stream.set_update_end_pc(self.predict_width);
                stream.set_update_entries();
                if let Component::Btb(l1) = &self.components[L1_BTB_IDX] {
                    l1.get_and_set_new_entry(&mut stream);
                }
                if stream.update_new_entry.valid {
                    if stream.update_is_old_entry {
                        self.stats.btb_old_entry += 1;
                    } else {
                        self.stats.btb_new_entry += 1;
                    }
                }
                self.tally_commit(&stream);
                for component in &mut self.components {
                    component.update(&stream, &mut self.stats);
                }
            }
            self.stats.fsq_committed += 1;
        }
        self.history_manager.commit(committed_fsq_id);
    }

    /// Branch-class commit statistics.
    fn tally_commit(&mut self, stream: &FetchStream) {
        let mispred_at = |pc: u64| {
            stream.squash_type == SquashType::Ctrl && stream.squash_pc == pc
        };
        for entry in &stream.update_entries {
            let b = &entry.branch;
            if b.is_cond {
                self.stats.cond_num += 1;
                if mispred_at(b.pc) {
                    self.stats.cond_miss += 1;
                }
            }
        }
        if stream.exe_taken {
            let b = &stream.exe_branch;
            if !b.is_cond {
                if b.is_return {
                    self.stats.return_num += 1;
                    if mispred_at(b.pc) {
                        self.stats.return_miss += 1;
                    }
                } else if b.is_indirect {
                    self.stats.other_num += 1;
                    if mispred_at(b.pc) {
                        self.stats.other_miss += 1;
                    }
                } else {
                    self.stats.uncond_num += 1;
                    if mispred_at(b.pc) {
                        self.stats.uncond_miss += 1;
                    }
                }
            }
        }
    }

    /// Resets the fetch PC after a pipeline flush, keeping trained state.
    pub fn reset_pc(&mut self, new_pc: u64) {
        self.s0_pc = new_pc;
        self.ftq.reset_pc(new_pc);
    }

    /// Debug check: the primary history equals the replayable log.
    fn check_history(&self) -> bool {
        let (ideal, ideal_size) = self.history_manager.ideal_history(self.history_bits);
        let comparable = ideal_size.min(self.history_bits);
        self.s0_history.low_bits_eq(&ideal, comparable)
    }

    /// Debug check: every folded history matches the primary register.
    fn check_folded_hists(&self) -> bool {
        self.components.iter().all(|component| match component {
            Component::Tage(t) => t.check_folded_hist(&self.s0_history),
            Component::Ittage(t) => t.check_folded_hist(&self.s0_history),
            _ => true,
        })
    }
}

/// Return target recorded in a stream's RAS snapshot.
fn ras_target_from_meta(stream: &FetchStream) -> u64 {
    stream
        .pred_metas
        .iter()
        .find_map(|meta| match meta {
            crate::predictors::PredMeta::Ras(ras) => Some(ras.target),
            _ => None,
        })
        .unwrap_or(0)
}
