//! ITTAGE indirect-target predictor.
//!
//! Same tagged-geometric skeleton as TAGE, but each row stores a full
//! target address with a 2-bit unsigned confidence counter. A provider's
//! target is trusted only at confidence 2 or above; below that the
//! alternate provider is consulted, and failing both the BTB's stored
//! target stands. Mispredicted targets drive TAGE-style randomized
//! allocation at confidence 2.

use std::collections::BTreeMap;

use tracing::trace;

use crate::config::{ItageConfig, PipelineConfig};
use crate::history::{FoldedHistory, GlobalHistory, HistoryKind};
use crate::predictors::{BasePredictor, PredMeta};
use crate::stats::BpuStats;
use crate::stream::{FetchStream, FullPrediction, Lfsr64, SquashType};

/// Confidence at or above which a provider target is used.
const CONF_USE: u8 = 2;
/// Saturation point of the useful-reset counter.
const USEFUL_RESET_LIMIT: i32 = 256;

/// One row of a tagged target table.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItageEntry {
    /// Row holds live data.
    pub valid: bool,
    /// History tag.
    pub tag: u64,
    /// Predicted target.
    pub target: u64,
    /// Unsigned 2-bit confidence counter.
    pub ctr: u8,
    /// Protects the row from allocation while set.
    pub useful: bool,
    /// PC of the branch the row was allocated for.
    pub pc: u64,
}

/// Where a lookup found a row.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItageHit {
    /// A matching row was found.
    pub found: bool,
    /// The matching row at lookup time.
    pub entry: ItageEntry,
    /// Table index of the hit.
    pub table: usize,
    /// Row index of the hit.
    pub index: usize,
}

/// Per-branch prediction recorded for the update path.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItagePrediction {
    /// Branch PC.
    pub pc: u64,
    /// Longest-history hit.
    pub main: ItageHit,
    /// Second-longest hit.
    pub alt: ItageHit,
    /// The alternate or base target was used.
    pub use_alt: bool,
    /// Target handed to the pipeline.
    pub target: u64,
}

/// Lookup snapshot for update and history recovery.
#[derive(Debug, Clone, Default)]
pub struct ItageMeta {
    /// Predictions keyed by branch PC.
    pub preds: BTreeMap<u64, ItagePrediction>,
    /// Useful bit of each table's indexed row, bit t = table t.
    pub useful_mask: u64,
    /// Folded index histories at lookup.
    pub index_hist: Vec<FoldedHistory>,
    /// Folded tag histories at lookup.
    pub tag_hist: Vec<FoldedHistory>,
    /// Folded alternate-tag histories at lookup.
    pub alt_tag_hist: Vec<FoldedHistory>,
}

/// The ITTAGE predictor.
#[derive(Debug)]
pub struct ItagePredictor {
    tables: Vec<Vec<ItageEntry>>,
    index_bits: Vec<usize>,
    tag_bits: Vec<usize>,
    num_predictors: usize,
    block_shift: u32,
    delay: usize,

    index_hist: Vec<FoldedHistory>,
    tag_hist: Vec<FoldedHistory>,
    alt_tag_hist: Vec<FoldedHistory>,

    alloc_lfsr: Lfsr64,
    useful_reset_cnt: i32,

    meta: ItageMeta,
    component_idx: usize,
}

impl ItagePredictor {
    /// Builds the predictor from validated geometry.
    pub fn new(config: &ItageConfig, pipeline: &PipelineConfig) -> Self {
        let mut tables = Vec::with_capacity(config.num_predictors);
        let mut index_bits = Vec::with_capacity(config.num_predictors);
        let mut index_hist = Vec::new();
        let mut tag_hist = Vec::new();
        let mut alt_tag_hist = Vec::new();
        for t in 0..config.num_predictors {
            tables.push(vec![ItageEntry::default(); config.table_sizes[t]]);
            let bits = config.table_sizes[t].trailing_zeros() as usize;
            index_bits.push(bits);
            index_hist.push(FoldedHistory::new(
                HistoryKind::Global,
                config.hist_lengths[t],
                bits,
                pipeline.max_shamt,
            ));
            tag_hist.push(FoldedHistory::new(
                HistoryKind::Global,
                config.hist_lengths[t],
                config.tag_bits[t],
                pipeline.max_shamt,
            ));
            alt_tag_hist.push(FoldedHistory::new(
                HistoryKind::Global,
                config.hist_lengths[t],
                config.tag_bits[t] - 1,
                pipeline.max_shamt,
            ));
        }
        Self {
            tables,
            index_bits,
            tag_bits: config.tag_bits.clone(),
            num_predictors: config.num_predictors,
            block_shift: pipeline.block_size.trailing_zeros(),
            delay: config.num_delay_stages,
            index_hist,
            tag_hist,
            alt_tag_hist,
            alloc_lfsr: Lfsr64::new(),
            useful_reset_cnt: 0,
            meta: ItageMeta::default(),
            component_idx: 0,
        }
    }

    fn index_of(&self, pc: u64, table: usize, folded: &FoldedHistory) -> usize {
        let mask = (1u64 << self.index_bits[table]) - 1;
        (((pc >> self.block_shift) ^ folded.get()) & mask) as usize
    }

    fn tag_of(&self, pc: u64, table: usize, tag_fh: &FoldedHistory, alt_fh: &FoldedHistory) -> u64 {
        let mask = (1u64 << self.tag_bits[table]) - 1;
        ((pc >> self.block_shift) ^ tag_fh.get() ^ (alt_fh.get() << 1)) & mask
    }

    /// Reads all tables for the block and resolves a target per non-return
    /// indirect BTB entry.
    fn lookup_block(
        &mut self,
        start_pc: u64,
        btb_entries: &[crate::stream::BTBEntry],
    ) -> BTreeMap<u64, u64> {
        let mut rows = Vec::with_capacity(self.num_predictors);
        let mut useful_mask = 0u64;
        for t in 0..self.num_predictors {
            let index = self.index_of(start_pc, t, &self.index_hist[t]);
            let tag = self.tag_of(start_pc, t, &self.tag_hist[t], &self.alt_tag_hist[t]);
            let entry = self.tables[t][index];
            if entry.useful {
                useful_mask |= 1 << t;
            }
            rows.push((entry, index, tag));
        }
        self.meta.preds.clear();
        self.meta.useful_mask = useful_mask;
        self.meta.index_hist = self.index_hist.clone();
        self.meta.tag_hist = self.tag_hist.clone();
        self.meta.alt_tag_hist = self.alt_tag_hist.clone();

        let mut targets = BTreeMap::new();
        for btb_entry in btb_entries {
            let b = &btb_entry.branch;
            if !(btb_entry.valid && b.is_indirect && !b.is_return) {
                continue;
            }
            let pc = b.pc;
            let mut main = ItageHit::default();
            let mut alt = ItageHit::default();
            for t in (0..self.num_predictors).rev() {
                let (entry, index, tag) = rows[t];
                let matched = entry.valid && entry.tag == tag && entry.pc == pc;
                if matched {
                    let hit = ItageHit {
                        found: true,
                        entry,
                        table: t,
                        index,
                    };
                    if !main.found {
                        main = hit;
                    } else {
                        alt = hit;
                        break;
                    }
                }
            }

            // Trust a provider only at full confidence; otherwise fall back
            // to the alternate, then to the BTB's stored target.
            let main_confident = main.found && main.entry.ctr >= CONF_USE;
            let alt_confident = alt.found && alt.entry.ctr >= CONF_USE;
            let (use_alt, target) = if main_confident {
                (false, main.entry.target)
            } else if alt_confident {
                (true, alt.entry.target)
            } else {
                (true, b.target)
            };
            trace!(target: "ittage", "predict {pc:#x}: target {target:#x}, use_alt {use_alt}");

            let _ = self.meta.preds.insert(
                pc,
                ItagePrediction {
                    pc,
                    main,
                    alt,
                    use_alt,
                    target,
                },
            );
            let _ = targets.insert(pc, target);
        }
        targets
    }

    fn do_update_hist(&mut self, history: &GlobalHistory, shamt: usize, taken: bool) {
        if shamt == 0 {
            return;
        }
        for t in 0..self.num_predictors {
            self.index_hist[t].update(history, shamt, taken, 0);
            self.tag_hist[t].update(history, shamt, taken, 0);
            self.alt_tag_hist[t].update(history, shamt, taken, 0);
        }
    }

    fn update_counter(counter: &mut u8, up: bool) {
        if up {
            if *counter < 3 {
                *counter += 1;
            }
        } else if *counter > 0 {
            *counter -= 1;
        }
    }

    fn bump_reset_counter(&mut self, can_allocate: bool) {
        if can_allocate {
            self.useful_reset_cnt = (self.useful_reset_cnt - 1).max(0);
        } else {
            self.useful_reset_cnt = (self.useful_reset_cnt + 1).min(USEFUL_RESET_LIMIT);
        }
        if self.useful_reset_cnt == USEFUL_RESET_LIMIT {
            for table in &mut self.tables {
                for entry in table {
                    entry.useful = false;
                }
            }
            self.useful_reset_cnt = 0;
        }
    }

    fn allocate(
        &mut self,
        pc: u64,
        start_pc: u64,
        start_table: usize,
        free_mask: u64,
        exe_target: u64,
        meta: &ItageMeta,
    ) {
        if free_mask == 0 {
            return;
        }
        let alloc_tables = self.num_predictors - start_table;
        let lfsr_mask = self.alloc_lfsr.get() % (1u64 << alloc_tables);
        let masked = lfsr_mask & free_mask;
        let allocate = if masked != 0 { masked } else { free_mask };
        for t in start_table..self.num_predictors {
            if allocate & (1 << (t - start_table)) == 0 {
                continue;
            }
            let index = self.index_of(start_pc, t, &meta.index_hist[t]);
            let tag = self.tag_of(start_pc, t, &meta.tag_hist[t], &meta.alt_tag_hist[t]);
            trace!(target: "ittage", "allocating table {t} index {index} for pc {pc:#x}");
            self.tables[t][index] = ItageEntry {
                valid: true,
                tag,
                target: exe_target,
                ctr: CONF_USE,
                useful: false,
                pc,
            };
            break;
        }
    }

    /// Folded-history consistency check against the authoritative register.
    pub fn check_folded_hist(&self, history: &GlobalHistory) -> bool {
        (0..self.num_predictors).all(|t| {
            self.index_hist[t].check(history)
                && self.tag_hist[t].check(history)
                && self.alt_tag_hist[t].check(history)
        })
    }
}

impl BasePredictor for ItagePredictor {
    /// Resolves a target for every non-return indirect entry of each stage
    /// at or past this predictor's delay.
    fn put_pc_history(
        &mut self,
        start_pc: u64,
        _history: &GlobalHistory,
        stage_preds: &mut [FullPrediction],
    ) {
        for s in self.delay..stage_preds.len() {
            let entries = stage_preds[s].btb_entries.clone();
            let targets = self.lookup_block(start_pc, &entries);
            stage_preds[s].indirect_targets = targets;
        }
    }

    fn prediction_meta(&self) -> PredMeta {
        PredMeta::Ittage(self.meta.clone())
    }

    fn spec_update_hist(&mut self, history: &GlobalHistory, pred: &FullPrediction) {
        let (shamt, cond_taken) = pred.hist_info();
        self.do_update_hist(history, shamt, cond_taken);
    }

    fn recover_hist(
        &mut self,
        history: &GlobalHistory,
        stream: &FetchStream,
        shamt: usize,
        cond_taken: bool,
    ) {
        let PredMeta::Ittage(meta) = &stream.pred_metas[self.component_idx] else {
            return;
        };
        for t in 0..self.num_predictors {
            self.index_hist[t].recover(&meta.index_hist[t]);
            self.tag_hist[t].recover(&meta.tag_hist[t]);
            self.alt_tag_hist[t].recover(&meta.alt_tag_hist[t]);
        }
        self.do_update_hist(history, shamt, cond_taken);
    }

    /// Trains confidence counters toward the executed target, refreshes
    /// weak rows, and allocates on a mispredicted indirect.
    fn update(&mut self, stream: &FetchStream, stats: &mut BpuStats) {
        let PredMeta::Ittage(meta) = stream.pred_metas[self.component_idx].clone() else {
            return;
        };

        let mut entries: Vec<_> = stream
            .update_entries
            .iter()
            .filter(|e| e.branch.is_indirect && !e.branch.is_return)
            .copied()
            .collect();
        if !stream.update_is_old_entry
            && stream.update_new_entry.valid
            && stream.update_new_entry.branch.is_indirect
            && !stream.update_new_entry.branch.is_return
        {
            entries.push(stream.update_new_entry);
        }

        for btb_entry in &entries {
            let pc = btb_entry.branch.pc;
            let executed_here =
                stream.exe_taken && stream.exe_branch.same_branch(&btb_entry.branch);
            if !executed_here {
                continue;
            }
            let exe_target = stream.exe_branch.target;
            let mispred = stream.squash_type == SquashType::Ctrl && stream.squash_pc == pc;
            if mispred {
                stats.ittage_mispred += 1;
            }
            let pred = meta.preds.get(&pc).copied().unwrap_or_default();
            let main = pred.main;
            let alt = pred.alt;

            if main.found {
                if !pred.use_alt {
                    stats.ittage_used += 1;
                }
                let main_target = main.entry.target;
                let main_taken = main.entry.ctr >= CONF_USE;
                let way = &mut self.tables[main.table][main.index];
                Self::update_counter(&mut way.ctr, exe_target == main_target);
                if way.ctr == 0 {
                    way.target = exe_target;
                }
                // Confidence-based disagreement check: an absent alt counts
                // as confident, so a confident provider leaves useful alone.
                let alt_taken = (alt.found && alt.entry.ctr >= CONF_USE) || !alt.found;
                if alt_taken != main_taken {
                    way.useful = exe_target == main_target;
                }
                if pred.use_alt && mispred && alt.found {
                    let alt_way = &mut self.tables[alt.table][alt.index];
                    Self::update_counter(&mut alt_way.ctr, false);
                    if alt_way.ctr == 0 {
                        alt_way.target = exe_target;
                    }
                }
            }

            let alt_saved_it =
                pred.use_alt && main.found && main.entry.target == exe_target;
            let need_to_allocate = mispred && !alt_saved_it;
            if !need_to_allocate {
                continue;
            }
            let start_table = if main.found { main.table + 1 } else { 0 };
            let alloc_tables = self.num_predictors - start_table;
            let useful_window =
                (meta.useful_mask >> start_table) & ((1u64 << alloc_tables) - 1);
            let free_mask = !useful_window & ((1u64 << alloc_tables) - 1);
            self.bump_reset_counter(free_mask != 0);
            self.allocate(pc, stream.start_pc, start_table, free_mask, exe_target, &meta);
        }
    }

    fn delay(&self) -> usize {
        self.delay
    }

    fn component_idx(&self) -> usize {
        self.component_idx
    }

    fn set_component_idx(&mut self, idx: usize) {
        self.component_idx = idx;
    }
}
