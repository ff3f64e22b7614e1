//! TAGE conditional-direction predictor.
//!
//! Multiple tagged tables indexed with geometrically increasing folded
//! history lengths. For each conditional BTB entry the longest-history
//! matching row is the main provider and the next the alternate; the
//! alternate (or the BTB's own counter when none exists) takes over when
//! the provider is absent or weak. Misprediction drives randomized
//! allocation into longer-history tables, throttled by per-row useful bits
//! and a global useful-reset counter.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::config::{PipelineConfig, TageConfig};
use crate::history::{FoldedHistory, GlobalHistory, HistoryKind};
use crate::predictors::{BasePredictor, PredMeta};
use crate::stats::BpuStats;
use crate::stream::{FetchStream, FullPrediction, Lfsr64, SquashType, TageConfInfo};

/// Saturation point of the useful-reset counter.
const USEFUL_RESET_LIMIT: i32 = 128;

/// One row of a tagged table.
#[derive(Debug, Clone, Copy, Default)]
pub struct TageEntry {
    /// Row holds live data.
    pub valid: bool,
    /// History tag.
    pub tag: u64,
    /// Signed 3-bit direction counter.
    pub ctr: i8,
    /// Protects the row from allocation while set.
    pub useful: bool,
    /// PC of the branch the row was allocated for.
    pub pc: u64,
}

impl TageEntry {
    const fn taken(&self) -> bool {
        self.ctr >= 0
    }
}

/// Where a lookup found a row: table, index, and the row itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableHit {
    /// A matching row was found.
    pub found: bool,
    /// The matching row at lookup time.
    pub entry: TageEntry,
    /// Table index of the hit.
    pub table: usize,
    /// Row index of the hit.
    pub index: usize,
}

impl TableHit {
    const fn taken(&self) -> bool {
        self.entry.taken()
    }
}

/// Per-branch prediction recorded for the update path.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagePrediction {
    /// Branch PC.
    pub pc: u64,
    /// Longest-history hit.
    pub main: TableHit,
    /// Second-longest hit.
    pub alt: TableHit,
    /// The alternate (or base) prediction was used.
    pub use_alt: bool,
    /// Final predicted direction.
    pub taken: bool,
}

/// Lookup snapshot: per-branch provider info, per-table useful bits, and
/// the folded histories the indices were computed from.
#[derive(Debug, Clone, Default)]
pub struct TageMeta {
    /// Predictions keyed by branch PC.
    pub preds: BTreeMap<u64, TagePrediction>,
    /// Useful bit of each table's indexed row, bit t = table t.
    pub useful_mask: u64,
    /// Folded index histories at lookup.
    pub index_hist: Vec<FoldedHistory>,
    /// Folded tag histories at lookup.
    pub tag_hist: Vec<FoldedHistory>,
    /// Folded alternate-tag histories at lookup.
    pub alt_tag_hist: Vec<FoldedHistory>,
}

/// The TAGE predictor.
#[derive(Debug)]
pub struct TagePredictor {
    tables: Vec<Vec<TageEntry>>,
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

    meta: TageMeta,
    component_idx: usize,
}

impl TagePredictor {
    /// Builds the predictor from validated geometry.
    pub fn new(config: &TageConfig, pipeline: &PipelineConfig) -> Self {
        let mut tables = Vec::with_capacity(config.num_predictors);
        let mut index_bits = Vec::with_capacity(config.num_predictors);
        let mut index_hist = Vec::new();
        let mut tag_hist = Vec::new();
        let mut alt_tag_hist = Vec::new();
        for t in 0..config.num_predictors {
            tables.push(vec![TageEntry::default(); config.table_sizes[t]]);
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
            meta: TageMeta::default(),
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

    /// TAGE confidence classes handed to the statistical corrector, derived
    /// from the provider counter: saturated, weak, or in between.
    fn conf_info(pred: &TagePrediction) -> TageConfInfo {
        let (high, mid, low) = if pred.main.found {
            let c = pred.main.entry.ctr;
            match c {
                3 | -4 => (true, false, false),
                0 | -1 => (false, false, true),
                _ => (false, true, false),
            }
        } else {
            (false, false, true)
        };
        let alt_diff = pred.main.found && pred.alt.found && pred.main.taken() != pred.alt.taken();
        TageConfInfo {
            taken: pred.taken,
            conf_high: high,
            conf_mid: mid,
            conf_low: low,
            alt_diff,
        }
    }

    /// Reads all tables once for the block, then resolves a direction per
    /// conditional BTB entry, recording provider info in the meta.
    fn lookup_block(
        &mut self,
        start_pc: u64,
        btb_entries: &[crate::stream::BTBEntry],
    ) -> (BTreeMap<u64, bool>, BTreeMap<u64, TageConfInfo>) {
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

        let mut cond_takens = BTreeMap::new();
        let mut conf = BTreeMap::new();
        for btb_entry in btb_entries {
            if !(btb_entry.valid && btb_entry.branch.is_cond) {
                continue;
            }
            let pc = btb_entry.branch.pc;
            let mut main = TableHit::default();
            let mut alt = TableHit::default();
            for t in (0..self.num_predictors).rev() {
                let (entry, index, tag) = rows[t];
                let matched = entry.valid && entry.tag == tag && entry.pc == pc;
                if matched {
                    let hit = TableHit {
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

            let base_taken = btb_entry.ctr >= 0;
            let alt_pred = if alt.found { alt.taken() } else { base_taken };
            let main_weak = main.entry.ctr == 0 || main.entry.ctr == -1;
            let use_alt = !main.found || main_weak;
            let taken = if use_alt { alt_pred } else { main.taken() };
            trace!(target: "tage", "predict {pc:#x}: main t{} found {}, use_alt {}, taken {}",
                main.table, main.found, use_alt, taken);

            let pred = TagePrediction {
                pc,
                main,
                alt,
                use_alt,
                taken,
            };
            let _ = self.meta.preds.insert(pc, pred);
            let _ = cond_takens.insert(pc, taken || btb_entry.always_taken);
            let _ = conf.insert(pc, Self::conf_info(&pred));
        }
        (cond_takens, conf)
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

    fn update_counter(counter: &mut i8, taken: bool) {
        if taken {
            if *counter < 3 {
                *counter += 1;
            }
        } else if *counter > -4 {
            *counter -= 1;
        }
    }

    /// Wipes every useful bit when the reset counter saturates.
    fn bump_reset_counter(&mut self, can_allocate: i32, cannot_allocate: i32, stats: &mut BpuStats) {
        let delta = (can_allocate - cannot_allocate).abs();
        if cannot_allocate > can_allocate {
            self.useful_reset_cnt = (self.useful_reset_cnt + delta).min(USEFUL_RESET_LIMIT);
        } else if can_allocate > cannot_allocate {
            self.useful_reset_cnt = (self.useful_reset_cnt - delta).max(0);
        }
        if self.useful_reset_cnt == USEFUL_RESET_LIMIT {
            debug!(target: "tage", "useful-reset counter saturated, clearing all useful bits");
            stats.tage_reset_useful += 1;
            for table in &mut self.tables {
                for entry in table {
                    entry.useful = false;
                }
            }
            self.useful_reset_cnt = 0;
        }
    }

    /// Installs one new row above the provider, randomizing the choice of
    /// eligible tables through the allocation LFSR.
    fn allocate(
        &mut self,
        pc: u64,
        start_pc: u64,
        start_table: usize,
        free_mask: u64,
        taken: bool,
        meta: &TageMeta,
        stats: &mut BpuStats,
    ) {
        let alloc_tables = self.num_predictors - start_table;
        if free_mask == 0 {
            stats.tage_alloc_failure += 1;
            return;
        }
        stats.tage_alloc_success += 1;
        let lfsr_mask = self.alloc_lfsr.get() % (1u64 << alloc_tables);
        let masked = lfsr_mask & free_mask;
        let allocate = if masked != 0 { masked } else { free_mask };
        for t in start_table..self.num_predictors {
            if allocate & (1 << (t - start_table)) == 0 {
                continue;
            }
            let index = self.index_of(start_pc, t, &meta.index_hist[t]);
            let tag = self.tag_of(start_pc, t, &meta.tag_hist[t], &meta.alt_tag_hist[t]);
            trace!(target: "tage", "allocating table {t} index {index} for pc {pc:#x}");
            self.tables[t][index] = TageEntry {
                valid: true,
                tag,
                ctr: if taken { 0 } else { -1 },
                useful: false,
                pc,
            };
            break;
        }
    }

    /// Debug invariant: within the last lookup no table matched the same
    /// PC+tag in more than one conceptual way (rows are direct-mapped, so
    /// this verifies the meta recorded at most one hit per table).
    pub fn check_no_double_hit(&self) -> bool {
        self.meta.preds.values().all(|p| {
            !(p.main.found && p.alt.found) || p.main.table != p.alt.table
        })
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

impl BasePredictor for TagePredictor {
    /// Resolves a direction for every conditional entry of each stage at or
    /// past this predictor's delay. BTB entries must already be in place.
    fn put_pc_history(
        &mut self,
        start_pc: u64,
        _history: &GlobalHistory,
        stage_preds: &mut [FullPrediction],
    ) {
        for s in self.delay..stage_preds.len() {
            let entries = stage_preds[s].btb_entries.clone();
            let (cond_takens, conf) = self.lookup_block(start_pc, &entries);
            stage_preds[s].cond_takens = cond_takens;
            stage_preds[s].tage_conf = conf;
        }
    }

    fn prediction_meta(&self) -> PredMeta {
        PredMeta::Tage(self.meta.clone())
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
        let PredMeta::Tage(meta) = &stream.pred_metas[self.component_idx] else {
            return;
        };
        for t in 0..self.num_predictors {
            self.index_hist[t].recover(&meta.index_hist[t]);
            self.tag_hist[t].recover(&meta.tag_hist[t]);
            self.alt_tag_hist[t].recover(&meta.alt_tag_hist[t]);
        }
        self.do_update_hist(history, shamt, cond_taken);
    }

    /// Trains providers, manages useful bits, and allocates on
    /// misprediction, all against the folded histories snapshotted at
    /// prediction time.
    fn update(&mut self, stream: &FetchStream, stats: &mut BpuStats) {
        let PredMeta::Tage(meta) = stream.pred_metas[self.component_idx].clone() else {
            return;
        };

        // Conditional, not-always-taken branches that actually executed.
        let mut entries: Vec<_> = stream
            .update_entries
            .iter()
            .filter(|e| e.branch.is_cond && !e.always_taken)
            .copied()
            .collect();
        if !stream.update_is_old_entry
            && stream.update_new_entry.branch.is_cond
            && !stream.update_new_entry.always_taken
        {
            entries.push(stream.update_new_entry);
        }

        for btb_entry in &entries {
            let pc = btb_entry.branch.pc;
            let actual_taken =
                stream.exe_taken && stream.exe_branch.same_branch(&btb_entry.branch);
            let pred = meta.preds.get(&pc).copied().unwrap_or_default();
            let main = pred.main;
            let alt = pred.alt;
            let main_taken = main.entry.taken();
            let base_as_alt = !alt.found;
            let alt_taken = if base_as_alt {
                btb_entry.ctr >= 0
            } else {
                alt.taken()
            };
            let alt_diff = main_taken != alt_taken;

            if main.found {
                stats.tage_provided += 1;
                let way = &mut self.tables[main.table][main.index];
                if alt_diff {
                    way.useful = actual_taken == main_taken;
                }
                Self::update_counter(&mut way.ctr, actual_taken);
            } else {
                stats.tage_use_base += 1;
            }
            if pred.use_alt && !base_as_alt {
                stats.tage_use_alt += 1;
                let way = &mut self.tables[alt.table][alt.index];
                Self::update_counter(&mut way.ctr, actual_taken);
            }

            let mispred =
                stream.squash_type == SquashType::Ctrl && stream.squash_pc == pc;
            let alt_saved_it = pred.use_alt && main.found && main_taken == actual_taken;
            let need_to_allocate = mispred && !alt_saved_it;
            if !need_to_allocate {
                continue;
            }

            // Eligible tables sit above the provider; a clear useful bit
            // makes a table allocatable.
            let start_table = if main.found { main.table + 1 } else { 0 };
            let alloc_tables = self.num_predictors - start_table;
            let useful_window =
                (meta.useful_mask >> start_table) & ((1u64 << alloc_tables) - 1);
            let free_mask = !useful_window & ((1u64 << alloc_tables) - 1);
            let can_allocate = free_mask.count_ones() as i32;
            let cannot_allocate = alloc_tables as i32 - can_allocate;
            self.bump_reset_counter(can_allocate, cannot_allocate, stats);
            self.allocate(
                pc,
                stream.start_pc,
                start_table,
                free_mask,
                actual_taken,
                &meta,
                stats,
            );
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
