//! MGSC multi-class global statistical corrector.
//!
//! Six banks of perceptron tables vote on every conditional branch, each
//! keyed by a different history class: global backward, per-PC local, IMLI
//! (inner-most-loop iteration count), plain global, path, and a
//! history-free bias bank. Each matching row contributes `2*ctr + 1`; the
//! per-bank sums are scaled by learned weights and summed into `lsum`. The
//! corrector overrides the upstream TAGE direction only when `|lsum|`
//! clears a confidence-gated threshold. Training runs on disagreement or
//! low margin and additionally trains the weight of every bank whose
//! contribution was pivotal to the sign of `lsum`.

use std::collections::BTreeMap;

use tracing::trace;

use crate::config::{MgscBankConfig, MgscConfig, PipelineConfig};
use crate::history::{FoldedHistory, GlobalHistory, HistoryKind};
use crate::predictors::{BasePredictor, PredMeta};
use crate::stats::BpuStats;
use crate::stream::{BTBEntry, FetchStream, FullPrediction, TageConfInfo};

/// Number of low PC bits (above the halfword bit) checked on every row.
const TAG_MATCH_BITS: u32 = 5;
/// Default global update threshold, stored left-shifted by 3.
const UPDATE_THRESHOLD_INIT: i64 = 35 << 3;

/// One table cell: a saturating counter owned by a PC, with LRU age.
///
/// The same cell serves the perceptron tables (signed counter), the weight
/// tables (signed), and the threshold tables (unsigned); the access helpers
/// pick the saturation rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct MgscCell {
    /// Cell holds live data.
    pub valid: bool,
    /// Owning branch PC.
    pub pc: u64,
    /// Counter payload.
    pub ctr: i64,
    /// LRU age, 0 = most recent.
    pub lru: u32,
}

/// Identifies the six banks, in their fixed update order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankId {
    /// Global history bank.
    Global,
    /// Path history bank.
    Path,
    /// Global backward-history bank.
    Backward,
    /// IMLI bank.
    Imli,
    /// Per-PC local-history bank.
    Local,
    /// History-free bias bank.
    Bias,
}

/// All six banks, in update order.
pub const BANKS: [BankId; 6] = [
    BankId::Global,
    BankId::Path,
    BankId::Backward,
    BankId::Imli,
    BankId::Local,
    BankId::Bias,
];

/// Per-bank slice of one prediction, kept for the update path.
#[derive(Debug, Clone, Default)]
pub struct BankPred {
    /// Row index used in each table of the bank.
    pub indices: Vec<usize>,
    /// Raw perceptron sum of the bank.
    pub percsum: i64,
    /// Whether the bank's weight scaling was pivotal for the sign of lsum.
    pub scale_diff: bool,
}

/// One conditional branch's corrector outcome.
#[derive(Debug, Clone, Default)]
pub struct MgscPrediction {
    /// Branch PC.
    pub pc: u64,
    /// Total weighted sum.
    pub lsum: i64,
    /// The corrector overrode the TAGE direction.
    pub use_mgsc: bool,
    /// Final direction.
    pub taken: bool,
    /// TAGE's direction before correction.
    pub taken_before_sc: bool,
    /// Threshold the sum was compared against.
    pub total_thres: i64,
    /// Per-bank state, indexed like [`BANKS`].
    pub banks: [BankPred; 6],
}

/// Lookup snapshot: predictions plus every history the indices came from.
#[derive(Debug, Clone, Default)]
pub struct MgscMeta {
    /// Predictions keyed by branch PC.
    pub preds: BTreeMap<u64, MgscPrediction>,
    /// Folded global histories.
    pub g_hist: Vec<FoldedHistory>,
    /// Folded path histories.
    pub p_hist: Vec<FoldedHistory>,
    /// Folded backward histories.
    pub bw_hist: Vec<FoldedHistory>,
    /// Folded IMLI counters.
    pub i_hist: Vec<FoldedHistory>,
    /// Folded local histories, one set per local register.
    pub l_hist: Vec<Vec<FoldedHistory>>,
    /// Authoritative backward register.
    pub bw_history: GlobalHistory,
    /// Authoritative path register.
    pub path_history: GlobalHistory,
    /// Authoritative local registers.
    pub local_histories: Vec<GlobalHistory>,
}

/// One bank of perceptron tables plus its weight table.
#[derive(Debug)]
struct Bank {
    /// table -> row -> way.
    tables: Vec<Vec<Vec<MgscCell>>>,
    /// row -> way.
    weights: Vec<Vec<MgscCell>>,
    log_size: usize,
}

impl Bank {
    fn new(config: &MgscBankConfig, log_weight_size: usize, ways: usize) -> Self {
        Self {
            tables: vec![vec![vec![MgscCell::default(); ways]; 1 << config.log_size]; config.num_tables],
            weights: vec![vec![MgscCell::default(); ways]; 1 << log_weight_size],
            log_size: config.log_size,
        }
    }

    fn percsum(&self, indices: &[usize], pc: u64) -> i64 {
        let mut sum = 0;
        for (table, &index) in self.tables.iter().zip(indices) {
            for cell in &table[index] {
                if cell.valid && tag_match(pc, cell.pc) {
                    sum += 2 * cell.ctr + 1;
                    break;
                }
            }
        }
        sum
    }

    fn weight(&self, windex: usize, pc: u64) -> i64 {
        self.weights[windex]
            .iter()
            .find(|cell| cell.valid && tag_match(pc, cell.pc))
            .map_or(0, |cell| cell.ctr)
    }

    /// Trains every table toward the outcome, allocating LRU victims for
    /// missing rows.
    fn train(&mut self, indices: &[usize], pc: u64, taken: bool, ctr_width: usize) {
        for (table, &index) in self.tables.iter_mut().zip(indices) {
            let row = &mut table[index];
            match row
                .iter()
                .position(|cell| cell.valid && tag_match(pc, cell.pc))
            {
                Some(way) => {
                    update_signed(&mut row[way].ctr, ctr_width, taken);
                    touch_lru(row, way);
                }
                None => {
                    let way = lru_victim(row);
                    row[way] = MgscCell {
                        valid: true,
                        pc,
                        ctr: if taken { 0 } else { -1 },
                        lru: 0,
                    };
                }
            }
        }
    }

    /// Trains the bank weight when the bank was pivotal; allocates a
    /// zero-weight cell when the PC is absent.
    fn train_weight(
        &mut self,
        windex: usize,
        pc: u64,
        scale_diff: bool,
        percsum: i64,
        taken: bool,
        weight_width: usize,
    ) {
        let row = &mut self.weights[windex];
        match row
            .iter()
            .position(|cell| cell.valid && tag_match(pc, cell.pc))
        {
            Some(way) => {
                if scale_diff {
                    update_signed(&mut row[way].ctr, weight_width, (percsum >= 0) == taken);
                }
                touch_lru(row, way);
            }
            None => {
                let way = lru_victim(row);
                row[way] = MgscCell {
                    valid: true,
                    pc,
                    ctr: 0,
                    lru: 0,
                };
            }
        }
    }
}

fn tag_match(pc_a: u64, pc_b: u64) -> bool {
    let mask = (1u64 << TAG_MATCH_BITS) - 1;
    ((pc_a >> 1) & mask) == ((pc_b >> 1) & mask)
}

fn update_signed(ctr: &mut i64, width: usize, up: bool) {
    let max = (1i64 << (width - 1)) - 1;
    let min = -(1i64 << (width - 1));
    if up {
        if *ctr < max {
            *ctr += 1;
        }
    } else if *ctr > min {
        *ctr -= 1;
    }
}

fn update_unsigned(ctr: &mut i64, width: usize, up: bool) {
    let max = (1i64 << width) - 1;
    if up {
        if *ctr < max {
            *ctr += 1;
        }
    } else if *ctr > 0 {
        *ctr -= 1;
    }
}

fn touch_lru(row: &mut [MgscCell], way: usize) {
    for (i, cell) in row.iter_mut().enumerate() {
        if i != way && cell.valid {
            cell.lru += 1;
        }
    }
    row[way].lru = 0;
}

fn lru_victim(row: &[MgscCell]) -> usize {
    let mut victim = 0;
    let mut max_lru = 0;
    for (way, cell) in row.iter().enumerate() {
        if !cell.valid {
            return way;
        }
        if cell.lru > max_lru {
            max_lru = cell.lru;
            victim = way;
        }
    }
    victim
}

/// The statistical corrector.
#[derive(Debug)]
pub struct MgscPredictor {
    global: Bank,
    path: Bank,
    backward: Bank,
    imli: Bank,
    local: Bank,
    bias: Bank,

    g_hist: Vec<FoldedHistory>,
    p_hist: Vec<FoldedHistory>,
    bw_hist: Vec<FoldedHistory>,
    i_hist: Vec<FoldedHistory>,
    /// Folded local histories: register -> table.
    l_hist: Vec<Vec<FoldedHistory>>,

    /// Authoritative registers for the classes the driver does not own.
    bw_history: GlobalHistory,
    path_history: GlobalHistory,
    local_histories: Vec<GlobalHistory>,

    /// row -> way per-PC threshold cells.
    p_threshold: Vec<Vec<MgscCell>>,
    /// way-indexed global threshold cells.
    threshold: Vec<MgscCell>,

    counter_width: usize,
    extra_weight_width: usize,
    update_threshold_width: usize,
    p_update_threshold_width: usize,
    initial_threshold: i64,
    log_weight_size: usize,
    threshold_log_size: usize,
    bias_log_size: usize,
    num_local_histories: usize,
    block_shift: u32,
    delay: usize,

    meta: MgscMeta,
    component_idx: usize,
}

impl MgscPredictor {
    /// Builds the corrector from validated geometry.
    pub fn new(config: &MgscConfig, pipeline: &PipelineConfig) -> Self {
        let ways = config.num_ways;
        let max_shamt = pipeline.max_shamt;
        let fold = |bank: &MgscBankConfig, kind: HistoryKind| -> Vec<FoldedHistory> {
            bank.hist_lengths
                .iter()
                .map(|&len| FoldedHistory::new(kind, len, bank.log_size, max_shamt))
                .collect()
        };
        let l_hist = (0..config.num_local_histories)
            .map(|_| fold(&config.local, HistoryKind::Local))
            .collect();
        Self {
            global: Bank::new(&config.global, config.log_weight_size, ways),
            path: Bank::new(&config.path, config.log_weight_size, ways),
            backward: Bank::new(&config.backward, config.log_weight_size, ways),
            imli: Bank::new(&config.imli, config.log_weight_size, ways),
            local: Bank::new(&config.local, config.log_weight_size, ways),
            bias: Bank::new(&config.bias, config.log_weight_size, ways),
            g_hist: fold(&config.global, HistoryKind::Global),
            p_hist: fold(&config.path, HistoryKind::Path),
            bw_hist: fold(&config.backward, HistoryKind::GlobalBackward),
            i_hist: fold(&config.imli, HistoryKind::Imli),
            l_hist,
            bw_history: GlobalHistory::new(pipeline.history_bits),
            path_history: GlobalHistory::new(pipeline.history_bits),
            local_histories: vec![
                GlobalHistory::new(pipeline.history_bits);
                config.num_local_histories
            ],
            p_threshold: vec![vec![MgscCell::default(); ways]; 1 << config.threshold_log_size],
            threshold: vec![MgscCell::default(); ways],
            counter_width: config.counter_width,
            extra_weight_width: config.extra_weight_width,
            update_threshold_width: config.update_threshold_width,
            p_update_threshold_width: config.p_update_threshold_width,
            initial_threshold: i64::from(config.initial_threshold),
            log_weight_size: config.log_weight_size,
            threshold_log_size: config.threshold_log_size,
            bias_log_size: config.bias.log_size,
            num_local_histories: config.num_local_histories,
            block_shift: pipeline.block_size.trailing_zeros(),
            delay: config.num_delay_stages,
            meta: MgscMeta::default(),
            component_idx: 0,
        }
    }

    fn pc_index(&self, pc: u64, bits: usize) -> usize {
        ((pc >> self.block_shift) & ((1u64 << bits) - 1)) as usize
    }

    fn hist_index(&self, pc: u64, bits: usize, folded: &FoldedHistory) -> usize {
        (((pc >> self.block_shift) ^ folded.get()) & ((1u64 << bits) - 1)) as usize
    }

    fn bias_index(&self, pc: u64, lowbit0: bool, lowbit1: bool) -> usize {
        let base = (pc >> self.block_shift) & ((1u64 << (self.bias_log_size - 2)) - 1);
        ((base << 2) | (u64::from(lowbit1) << 1) | u64::from(lowbit0)) as usize
    }

    fn local_slot(&self, pc: u64) -> usize {
        self.pc_index(pc, self.num_local_histories.trailing_zeros() as usize)
    }

    const fn scale(weight: i64, percsum: i64) -> i64 {
        // weight in [-32, 31]; the factor (weight + 32) / 32 is in [0, 2).
        (weight + 32) * percsum / 32
    }

    const fn scale_diff(lsum: i64, scaled: i64, percsum: i64) -> bool {
        // The weight is pivotal if removing the bank's contribution and
        // doubling it land on different sides of zero.
        ((lsum - scaled) >= 0) != ((lsum - scaled + 2 * percsum) >= 0)
    }

    fn find_threshold(&self, windex: usize, pc: u64) -> (i64, i64) {
        let p_thres = self.p_threshold[windex]
            .iter()
            .find(|cell| cell.valid && tag_match(pc, cell.pc))
            .map_or(self.initial_threshold, |cell| cell.ctr);
        let thres = self
            .threshold
            .iter()
            .find(|cell| cell.valid && tag_match(pc, cell.pc))
            .map_or(UPDATE_THRESHOLD_INIT, |cell| cell.ctr);
        (p_thres, thres)
    }

    /// Corrector verdict for one conditional BTB entry.
    fn predict_one(&self, entry: &BTBEntry, start_pc: u64, tage: &TageConfInfo) -> MgscPrediction {
        let pc = entry.branch.pc;

        let g_idx: Vec<usize> = self
            .g_hist
            .iter()
            .map(|fh| self.hist_index(start_pc, self.global.log_size, fh))
            .collect();
        let p_idx: Vec<usize> = self
            .p_hist
            .iter()
            .map(|fh| self.hist_index(start_pc, self.path.log_size, fh))
            .collect();
        let bw_idx: Vec<usize> = self
            .bw_hist
            .iter()
            .map(|fh| self.hist_index(start_pc, self.backward.log_size, fh))
            .collect();
        let i_idx: Vec<usize> = self
            .i_hist
            .iter()
            .map(|fh| self.hist_index(start_pc, self.imli.log_size, fh))
            .collect();
        let slot = self.local_slot(start_pc);
        let l_idx: Vec<usize> = self.l_hist[slot]
            .iter()
            .map(|fh| self.hist_index(start_pc, self.local.log_size, fh))
            .collect();
        let bias_idx = vec![self.bias_index(start_pc, tage.taken, tage.conf_low && tage.alt_diff)];

        let windex = self.pc_index(start_pc, self.log_weight_size);
        let mut bank_preds: [BankPred; 6] = Default::default();
        let mut lsum = 0;
        for (slot_id, (bank, indices)) in [
            (&self.global, g_idx),
            (&self.path, p_idx),
            (&self.backward, bw_idx),
            (&self.imli, i_idx),
            (&self.local, l_idx),
            (&self.bias, bias_idx),
        ]
        .into_iter()
        .enumerate()
        {
            let percsum = bank.percsum(&indices, pc);
            let weight = bank.weight(windex, pc);
            lsum += Self::scale(weight, percsum);
            bank_preds[slot_id] = BankPred {
                indices,
                percsum,
                scale_diff: false,
            };
        }

        let (p_thres, thres) = self.find_threshold(
            self.pc_index(start_pc, self.threshold_log_size),
            pc,
        );
        let total_thres = (thres >> 3) + p_thres;

        let use_mgsc = if tage.conf_high {
            lsum.abs() > total_thres / 2
        } else if tage.conf_mid {
            lsum.abs() > total_thres / 4
        } else if tage.conf_low {
            lsum.abs() > total_thres / 8
        } else {
            false
        };
        let taken = if use_mgsc { lsum >= 0 } else { tage.taken };

        // Mark pivotal banks for the weight-training decision at update.
        for (slot_id, bank) in [
            &self.global,
            &self.path,
            &self.backward,
            &self.imli,
            &self.local,
            &self.bias,
        ]
        .into_iter()
        .enumerate()
        {
            let percsum = bank_preds[slot_id].percsum;
            let scaled = Self::scale(bank.weight(windex, pc), percsum);
            bank_preds[slot_id].scale_diff = Self::scale_diff(lsum, scaled, percsum);
        }

        trace!(target: "mgsc", "predict {pc:#x}: lsum {lsum}, thres {total_thres}, used {use_mgsc}, taken {taken}");
        MgscPrediction {
            pc,
            lsum,
            use_mgsc,
            taken,
            taken_before_sc: tage.taken,
            total_thres,
            banks: bank_preds,
        }
    }

    /// Corrector pass over a stage's conditional entries. Leaves entries
    /// without TAGE info untouched.
    fn lookup_block(
        &mut self,
        start_pc: u64,
        btb_entries: &[BTBEntry],
        tage_conf: &BTreeMap<u64, TageConfInfo>,
        cond_takens: &mut BTreeMap<u64, bool>,
    ) {
        self.meta.preds.clear();
        self.meta.g_hist = self.g_hist.clone();
        self.meta.p_hist = self.p_hist.clone();
        self.meta.bw_hist = self.bw_hist.clone();
        self.meta.i_hist = self.i_hist.clone();
        self.meta.l_hist = self.l_hist.clone();
        self.meta.bw_history = self.bw_history.clone();
        self.meta.path_history = self.path_history.clone();
        self.meta.local_histories = self.local_histories.clone();

        for entry in btb_entries {
            if !(entry.valid && entry.branch.is_cond) {
                continue;
            }
            let Some(tage) = tage_conf.get(&entry.branch.pc) else {
                continue;
            };
            let pred = self.predict_one(entry, start_pc, tage);
            let _ = cond_takens.insert(entry.branch.pc, pred.taken || entry.always_taken);
            let _ = self.meta.preds.insert(entry.branch.pc, pred);
        }
    }

    /// Applies the ordered speculative update of all five history classes.
    fn spec_update_all(&mut self, history: &GlobalHistory, pred: &FullPrediction) {
        // Global.
        let (shamt, taken) = pred.hist_info();
        if shamt != 0 {
            for fh in &mut self.g_hist {
                fh.update(history, shamt, taken, 0);
            }
        }

        // Path.
        let (path_pc, path_taken) = pred.path_hist_info();
        for fh in &mut self.p_hist {
            fh.update(&self.path_history, 1, path_taken, path_pc);
        }
        if path_taken {
            shift_path(&mut self.path_history, path_pc);
        }

        // Backward.
        let (bw_shamt, bw_taken) = pred.bw_hist_info();
        if bw_shamt != 0 {
            for fh in &mut self.bw_hist {
                fh.update(&self.bw_history, bw_shamt, bw_taken, 0);
            }
            self.bw_history.shift_in(bw_shamt, bw_taken);
        }

        // IMLI.
        if bw_shamt != 0 {
            for fh in &mut self.i_hist {
                fh.update(&self.bw_history, bw_shamt, bw_taken, 0);
            }
        }

        // Local.
        if shamt != 0 {
            let slot = self.local_slot(pred.bb_start);
            for fh in &mut self.l_hist[slot] {
                fh.update(&self.local_histories[slot], shamt, taken, 0);
            }
            self.local_histories[slot].shift_in(shamt, taken);
        }
    }

    /// Trains tables, weights, and thresholds for one resolved branch.
    fn update_one(
        &mut self,
        entry: &BTBEntry,
        actual_taken: bool,
        pred: &MgscPrediction,
        start_pc: u64,
        stats: &mut BpuStats,
    ) {
        let pc = entry.branch.pc;
        let sc_taken = pred.lsum >= 0;
        let tage_taken = pred.taken_before_sc;

        if pred.use_mgsc {
            stats.mgsc_used += 1;
            if sc_taken == actual_taken && tage_taken != actual_taken {
                stats.mgsc_correct_tage_wrong += 1;
            } else if sc_taken != actual_taken && tage_taken == actual_taken {
                stats.mgsc_wrong_tage_correct += 1;
            }
        }

        if sc_taken == actual_taken && pred.lsum.abs() >= pred.total_thres {
            return;
        }

        let windex = self.pc_index(start_pc, self.log_weight_size);
        let counter_width = self.counter_width;
        let weight_width = self.extra_weight_width;
        for (slot_id, bank) in [
            &mut self.global,
            &mut self.path,
            &mut self.backward,
            &mut self.imli,
            &mut self.local,
            &mut self.bias,
        ]
        .into_iter()
        .enumerate()
        {
            let bank_pred = &pred.banks[slot_id];
            bank.train(&bank_pred.indices, pc, actual_taken, counter_width);
            bank.train_weight(
                windex,
                pc,
                bank_pred.scale_diff,
                bank_pred.percsum,
                actual_taken,
                weight_width,
            );
        }

        // Thresholds train on TAGE/SC disagreement.
        let disagree = tage_taken != sc_taken;
        let toward = sc_taken != actual_taken;
        match self
            .threshold
            .iter()
            .position(|cell| cell.valid && tag_match(pc, cell.pc))
        {
            Some(way) => {
                if disagree {
                    update_unsigned(&mut self.threshold[way].ctr, self.update_threshold_width, toward);
                }
                touch_lru(&mut self.threshold, way);
            }
            None => {
                let way = lru_victim(&self.threshold);
                self.threshold[way] = MgscCell {
                    valid: true,
                    pc,
                    ctr: UPDATE_THRESHOLD_INIT,
                    lru: 0,
                };
            }
        }
        let tindex = self.pc_index(start_pc, self.threshold_log_size);
        let row = &mut self.p_threshold[tindex];
        match row
            .iter()
            .position(|cell| cell.valid && tag_match(pc, cell.pc))
        {
            Some(way) => {
                if disagree {
                    update_unsigned(&mut row[way].ctr, self.p_update_threshold_width, toward);
                }
                touch_lru(row, way);
            }
            None => {
                let way = lru_victim(row);
                row[way] = MgscCell {
                    valid: true,
                    pc,
                    ctr: self.initial_threshold,
                    lru: 0,
                };
            }
        }
    }
}

/// Shifts two PC-hash bits into a path history register.
fn shift_path(history: &mut GlobalHistory, pc: u64) {
    let hash = (pc >> 1) ^ (pc >> 3) ^ (pc >> 5) ^ (pc >> 7);
    history.shift_left(2);
    history.set_bit(0, hash & 1 == 1);
    history.set_bit(1, hash & 2 == 2);
}

impl BasePredictor for MgscPredictor {
    /// Runs the corrector over every stage at or past its delay, replacing
    /// the TAGE directions it decides to override.
    fn put_pc_history(
        &mut self,
        start_pc: u64,
        _history: &GlobalHistory,
        stage_preds: &mut [FullPrediction],
    ) {
        for s in self.delay..stage_preds.len() {
            let entries = stage_preds[s].btb_entries.clone();
            let conf = stage_preds[s].tage_conf.clone();
            let mut cond_takens = stage_preds[s].cond_takens.clone();
            self.lookup_block(start_pc, &entries, &conf, &mut cond_takens);
            stage_preds[s].cond_takens = cond_takens;
        }
    }

    fn prediction_meta(&self) -> PredMeta {
        PredMeta::Mgsc(self.meta.clone())
    }

    fn spec_update_hist(&mut self, history: &GlobalHistory, pred: &FullPrediction) {
        self.spec_update_all(history, pred);
    }

    /// Restores every history class from the snapshot, then replays the
    /// resolved outcome in the fixed order global, path, backward, IMLI,
    /// local.
    fn recover_hist(
        &mut self,
        history: &GlobalHistory,
        stream: &FetchStream,
        shamt: usize,
        cond_taken: bool,
    ) {
        let PredMeta::Mgsc(meta) = &stream.pred_metas[self.component_idx] else {
            return;
        };
        for (live, snap) in self.g_hist.iter_mut().zip(&meta.g_hist) {
            live.recover(snap);
        }
        for (live, snap) in self.p_hist.iter_mut().zip(&meta.p_hist) {
            live.recover(snap);
        }
        for (live, snap) in self.bw_hist.iter_mut().zip(&meta.bw_hist) {
            live.recover(snap);
        }
        for (live, snap) in self.i_hist.iter_mut().zip(&meta.i_hist) {
            live.recover(snap);
        }
        for (live_set, snap_set) in self.l_hist.iter_mut().zip(&meta.l_hist) {
            for (live, snap) in live_set.iter_mut().zip(snap_set) {
                live.recover(snap);
            }
        }
        self.bw_history = meta.bw_history.clone();
        self.path_history = meta.path_history.clone();
        self.local_histories = meta.local_histories.clone();

        // Replay the resolved branch over the restored state.

        // Global.
        if shamt != 0 {
            for fh in &mut self.g_hist {
                fh.update(history, shamt, cond_taken, 0);
            }
        }

        // Path.
        let control_pc = stream.control_pc();
        for fh in &mut self.p_hist {
            fh.update(&self.path_history, 1, cond_taken, control_pc);
        }
        if cond_taken {
            shift_path(&mut self.path_history, control_pc);
        }

        // Backward.
        let branch = stream.exe_branch;
        let (bw_shamt, bw_taken) = stream.bw_hist_info_for_squash(
            stream.squash_pc,
            branch.is_cond,
            stream.exe_taken,
            branch.target,
        );
        if bw_shamt != 0 {
            for fh in &mut self.bw_hist {
                fh.update(&self.bw_history, bw_shamt, bw_taken, 0);
            }
            self.bw_history.shift_in(bw_shamt, bw_taken);
        }

        // IMLI.
        if bw_shamt != 0 {
            for fh in &mut self.i_hist {
                fh.update(&self.bw_history, bw_shamt, bw_taken, 0);
            }
        }

        // Local.
        if shamt != 0 {
            let slot = self.local_slot(stream.start_pc);
            for fh in &mut self.l_hist[slot] {
                fh.update(&self.local_histories[slot], shamt, cond_taken, 0);
            }
            self.local_histories[slot].shift_in(shamt, cond_taken);
        }
    }

    /// Trains on every executed conditional entry of a committed stream.
    fn update(&mut self, stream: &FetchStream, stats: &mut BpuStats) {
        let PredMeta::Mgsc(meta) = stream.pred_metas[self.component_idx].clone() else {
            return;
        };
        let mut entries: Vec<_> = stream
            .update_entries
            .iter()
            .filter(|e| e.branch.is_cond && !e.always_taken)
            .copied()
            .collect();
        if !stream.update_is_old_entry
            && stream.update_new_entry.valid
            && stream.update_new_entry.branch.is_cond
            && !stream.update_new_entry.always_taken
        {
            entries.push(stream.update_new_entry);
        }
        for entry in &entries {
            let actual_taken =
                stream.exe_taken && stream.exe_branch.same_branch(&entry.branch);
            if let Some(pred) = meta.preds.get(&entry.branch.pc) {
                self.update_one(entry, actual_taken, &pred.clone(), stream.start_pc, stats);
            }
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
