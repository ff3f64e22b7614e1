//! XOR-folded history compression.
//!
//! Table-indexed predictors cannot afford to hash hundreds of history bits
//! per lookup, so each table keeps a folded view of its history window:
//! `folded[k] = XOR of ghr[k + j * F]` over the most recent `H` bits. The
//! folded form is maintained incrementally — on every shift the bits leaving
//! the `H`-bit window are XOR-ed back out — so it always equals the naive
//! fold of the authoritative register.

use super::GlobalHistory;

/// Folding semantics for the different history classes the corrector keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryKind {
    /// Plain global taken/not-taken history.
    #[default]
    Global,
    /// Global history of backward-taken bits.
    GlobalBackward,
    /// Per-PC local taken/not-taken history.
    Local,
    /// Inner-most-loop iteration counter; the folded word is the counter.
    Imli,
    /// Path history: two PC-hash bits shifted in per taken branch.
    Path,
}

/// A compressed view of a `hist_len`-bit history register in `folded_len`
/// bits, updated incrementally in lock-step with the register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldedHistory {
    kind: HistoryKind,
    hist_len: usize,
    folded_len: usize,
    max_shamt: usize,
    folded: u64,
}

impl FoldedHistory {
    /// Creates an all-zero folded view.
    ///
    /// `max_shamt` bounds the per-update shift amount (the maximum number of
    /// branches resolved by one fetch block).
    pub fn new(kind: HistoryKind, hist_len: usize, folded_len: usize, max_shamt: usize) -> Self {
        debug_assert!(folded_len > 0 && folded_len < 64);
        debug_assert!(kind != HistoryKind::Imli || folded_len >= hist_len);
        Self {
            kind,
            hist_len,
            folded_len,
            max_shamt,
            folded: 0,
        }
    }

    /// The current folded word, masked to `folded_len` bits.
    pub const fn get(&self) -> u64 {
        self.folded
    }

    /// Length of the history window this view compresses.
    pub const fn hist_len(&self) -> usize {
        self.hist_len
    }

    /// Width of the folded word.
    pub const fn folded_len(&self) -> usize {
        self.folded_len
    }

    /// Shifts the folded view by `shamt` places with outcome `taken`.
    ///
    /// `ghr` must be the authoritative register *before* the corresponding
    /// shift is applied to it; its top window bits are the ones leaving the
    /// fold. `pc` is only consulted by the [`HistoryKind::Path`] variant.
    /// Consecutive updates compose associatively, so replaying a recorded
    /// `(shamt, taken)` sequence is deterministic.
    pub fn update(&mut self, ghr: &GlobalHistory, shamt: usize, taken: bool, pc: u64) {
        debug_assert!(shamt <= self.max_shamt);
        match self.kind {
            HistoryKind::Global | HistoryKind::GlobalBackward | HistoryKind::Local => {
                self.update_shift(ghr, shamt, taken);
            }
            HistoryKind::Imli => self.update_imli(shamt, taken),
            HistoryKind::Path => self.update_path(ghr, taken, pc),
        }
    }

    /// Restores this view from a snapshot taken at prediction time.
    pub fn recover(&mut self, other: &Self) {
        debug_assert_eq!(self.kind, other.kind);
        debug_assert_eq!(self.hist_len, other.hist_len);
        debug_assert_eq!(self.folded_len, other.folded_len);
        debug_assert_eq!(self.max_shamt, other.max_shamt);
        self.folded = other.folded;
    }

    /// Debug check: the folded word equals the naive XOR-fold of `ghr`.
    ///
    /// Only meaningful for the plain shifting kinds; the counter and path
    /// variants are their own authority.
    pub fn check(&self, ghr: &GlobalHistory) -> bool {
        match self.kind {
            HistoryKind::Global | HistoryKind::GlobalBackward | HistoryKind::Local => {
                ghr.fold(self.hist_len, self.folded_len) == self.folded
            }
            HistoryKind::Imli | HistoryKind::Path => true,
        }
    }

    fn mask(&self) -> u64 {
        (1u64 << self.folded_len) - 1
    }

    /// Standard folded shift: reintroduce the bits leaving the window, shift,
    /// wrap the carried-out bits back to the bottom, then XOR in the outcome.
    fn update_shift(&mut self, ghr: &GlobalHistory, shamt: usize, taken: bool) {
        if shamt == 0 {
            return;
        }
        if self.folded_len >= self.hist_len {
            // No wrap-around: the window fits the folded word directly.
            let hist_mask = (1u64 << self.hist_len) - 1;
            self.folded = (self.folded << shamt) & hist_mask;
            self.folded = (self.folded & !1) | u64::from(taken);
            return;
        }
        let mut tmp = self.folded;
        for i in 0..shamt {
            let ghr_pos = self.hist_len - 1 - i;
            let fold_pos = ghr_pos % self.folded_len;
            if ghr.bit(ghr_pos) {
                tmp ^= 1 << fold_pos;
            }
        }
        // Shift within a folded_len + shamt wide temporary, then move the
        // carried-out high bits back into the low positions.
        tmp <<= shamt;
        let wide_mask = (1u64 << (self.folded_len + shamt)) - 1;
        tmp &= wide_mask;
        for i in 0..shamt {
            let carried = (tmp >> (self.folded_len + i)) & 1;
            tmp = (tmp & !(1 << i)) | (carried << i);
        }
        tmp ^= u64::from(taken);
        self.folded = tmp & self.mask();
    }

    /// IMLI counting: consecutive taken backward branches increment, any
    /// other outcome restarts or clears the counter.
    fn update_imli(&mut self, shamt: usize, taken: bool) {
        let max = (1u64 << self.hist_len) - 1;
        self.folded = if taken && shamt == 1 && self.folded < max {
            self.folded + 1
        } else if taken && shamt > 1 {
            1
        } else if taken {
            self.folded
        } else {
            0
        };
        self.folded &= self.mask();
    }

    /// Path folding: on a taken branch, shift in two bits of a PC hash.
    fn update_path(&mut self, ghr: &GlobalHistory, taken: bool, pc: u64) {
        if !taken {
            return;
        }
        let hash = (pc >> 1) ^ (pc >> 3) ^ (pc >> 5) ^ (pc >> 7);
        if self.folded_len >= self.hist_len {
            let hist_mask = (1u64 << self.hist_len) - 1;
            self.folded = (self.folded << 2) & hist_mask;
            self.folded |= hash & 0b11;
        } else {
            // Two single-bit folded shifts, high hash bit first.
            self.single_wrap_shift(ghr, (hash >> 1) & 1 == 1);
            self.single_wrap_shift(ghr, hash & 1 == 1);
        }
        self.folded &= self.mask();
    }

    fn single_wrap_shift(&mut self, ghr: &GlobalHistory, in_bit: bool) {
        let mut tmp = self.folded;
        let ghr_pos = self.hist_len - 1;
        let fold_pos = ghr_pos % self.folded_len;
        if ghr.bit(ghr_pos) {
            tmp ^= 1 << fold_pos;
        }
        tmp <<= 1;
        let carried = (tmp >> self.folded_len) & 1;
        tmp = (tmp & !1) | carried;
        tmp ^= u64::from(in_bit);
        self.folded = tmp & self.mask();
    }
}
