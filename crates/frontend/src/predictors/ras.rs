//! Two-level return address stack.
//!
//! A committed ring (`nsp`) mirrors architectural call depth, while a
//! speculative inflight ring absorbs predicted calls and returns without
//! touching committed state. Inflight entries are linked through `nos`
//! pointers so a speculative pop simply follows the link; `TOSW`/`TOSR`
//! bound the live window and `BOS` trails it as calls commit. Identical
//! consecutive return addresses are compressed with a small counter to
//! survive deep recursion.

use tracing::trace;

use crate::config::RasConfig;
use crate::history::GlobalHistory;
use crate::predictors::{BasePredictor, PredMeta};
use crate::stats::BpuStats;
use crate::stream::{FetchStream, FullPrediction};

/// Payload of one RAS slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasEssential {
    /// Predicted return address.
    pub ret_addr: u64,
    /// Recursion-compression counter.
    pub ctr: u32,
}

/// One speculative ring slot: payload plus the link to the previous top.
#[derive(Debug, Clone, Copy, Default)]
struct InflightEntry {
    data: RasEssential,
    /// Index of the top-of-stack entry below this one.
    nos: usize,
}

/// Pointer snapshot taken at every prediction, used for squash rewind.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasMeta {
    /// Speculative stack pointer.
    pub ssp: usize,
    /// Speculative compression counter.
    pub sctr: u32,
    /// Inflight read pointer.
    pub tosr: usize,
    /// Inflight write pointer.
    pub tosw: usize,
    /// Return target exposed for this prediction.
    pub target: u64,
}

/// The two-level return address stack.
#[derive(Debug)]
pub struct ReturnAddressStack {
    stack: Vec<RasEssential>,
    inflight: Vec<InflightEntry>,
    num_entries: usize,
    num_inflight: usize,
    max_ctr: u32,

    /// Committed stack pointer.
    nsp: usize,
    /// Speculative stack pointer.
    ssp: usize,
    /// Speculative compression counter.
    sctr: u32,
    /// Inflight write pointer.
    tosw: usize,
    /// Inflight read (top) pointer.
    tosr: usize,
    /// Inflight bottom pointer.
    bos: usize,

    meta: RasMeta,
    component_idx: usize,
}

impl ReturnAddressStack {
    /// Builds the stack from validated geometry.
    pub fn new(config: &RasConfig) -> Self {
        let num_inflight = config.num_inflight_entries;
        Self {
            stack: vec![RasEssential::default(); config.num_entries],
            inflight: vec![InflightEntry::default(); num_inflight],
            num_entries: config.num_entries,
            num_inflight,
            max_ctr: (1 << config.ctr_width) - 1,
            nsp: 0,
            ssp: 0,
            sctr: 0,
            tosw: 0,
            // One below the write pointer: the ring starts empty.
            tosr: num_inflight - 1,
            bos: 0,
            meta: RasMeta::default(),
            component_idx: 0,
        }
    }

    /// Committed depth pointers, for tests and invariant checks.
    pub fn committed_top(&self) -> (usize, u32) {
        (self.nsp, self.stack[self.nsp].ctr)
    }

    /// Address on top of the committed stack.
    pub fn committed_top_addr(&self) -> u64 {
        self.stack[self.nsp].ret_addr
    }

    fn ptr_inc(&self, ptr: usize) -> usize {
        (ptr + 1) % self.num_entries
    }

    fn ptr_dec(&self, ptr: usize) -> usize {
        if ptr == 0 { self.num_entries - 1 } else { ptr - 1 }
    }

    fn inflight_inc(&self, ptr: usize) -> usize {
        (ptr + 1) % self.num_inflight
    }

    /// Whether `ptr` lies inside the live inflight window `[BOS, TOSW)`.
    fn inflight_in_range(&self, ptr: usize) -> bool {
        if self.tosw > self.bos {
            ptr >= self.bos && ptr < self.tosw
        } else if self.tosw < self.bos {
            ptr < self.tosw || ptr >= self.bos
        } else {
            false
        }
    }

    /// Current speculative top: the inflight slot when live, else the
    /// committed stack at the speculative pointer.
    fn top(&self) -> RasEssential {
        if self.inflight_in_range(self.tosr) {
            self.inflight[self.tosr].data
        } else {
            self.stack[self.ssp]
        }
    }

    /// Speculative push of a predicted call's return address.
    fn push(&mut self, ret_addr: u64) {
        let top = self.top();
        if ret_addr == top.ret_addr && self.sctr < self.max_ctr {
            self.sctr += 1;
        } else {
            self.ssp = self.ptr_inc(self.ssp);
            self.sctr = 0;
        }
        // Every push lands in the inflight ring; committed state is only
        // touched at commit.
        self.inflight[self.tosw] = InflightEntry {
            data: RasEssential {
                ret_addr,
                ctr: self.sctr,
            },
            nos: self.tosr,
        };
        self.tosr = self.tosw;
        self.tosw = self.inflight_inc(self.tosw);
        trace!(target: "ras", "push {ret_addr:#x}: ssp {}, sctr {}, tosr {}, tosw {}",
            self.ssp, self.sctr, self.tosr, self.tosw);
    }

    /// Speculative pop for a predicted return.
    fn pop(&mut self) {
        if self.inflight_in_range(self.tosr) {
            self.tosr = self.inflight[self.tosr].nos;
        }
        if self.sctr > 0 {
            self.sctr -= 1;
        } else {
            self.ssp = self.ptr_dec(self.ssp);
            self.sctr = self.top().ctr;
        }
        trace!(target: "ras", "pop: ssp {}, sctr {}, tosr {}", self.ssp, self.sctr, self.tosr);
    }

    /// Committed push at call commit.
    fn push_committed(&mut self, ret_addr: u64) {
        let top = self.stack[self.nsp];
        if top.ret_addr == ret_addr && top.ctr < self.max_ctr {
            self.stack[self.nsp].ctr += 1;
        } else {
            self.nsp = self.ptr_inc(self.nsp);
            self.stack[self.nsp] = RasEssential { ret_addr, ctr: 0 };
        }
    }

    /// Committed pop at return commit.
    fn pop_committed(&mut self) {
        if self.stack[self.nsp].ctr > 0 {
            self.stack[self.nsp].ctr -= 1;
        } else {
            self.nsp = self.ptr_dec(self.nsp);
        }
    }
}

impl BasePredictor for ReturnAddressStack {
    /// Exposes the current speculative top as the return target of every
    /// stage, and snapshots the pointers for rollback.
    fn put_pc_history(
        &mut self,
        _start_pc: u64,
        _history: &GlobalHistory,
        stage_preds: &mut [FullPrediction],
    ) {
        let top = self.top();
        self.meta = RasMeta {
            ssp: self.ssp,
            sctr: self.sctr,
            tosr: self.tosr,
            tosw: self.tosw,
            target: top.ret_addr,
        };
        for pred in stage_preds.iter_mut() {
            pred.return_target = top.ret_addr;
        }
    }

    fn prediction_meta(&self) -> PredMeta {
        PredMeta::Ras(self.meta)
    }

    /// Applies the speculative push/pop implied by the enqueued prediction.
    fn spec_update_hist(&mut self, _history: &GlobalHistory, pred: &FullPrediction) {
        let Some(entry) = pred.taken_entry() else {
            return;
        };
        let branch = entry.branch;
        if branch.is_call {
            self.push(branch.end_pc());
        }
        if branch.is_return {
            self.pop();
        }
    }

    /// Restores the pointer snapshot, then replays the resolved branch.
    fn recover_hist(
        &mut self,
        _history: &GlobalHistory,
        stream: &FetchStream,
        _shamt: usize,
        _cond_taken: bool,
    ) {
        let PredMeta::Ras(meta) = stream.pred_metas[self.component_idx] else {
            return;
        };
        self.tosr = meta.tosr;
        self.tosw = meta.tosw;
        self.ssp = meta.ssp;
        self.sctr = meta.sctr;
        if stream.exe_taken {
            let branch = stream.exe_branch;
            if branch.is_call {
                self.push(branch.end_pc());
            }
            if branch.is_return {
                self.pop();
            }
        }
    }

    /// Commit: advances the committed stack, resynchronizes `nsp` with the
    /// snapshot on mismatch, and frees inflight slots behind the call.
    fn update(&mut self, stream: &FetchStream, _stats: &mut BpuStats) {
        let PredMeta::Ras(meta) = stream.pred_metas[self.component_idx] else {
            return;
        };
        if !stream.exe_taken {
            return;
        }
        let branch = stream.exe_branch;
        if meta.ssp != self.nsp || meta.sctr != self.stack[self.nsp].ctr {
            trace!(target: "ras", "ssp/nsp mismatch at commit, nsp {} <- ssp {}", self.nsp, meta.ssp);
            self.nsp = meta.ssp;
        }
        if branch.is_call {
            self.push_committed(branch.end_pc());
            self.bos = self.inflight_inc(meta.tosw);
        }
        if branch.is_return {
            self.pop_committed();
        }
    }

    fn delay(&self) -> usize {
        0
    }

    fn component_idx(&self) -> usize {
        self.component_idx
    }

    fn set_component_idx(&mut self, idx: usize) {
        self.component_idx = idx;
    }
}
