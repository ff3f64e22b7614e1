//! Replayable log of speculative history updates.
//!
//! Every enqueued fetch stream appends one entry recording how the global
//! history was shifted for it. On a squash the log is truncated and the
//! squashing stream's entry is rewritten with the resolved outcome, so the
//! log always describes the canonical history. A debug cross-check rebuilds
//! the GHR from the log and compares it against the live register.

use tracing::trace;

use super::GlobalHistory;
use crate::stream::BranchInfo;

/// One speculative history delta, keyed by the stream that produced it.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Start PC of the stream.
    pub pc: u64,
    /// Number of history bits shifted in for this stream.
    pub shamt: usize,
    /// Outcome bit shifted in at position 0.
    pub cond_taken: bool,
    /// Whether the stream-ending branch was a call.
    pub is_call: bool,
    /// Whether the stream-ending branch was a return.
    pub is_return: bool,
    /// Return address of the stream-ending branch (`pc + size`).
    pub ret_addr: u64,
    /// Id of the fetch stream this delta belongs to.
    pub stream_id: u64,
}

/// Ordered log of [`HistoryEntry`] records for inflight streams.
#[derive(Debug)]
pub struct HistoryManager {
    entries: Vec<HistoryEntry>,
    max_shamt: usize,
}

impl HistoryManager {
    /// Creates an empty log; `max_shamt` bounds the per-stream shift amount.
    pub const fn new(max_shamt: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_shamt,
        }
    }

    /// Records the speculative delta of a newly enqueued stream.
    pub fn add_speculative(
        &mut self,
        pc: u64,
        shamt: usize,
        cond_taken: bool,
        branch: &BranchInfo,
        stream_id: u64,
    ) {
        let entry = HistoryEntry {
            pc,
            shamt,
            cond_taken,
            is_call: branch.is_call,
            is_return: branch.is_return,
            ret_addr: branch.end_pc(),
            stream_id,
        };
        trace!(target: "bpu", "history add: stream {stream_id}, pc {pc:#x}, shamt {shamt}, taken {cond_taken}");
        self.entries.push(entry);
    }

    /// Drops all entries for streams at or below the committed id.
    pub fn commit(&mut self, stream_id: u64) {
        self.entries.retain(|e| e.stream_id > stream_id);
    }

    /// Rewrites the squashing stream's delta with the resolved outcome and
    /// truncates everything younger.
    pub fn squash(&mut self, stream_id: u64, shamt: usize, cond_taken: bool, branch: &BranchInfo) {
        self.entries.retain(|e| e.stream_id <= stream_id);
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.stream_id == stream_id)
        {
            entry.shamt = shamt;
            entry.cond_taken = cond_taken;
            entry.is_call = branch.is_call;
            entry.is_return = branch.is_return;
            entry.ret_addr = branch.end_pc();
        }
        self.check_sanity();
    }

    /// Read access to the log, oldest first.
    pub fn speculative_entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Rebuilds the history the log describes and the number of recorded
    /// bits, for comparison against the live register.
    pub fn ideal_history(&self, history_bits: usize) -> (GlobalHistory, usize) {
        let mut ideal = GlobalHistory::new(history_bits);
        let mut total = 0;
        for entry in &self.entries {
            if entry.shamt != 0 {
                total += entry.shamt;
                ideal.shift_in(entry.shamt, entry.cond_taken);
            }
        }
        (ideal, total)
    }

    fn check_sanity(&self) {
        debug_assert!(
            self.entries.iter().all(|e| e.shamt <= self.max_shamt),
            "history entry shifted more than {} bits",
            self.max_shamt
        );
    }
}
