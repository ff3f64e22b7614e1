//! Fetch Target Queue.
//!
//! The FTQ buffers fetch-ready blocks between branch prediction (which
//! produces them from fetch streams) and the fetch unit (which consumes
//! them by demand id). It tracks three pieces of state: where the next
//! block will be enqueued, which target id fetch currently demands, and
//! whether a supplying entry has been latched for that demand.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::stream::FtqEntry;

/// State for enqueueing fetch targets.
#[derive(Debug, Clone)]
pub struct FtqEnqState {
    /// PC the next enqueued block starts at.
    pub pc: u64,
    /// Fetch stream the next block is carved from.
    pub stream_id: u64,
    /// Id assigned to the next enqueued block.
    pub next_target_id: u64,
}

impl Default for FtqEnqState {
    fn default() -> Self {
        Self {
            pc: 0,
            stream_id: 1,
            next_target_id: 0,
        }
    }
}

/// The fetch target queue: an ordered map of target id to block.
#[derive(Debug)]
pub struct FetchTargetQueue {
    ftq: BTreeMap<u64, FtqEntry>,
    size: usize,

    /// Target id fetch currently demands.
    demand_target_id: u64,
    /// Whether `demand_target_id` has been located and latched.
    supplying: bool,

    enq_state: FtqEnqState,
}

impl FetchTargetQueue {
    /// Creates an empty queue bounded at `size` entries.
    pub fn new(size: usize) -> Self {
        Self {
            ftq: BTreeMap::new(),
            size,
            demand_target_id: 0,
            supplying: false,
            enq_state: FtqEnqState::default(),
        }
    }

    /// The queue holds no entries.
    pub fn is_empty(&self) -> bool {
        self.ftq.is_empty()
    }

    /// Current occupancy.
    pub fn len(&self) -> usize {
        self.ftq.len()
    }

    /// The queue cannot accept another entry.
    pub fn is_full(&self) -> bool {
        self.ftq.len() >= self.size
    }

    /// Mutable access to the enqueue state.
    pub const fn enq_state_mut(&mut self) -> &mut FtqEnqState {
        &mut self.enq_state
    }

    /// Read access to the enqueue state.
    pub const fn enq_state(&self) -> &FtqEnqState {
        &self.enq_state
    }

    /// Id of the target being supplied (or demanded, when none is latched).
    pub const fn supplying_target_id(&self) -> u64 {
        self.demand_target_id
    }

    /// Whether a block is latched for the current fetch demand.
    pub const fn fetch_target_available(&self) -> bool {
        self.supplying
    }

    /// The latched block. Only meaningful when
    /// [`Self::fetch_target_available`] holds.
    pub fn target(&self) -> Option<&FtqEntry> {
        if self.supplying {
            self.ftq.get(&self.demand_target_id)
        } else {
            None
        }
    }

    /// Appends a block under the next enqueue id.
    pub fn enqueue(&mut self, entry: FtqEntry) {
        trace!(
            target: "ftq",
            "enqueue target {} pc {:#x} stream {}",
            self.enq_state.next_target_id,
            entry.start_pc,
            entry.fsq_id
        );
        let _ = self.ftq.insert(self.enq_state.next_target_id, entry);
        self.enq_state.next_target_id += 1;
    }

    /// Tries to latch a block for the demanded PC.
    ///
    /// An entry whose end the demand PC has already passed is discarded and
    /// the next one is tried; this covers fetch racing ahead of a block
    /// that was truncated by a late-arriving prediction.
    pub fn try_supply_fetch_with_target(&mut self, fetch_demand_pc: u64) -> bool {
        if self.supplying && self.ftq.contains_key(&self.demand_target_id) {
            return true;
        }
        self.supplying = false;
        loop {
            let Some(entry) = self.ftq.get(&self.demand_target_id) else {
                trace!(target: "ftq", "target id {} not found", self.demand_target_id);
                return false;
            };
            if fetch_demand_pc >= entry.end_pc {
                debug!(
                    target: "ftq",
                    "skip target {}: [{:#x}, {:#x}) behind demand {fetch_demand_pc:#x}",
                    self.demand_target_id, entry.start_pc, entry.end_pc
                );
                let _ = self.ftq.remove(&self.demand_target_id);
                self.demand_target_id += 1;
                continue;
            }
            self.supplying = true;
            return true;
        }
    }

    /// Retires the latched block and advances the demand id.
    pub fn finish_current_fetch_target(&mut self) {
        let _ = self.ftq.remove(&self.demand_target_id);
        self.demand_target_id += 1;
        self.supplying = false;
    }

    /// Clears the queue and repoints enqueue and demand state after a
    /// squash.
    pub fn squash(&mut self, new_enq_target_id: u64, new_enq_stream_id: u64, new_enq_pc: u64) {
        self.ftq.clear();
        self.enq_state.next_target_id = new_enq_target_id;
        self.enq_state.stream_id = new_enq_stream_id;
        self.enq_state.pc = new_enq_pc;
        self.supplying = false;
        self.demand_target_id = new_enq_target_id;
        debug!(
            target: "ftq",
            "squash: enq stream {new_enq_stream_id}, enq pc {new_enq_pc:#x}, demand {new_enq_target_id}"
        );
    }

    /// Repoints the enqueue PC without squashing queued entries.
    pub const fn reset_pc(&mut self, new_pc: u64) {
        self.supplying = false;
        self.enq_state.pc = new_pc;
    }
}
