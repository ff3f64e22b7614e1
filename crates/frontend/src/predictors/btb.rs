//! Set-associative Branch Target Buffer.
//!
//! One implementation serves both levels of the BTB hierarchy: the
//! zero-bubble micro-BTB (delay 0, fully associative) and the large L1 BTB
//! (delay 1, 8-way). A block lookup returns every branch recorded for the
//! block, sorted in instruction order; replacement is MRU-ordered by a
//! monotonic access tick. The L1 BTB can optionally run ahead-pipelined: the
//! set is read with a PC captured several blocks earlier and tag-compared
//! against the current PC.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::config::{BtbConfig, PipelineConfig};
use crate::history::GlobalHistory;
use crate::predictors::{BasePredictor, PredMeta};
use crate::stats::BpuStats;
use crate::stream::{BTBEntry, FetchStream, FullPrediction};

/// A BTB row with the access timestamp used for MRU replacement.
#[derive(Debug, Clone, Copy, Default)]
struct TickedEntry {
    entry: BTBEntry,
    tick: u64,
}

/// Lookup snapshot consumed at update time: the hit lists of this BTB and,
/// for the L1 BTB, of the zero-delay stage it may have disagreed with.
#[derive(Debug, Clone, Default)]
pub struct BtbMeta {
    /// Entries this BTB hit for the block.
    pub hit_entries: Vec<BTBEntry>,
    /// Entries the stage-0 prediction carried (L1 only).
    pub l0_hit_entries: Vec<BTBEntry>,
}

/// Generic set-associative BTB with MRU replacement.
#[derive(Debug)]
pub struct SetAssocBtb {
    sets: Vec<Vec<TickedEntry>>,
    num_sets: usize,
    num_ways: usize,
    idx_shift: u32,
    tag_shift: u32,
    idx_mask: u64,
    tag_mask: u64,
    block_size: u64,
    delay: usize,
    ahead_stages: usize,
    half_aligned: bool,

    /// Monotonic access counter standing in for a global tick; MRU only
    /// needs relative order.
    access_tick: u64,

    /// Sets read ahead of their tag compare, oldest first.
    ahead_reads: VecDeque<(u64, usize, Vec<TickedEntry>)>,

    meta: BtbMeta,
    component_idx: usize,
}

impl SetAssocBtb {
    /// Builds a BTB from validated geometry.
    pub fn new(config: &BtbConfig, pipeline: &PipelineConfig) -> Self {
        let num_sets = config.num_entries / config.num_ways;
        let idx_shift = if config.align_to_block_size || config.half_aligned {
            pipeline.block_size.trailing_zeros()
        } else {
            1
        };
        let tag_shift = idx_shift + num_sets.trailing_zeros();
        debug!(
            target: "btb",
            "btb geometry: {} sets x {} ways, idx shift {idx_shift}, tag shift {tag_shift}, delay {}",
            num_sets, config.num_ways, config.num_delay_stages
        );
        Self {
            sets: vec![vec![TickedEntry::default(); config.num_ways]; num_sets],
            num_sets,
            num_ways: config.num_ways,
            idx_shift,
            tag_shift,
            idx_mask: num_sets as u64 - 1,
            tag_mask: (1u64 << config.tag_bits) - 1,
            block_size: pipeline.block_size,
            delay: config.num_delay_stages,
            ahead_stages: config.ahead_pipelined_stages,
            half_aligned: config.half_aligned,
            access_tick: 0,
            ahead_reads: VecDeque::new(),
            meta: BtbMeta::default(),
            component_idx: 0,
        }
    }

    /// Derives the update entry for a committed stream and stores it in
    /// `stream.update_new_entry` / `stream.update_is_old_entry`.
    ///
    /// Called on the L1 BTB only, before any component update runs: if the
    /// executed branch was among the predicted entries the old row is
    /// refreshed, otherwise a taken branch synthesizes a fresh row
    /// (conditionals start always-taken with `ctr = 1`).
    pub fn get_and_set_new_entry(&self, stream: &mut FetchStream) {
        let PredMeta::Btb(meta) = &stream.pred_metas[self.component_idx] else {
            return;
        };
        let hit = meta
            .hit_entries
            .iter()
            .find(|e| e.branch.same_branch(&stream.exe_branch));

        let (mut entry, is_old) = match hit {
            Some(e) => (*e, true),
            None if stream.exe_taken => {
                let mut new_entry = BTBEntry::new_for(stream.exe_branch);
                if new_entry.branch.is_cond {
                    new_entry.ctr = 1;
                }
                (new_entry, false)
            }
            None => (BTBEntry::default(), false),
        };
        entry.tag = self.tag_of(entry.branch.pc);
        stream.update_new_entry = entry;
        stream.update_is_old_entry = is_old;
    }

    fn index_of(&self, pc: u64) -> usize {
        ((pc >> self.idx_shift) & self.idx_mask) as usize
    }

    fn tag_of(&self, pc: u64) -> u64 {
        (pc >> self.tag_shift) & self.tag_mask
    }

    fn next_tick(&mut self) -> u64 {
        self.access_tick += 1;
        self.access_tick
    }

    /// Looks up every entry recorded for the block at `block_pc`.
    ///
    /// A PC with bit 0 set is treated as a miss. In half-aligned mode the
    /// two covering half-blocks are merged.
    fn lookup(&mut self, block_pc: u64) -> Vec<TickedEntry> {
        if block_pc & 1 != 0 {
            return Vec::new();
        }
        if self.half_aligned {
            let aligned = block_pc & !(self.block_size - 1);
            let mut res = self.lookup_single(aligned);
            res.extend(self.lookup_single(aligned + self.block_size));
            res.sort_by_key(|e| e.entry.branch.pc);
            res
        } else {
            self.lookup_single(block_pc)
        }
    }

    fn lookup_single(&mut self, block_pc: u64) -> Vec<TickedEntry> {
        let read_idx = self.index_of(block_pc);
        let current_tag = self.tag_of(block_pc);

        let (cmp_idx, cmp_set, direct) = if self.ahead_stages == 0 {
            (read_idx, self.sets[read_idx].clone(), true)
        } else {
            // The set was read with a PC captured ahead_stages blocks ago;
            // push this cycle's read and consume the one that is now due.
            self.ahead_reads
                .push_back((block_pc, read_idx, self.sets[read_idx].clone()));
            if self.ahead_reads.len() < self.ahead_stages + 1 {
                trace!(
                    target: "btb",
                    "ahead pipeline not primed ({} of {} reads), reporting miss",
                    self.ahead_reads.len(),
                    self.ahead_stages + 1
                );
                return Vec::new();
            }
            match self.ahead_reads.pop_front() {
                Some((_, idx, set)) => (idx, set, false),
                None => return Vec::new(),
            }
        };

        let mut hits = Vec::new();
        for (way, slot) in cmp_set.iter().enumerate() {
            if slot.entry.valid && slot.entry.tag == current_tag {
                hits.push(*slot);
                if direct {
                    // Refresh MRU order of the hit way.
                    let tick = self.next_tick();
                    self.sets[cmp_idx][way].tick = tick;
                }
            }
        }
        hits
    }

    /// Picks the victim way in a set: the first invalid way, else the way
    /// with the oldest access tick.
    fn victim_way(&self, set_idx: usize) -> usize {
        let set = &self.sets[set_idx];
        set.iter()
            .position(|slot| !slot.entry.valid)
            .unwrap_or_else(|| {
                let mut victim = 0;
                for (way, slot) in set.iter().enumerate() {
                    if slot.tick < set[victim].tick {
                        victim = way;
                    }
                }
                victim
            })
    }

    /// Writes one resolved entry into its set: refreshes the direction
    /// counter and target of a present row, or evicts the MRU victim.
    fn write_entry(&mut self, set_idx: usize, tag: u64, entry: &BTBEntry, stream: &FetchStream) {
        let found_way = self.sets[set_idx]
            .iter()
            .position(|slot| slot.entry.valid && slot.entry.branch.same_branch(&entry.branch));

        // A present conditional row carries the live counter; prefer it over
        // the snapshot recorded at prediction time.
        let mut to_write = match found_way {
            Some(way) if entry.branch.is_cond => self.sets[set_idx][way].entry,
            _ => *entry,
        };
        to_write.tag = tag;

        let this_taken = stream.exe_taken && stream.control_pc() == to_write.branch.pc;
        if to_write.branch.is_cond {
            if !this_taken {
                to_write.always_taken = false;
            }
            if this_taken && to_write.ctr < 1 {
                to_write.ctr += 1;
            }
            if !this_taken && to_write.ctr > -2 {
                to_write.ctr -= 1;
            }
        }
        if to_write.branch.is_indirect && this_taken {
            to_write.branch.target = stream.exe_branch.target;
        }

        let tick = self.next_tick();
        let ticked = TickedEntry {
            entry: to_write,
            tick,
        };
        match found_way {
            Some(way) => self.sets[set_idx][way] = ticked,
            None => {
                let way = self.victim_way(set_idx);
                trace!(
                    target: "btb",
                    "evicting set {set_idx} way {way} (pc {:#x}) for pc {:#x}",
                    self.sets[set_idx][way].entry.branch.pc,
                    to_write.branch.pc
                );
                self.sets[set_idx][way] = ticked;
            }
        }
    }

    /// The block start captured `ahead_stages` blocks before this stream,
    /// used to rebuild the set index of an ahead-pipelined read.
    fn previous_pc(&self, stream: &FetchStream) -> Option<u64> {
        if stream.previous_pcs.len() < self.ahead_stages {
            return None;
        }
        // The queue holds the most recent starts; the read PC is the one
        // ahead_stages blocks back.
        let skip = stream.previous_pcs.len() - self.ahead_stages;
        stream.previous_pcs.iter().nth(skip).copied()
    }

    /// Debug invariant: no set exceeds its way count.
    pub fn check_capacity(&self) -> bool {
        self.sets.len() == self.num_sets && self.sets.iter().all(|s| s.len() == self.num_ways)
    }
}

impl BasePredictor for SetAssocBtb {
    /// Looks up the block, sorts and trims the hits, and overwrites the BTB
    /// portion of every stage at or past this BTB's delay.
    fn put_pc_history(
        &mut self,
        start_pc: u64,
        _history: &GlobalHistory,
        stage_preds: &mut [FullPrediction],
    ) {
        let mut hits = self.lookup(start_pc);
        hits.sort_by_key(|e| e.entry.branch.pc);
        hits.retain(|e| e.entry.branch.pc >= start_pc);
        trace!(target: "btb", "lookup {start_pc:#x}: {} hits", hits.len());

        for pred in stage_preds.iter_mut().skip(self.delay) {
            pred.btb_entries = hits.iter().map(|e| e.entry).collect();
            for e in &hits {
                let b = &e.entry.branch;
                if b.is_cond {
                    let _ = pred.cond_takens.insert(b.pc, e.entry.base_taken());
                } else if b.is_indirect {
                    let _ = pred.indirect_targets.insert(b.pc, b.target);
                }
            }
        }

        self.meta.l0_hit_entries = if self.delay >= 1 {
            stage_preds.first().map(|p| p.btb_entries.clone()).unwrap_or_default()
        } else {
            Vec::new()
        };
        self.meta.hit_entries = hits.iter().map(|e| e.entry).collect();
    }

    fn prediction_meta(&self) -> PredMeta {
        PredMeta::Btb(self.meta.clone())
    }

    /// Drops buffered ahead reads; the squashed path read the wrong sets.
    fn recover_hist(
        &mut self,
        _history: &GlobalHistory,
        _stream: &FetchStream,
        _shamt: usize,
        _cond_taken: bool,
    ) {
        self.ahead_reads.clear();
    }

    /// Trains the BTB with a committed stream: refreshes every executed old
    /// entry and installs the new entry derived by
    /// [`Self::get_and_set_new_entry`].
    fn update(&mut self, stream: &FetchStream, _stats: &mut BpuStats) {
        let PredMeta::Btb(meta) = &stream.pred_metas[self.component_idx] else {
            return;
        };
        let mut entries: Vec<BTBEntry> = meta
            .hit_entries
            .iter()
            .filter(|e| e.branch.pc <= stream.update_end_pc)
            .copied()
            .collect();
        // L1 skips the new entry when it merely refreshes an old row; the
        // micro-BTB installs unconditionally to stay in sync with L1.
        let install_new = stream.update_new_entry.valid
            && (!stream.update_is_old_entry || self.delay == 0);
        if install_new {
            entries.push(stream.update_new_entry);
        }

        for entry in &entries {
            let tag = self.tag_of(entry.branch.pc);
            let set_idx = if self.ahead_stages > 0 {
                match self.previous_pc(stream) {
                    Some(pc) => self.index_of(pc),
                    // Not enough history to rebuild the ahead read; skip.
                    None => continue,
                }
            } else {
                self.index_of(entry.branch.pc)
            };
            self.write_entry(set_idx, tag, entry, stream);
        }

        debug_assert!(self.check_capacity());
    }

    fn delay(&self) -> usize {
        self.delay
    }

    fn ahead_pipelined_stages(&self) -> usize {
        self.ahead_stages
    }

    fn component_idx(&self) -> usize {
        self.component_idx
    }

    fn set_component_idx(&mut self, idx: usize) {
        self.component_idx = idx;
    }
}
