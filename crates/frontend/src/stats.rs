//! Prediction statistics collection and reporting.
//!
//! This module tracks performance metrics for the decoupled front-end. It
//! provides:
//! 1. **Branch mix:** Committed branches by class (cond, uncond, indirect,
//!    call, return) with per-class misprediction counts.
//! 2. **Override:** Stage-override events, bubble counts, and reasons.
//! 3. **Queues:** FSQ/FTQ occupancy stalls and enqueue/commit counts.
//! 4. **Squashes:** Control, non-control, and trap squash counts.
//! 5. **Components:** BTB hit/miss and TAGE provider/allocation activity.

/// Flat counter set for the whole predictor.
///
/// The driver owns one instance and components tally into it at prediction
/// and update boundaries.
#[derive(Debug, Clone, Default)]
pub struct BpuStats {
    /// Cycles simulated.
    pub cycles: u64,

    /// Committed conditional branches.
    pub cond_num: u64,
    /// Committed unconditional direct branches.
    pub uncond_num: u64,
    /// Committed returns.
    pub return_num: u64,
    /// Committed other (indirect non-return) control instructions.
    pub other_num: u64,

    /// Conditional branch mispredictions.
    pub cond_miss: u64,
    /// Unconditional branch mispredictions.
    pub uncond_miss: u64,
    /// Return mispredictions.
    pub return_miss: u64,
    /// Other control mispredictions.
    pub other_miss: u64,

    /// Stage-override events.
    pub override_count: u64,
    /// Override bubbles consumed.
    pub override_bubble_num: u64,
    /// Overrides caused by taken/not-taken disagreement.
    pub override_fall_thru: u64,
    /// Overrides caused by differing control addresses.
    pub override_control_addr: u64,
    /// Overrides caused by differing targets.
    pub override_target: u64,
    /// Overrides caused by differing block ends.
    pub override_end: u64,
    /// Overrides caused by differing history info.
    pub override_hist_info: u64,

    /// FSQ entries enqueued.
    pub fsq_enqueued: u64,
    /// FSQ entries committed.
    pub fsq_committed: u64,
    /// Cycles a full FSQ blocked a new prediction.
    pub fsq_full_cannot_enq: u64,
    /// FTQ enqueue attempts with no stream available.
    pub fsq_not_valid: u64,
    /// Fetch demands the FTQ could not supply.
    pub ftq_not_valid: u64,

    /// Control squashes.
    pub control_squash: u64,
    /// Non-control squashes.
    pub non_control_squash: u64,
    /// Trap squashes.
    pub trap_squash: u64,

    /// Streams that committed with a BTB hit.
    pub btb_hit: u64,
    /// Taken streams that committed without a BTB hit.
    pub btb_miss: u64,
    /// New BTB entries installed.
    pub btb_new_entry: u64,
    /// Existing BTB entries refreshed.
    pub btb_old_entry: u64,

    /// TAGE predictions served by a tagged provider.
    pub tage_provided: u64,
    /// TAGE predictions that fell back to the base (BTB) counter.
    pub tage_use_base: u64,
    /// TAGE predictions that used the alternate provider.
    pub tage_use_alt: u64,
    /// TAGE allocations that found a free row.
    pub tage_alloc_success: u64,
    /// TAGE allocations that found every candidate row useful.
    pub tage_alloc_failure: u64,
    /// TAGE useful-bit wipes.
    pub tage_reset_useful: u64,

    /// ITTAGE predictions that overrode the BTB target.
    pub ittage_used: u64,
    /// ITTAGE mispredictions observed at update.
    pub ittage_mispred: u64,

    /// Conditional predictions the corrector overrode.
    pub mgsc_used: u64,
    /// Corrector right where TAGE was wrong.
    pub mgsc_correct_tage_wrong: u64,
    /// Corrector wrong where TAGE was right.
    pub mgsc_wrong_tage_correct: u64,
}

/// Section names for selective stats output.
///
/// Valid section identifiers: `"branch"`, `"override"`, `"queue"`,
/// `"squash"`, `"component"`. Pass an empty slice to `print_sections` to
/// print all sections.
pub const STATS_SECTIONS: &[&str] = &["branch", "override", "queue", "squash", "component"];

impl BpuStats {
    /// Prints all statistics sections to stdout.
    pub fn print(&self) {
        self.print_sections(&[]);
    }

    /// Prints only the requested statistics sections to stdout.
    ///
    /// Each element of `sections` should be one of [`STATS_SECTIONS`]; an
    /// empty slice prints everything. Rates are guarded against division by
    /// zero.
    pub fn print_sections(&self, sections: &[String]) {
        let want = |s: &str| sections.is_empty() || sections.iter().any(|x| x == s);

        let total_branches =
            self.cond_num + self.uncond_num + self.return_num + self.other_num;
        let total_misses =
            self.cond_miss + self.uncond_miss + self.return_miss + self.other_miss;
        let pct = |miss: u64, num: u64| {
            if num == 0 {
                0.0
            } else {
                100.0 * miss as f64 / num as f64
            }
        };

        if want("branch") {
            println!("== branch mix ==");
            println!("  cycles:            {}", self.cycles);
            println!(
                "  branches:          {total_branches} ({} mispredicted, {:.2}%)",
                total_misses,
                pct(total_misses, total_branches)
            );
            println!(
                "  cond:              {} ({} miss, {:.2}%)",
                self.cond_num,
                self.cond_miss,
                pct(self.cond_miss, self.cond_num)
            );
            println!(
                "  uncond:            {} ({} miss, {:.2}%)",
                self.uncond_num,
                self.uncond_miss,
                pct(self.uncond_miss, self.uncond_num)
            );
            println!(
                "  return:            {} ({} miss, {:.2}%)",
                self.return_num,
                self.return_miss,
                pct(self.return_miss, self.return_num)
            );
            println!(
                "  indirect other:    {} ({} miss, {:.2}%)",
                self.other_num,
                self.other_miss,
                pct(self.other_miss, self.other_num)
            );
        }

        if want("override") {
            println!("== override ==");
            println!("  overrides:         {}", self.override_count);
            println!("  bubbles:           {}", self.override_bubble_num);
            println!(
                "  reasons:           fall-thru {}, control {}, target {}, end {}, hist {}",
                self.override_fall_thru,
                self.override_control_addr,
                self.override_target,
                self.override_end,
                self.override_hist_info
            );
        }

        if want("queue") {
            println!("== queues ==");
            println!("  fsq enq/commit:    {}/{}", self.fsq_enqueued, self.fsq_committed);
            println!("  fsq full stalls:   {}", self.fsq_full_cannot_enq);
            println!("  fsq not valid:     {}", self.fsq_not_valid);
            println!("  ftq not valid:     {}", self.ftq_not_valid);
        }

        if want("squash") {
            println!("== squashes ==");
            println!("  control:           {}", self.control_squash);
            println!("  non-control:       {}", self.non_control_squash);
            println!("  trap:              {}", self.trap_squash);
        }

        if want("component") {
            println!("== components ==");
            println!(
                "  btb hit/miss:      {}/{} (new {}, old {})",
                self.btb_hit, self.btb_miss, self.btb_new_entry, self.btb_old_entry
            );
            println!(
                "  tage:              provided {}, base {}, alt {}, alloc ok/fail {}/{}, u-reset {}",
                self.tage_provided,
                self.tage_use_base,
                self.tage_use_alt,
                self.tage_alloc_success,
                self.tage_alloc_failure,
                self.tage_reset_useful
            );
            println!(
                "  ittage:            used {}, mispred {}",
                self.ittage_used, self.ittage_mispred
            );
            println!(
                "  mgsc:              used {}, fixed {}, broke {}",
                self.mgsc_used, self.mgsc_correct_tage_wrong, self.mgsc_wrong_tage_correct
            );
        }
    }
}
