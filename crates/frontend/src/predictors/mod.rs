//! Predictor components and their shared interface.
//!
//! Every table-based predictor plugs into the driver through the
//! [`BasePredictor`] trait: per-cycle lookup into the per-stage predictions,
//! an opaque-by-value metadata snapshot for rollback, speculative history
//! update, recovery, and commit-time training. [`Component`] wraps the
//! concrete predictors in an enum for static dispatch in the prediction
//! loop, and [`PredMeta`] is the tagged sum of per-component snapshots
//! carried by each fetch stream.

pub mod btb;
pub mod ittage;
pub mod mgsc;
pub mod ras;
pub mod tage;

pub use btb::SetAssocBtb;
pub use ittage::ItagePredictor;
pub use mgsc::MgscPredictor;
pub use ras::ReturnAddressStack;
pub use tage::TagePredictor;

use crate::history::GlobalHistory;
use crate::stats::BpuStats;
use crate::stream::{FetchStream, FullPrediction};

/// Per-component rollback snapshot, held by value in each fetch stream.
///
/// One variant per component; a component reads back only its own variant,
/// selected by its registration index.
#[derive(Debug, Clone, Default)]
pub enum PredMeta {
    /// Component produced no snapshot.
    #[default]
    None,
    /// BTB hit lists.
    Btb(btb::BtbMeta),
    /// TAGE provider info and folded-history snapshot.
    Tage(tage::TageMeta),
    /// ITTAGE provider info and folded-history snapshot.
    Ittage(ittage::ItageMeta),
    /// MGSC perceptron sums and history snapshots.
    Mgsc(mgsc::MgscMeta),
    /// RAS pointer snapshot.
    Ras(ras::RasMeta),
}

/// Interface every prediction component implements.
///
/// Methods with empty default bodies are opt-in; a component only overrides
/// what its state machine needs.
pub trait BasePredictor {
    /// Produces this component's contribution to every stage at or past its
    /// delay, reading the current PC and global history.
    fn put_pc_history(
        &mut self,
        start_pc: u64,
        history: &GlobalHistory,
        stage_preds: &mut [FullPrediction],
    );

    /// Snapshot of the lookup state, stored in the stream for later
    /// update/rollback.
    fn prediction_meta(&self) -> PredMeta {
        PredMeta::None
    }

    /// Speculatively advances internal history for an enqueued prediction.
    fn spec_update_hist(&mut self, history: &GlobalHistory, pred: &FullPrediction) {
        let _ = (history, pred);
    }

    /// Rewinds internal history to the stream's snapshot and replays the
    /// resolved outcome.
    fn recover_hist(
        &mut self,
        history: &GlobalHistory,
        stream: &FetchStream,
        shamt: usize,
        cond_taken: bool,
    ) {
        let _ = (history, stream, shamt, cond_taken);
    }

    /// Trains the component with a committed stream.
    fn update(&mut self, stream: &FetchStream, stats: &mut BpuStats) {
        let _ = (stream, stats);
    }

    /// Pipeline stages before this component's result is available.
    fn delay(&self) -> usize;

    /// Number of blocks the set read runs ahead of the tag compare.
    fn ahead_pipelined_stages(&self) -> usize {
        0
    }

    /// Registration index, used to address `pred_metas`.
    fn component_idx(&self) -> usize;

    /// Assigns the registration index.
    fn set_component_idx(&mut self, idx: usize);
}

/// Enum wrapper for static dispatch of prediction components.
/// This avoids vtable lookups in the per-cycle prediction loop.
#[derive(Debug)]
pub enum Component {
    /// A set-associative BTB (micro or L1).
    Btb(SetAssocBtb),
    /// Conditional-direction predictor.
    Tage(TagePredictor),
    /// Indirect-target predictor.
    Ittage(ItagePredictor),
    /// Statistical corrector.
    Mgsc(MgscPredictor),
    /// Return address stack.
    Ras(ReturnAddressStack),
}

macro_rules! dispatch {
    ($self:ident, $inner:ident => $body:expr) => {
        match $self {
            Self::Btb($inner) => $body,
            Self::Tage($inner) => $body,
            Self::Ittage($inner) => $body,
            Self::Mgsc($inner) => $body,
            Self::Ras($inner) => $body,
        }
    };
}

impl BasePredictor for Component {
    #[inline]
    fn put_pc_history(
        &mut self,
        start_pc: u64,
        history: &GlobalHistory,
        stage_preds: &mut [FullPrediction],
    ) {
        dispatch!(self, c => c.put_pc_history(start_pc, history, stage_preds));
    }

    #[inline]
    fn prediction_meta(&self) -> PredMeta {
        dispatch!(self, c => c.prediction_meta())
    }

    #[inline]
    fn spec_update_hist(&mut self, history: &GlobalHistory, pred: &FullPrediction) {
        dispatch!(self, c => c.spec_update_hist(history, pred));
    }

    #[inline]
    fn recover_hist(
        &mut self,
        history: &GlobalHistory,
        stream: &FetchStream,
        shamt: usize,
        cond_taken: bool,
    ) {
        dispatch!(self, c => c.recover_hist(history, stream, shamt, cond_taken));
    }

    #[inline]
    fn update(&mut self, stream: &FetchStream, stats: &mut BpuStats) {
        dispatch!(self, c => c.update(stream, stats));
    }

    #[inline]
    fn delay(&self) -> usize {
        dispatch!(self, c => c.delay())
    }

    #[inline]
    fn ahead_pipelined_stages(&self) -> usize {
        dispatch!(self, c => c.ahead_pipelined_stages())
    }

    #[inline]
    fn component_idx(&self) -> usize {
        dispatch!(self, c => c.component_idx())
    }

    #[inline]
    fn set_component_idx(&mut self, idx: usize) {
        dispatch!(self, c => c.set_component_idx(idx));
    }
}
