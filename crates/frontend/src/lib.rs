//! Decoupled front-end branch prediction library.
//!
//! This crate implements a cycle-accurate, multi-stage branch prediction
//! subsystem for an out-of-order CPU model:
//! 1. **Pipeline:** A staged predictor (zero-bubble micro-BTB overridden by
//!    slower, more accurate components) driven one cycle per `tick`, with
//!    override-bubble accounting.
//! 2. **Components:** Set-associative BTBs, a TAGE direction predictor, an
//!    ITTAGE indirect-target predictor, an MGSC statistical corrector, and a
//!    two-level return address stack.
//! 3. **Queues:** A Fetch Stream Queue of predicted blocks awaiting commit
//!    and a Fetch Target Queue of fetch-ready blocks.
//! 4. **History:** Folded global-history maintenance with speculative update
//!    and precise rollback on the three squash flavours.
//! 5. **Interface:** `tick` / `try_supply_fetch_with_target` /
//!    `decoupled_predict` toward fetch; `control_squash` /
//!    `non_control_squash` / `trap_squash` / `update` from the back end.

/// Predictor configuration (defaults, hierarchical config, validation).
pub mod config;
/// Pipeline driver, Fetch Stream Queue, and squash protocols.
pub mod engine;
/// Fetch Target Queue.
pub mod ftq;
/// Global history register, folded views, and the speculative-history log.
pub mod history;
/// Prediction components (BTBs, TAGE, ITTAGE, MGSC, RAS).
pub mod predictors;
/// Prediction statistics collection and reporting.
pub mod stats;
/// Core data model (branches, streams, predictions, fetch targets).
pub mod stream;

/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// Top-level predictor; owns every component and both queues.
pub use crate::engine::DecoupledPredictor;
/// Flat statistics counters for the whole predictor.
pub use crate::stats::BpuStats;
