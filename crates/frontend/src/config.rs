//! Configuration system for the decoupled front-end.
//!
//! This module defines all configuration structures used to parameterize the
//! predictor. It provides:
//! 1. **Defaults:** Baseline hardware constants (queues, block geometry,
//!    per-component table shapes).
//! 2. **Structures:** Hierarchical config for queues, pipeline, BTBs, TAGE,
//!    ITTAGE, MGSC, and RAS.
//! 3. **Validation:** [`Config::validate`] rejects inconsistent geometry at
//!    construction time.
//!
//! Configuration is supplied via JSON (`serde_json`) or `Config::default()`.

use serde::Deserialize;
use thiserror::Error;

/// Default configuration constants for the predictor.
///
/// These values define the baseline hardware configuration when not
/// explicitly overridden.
mod defaults {
    /// Fetch Stream Queue capacity.
    pub const FSQ_SIZE: usize = 48;

    /// Fetch Target Queue capacity.
    pub const FTQ_SIZE: usize = 20;

    /// Prediction pipeline depth (uBTB at stage 0, BTB/TAGE at stage 1,
    /// ITTAGE/MGSC at stage 2).
    pub const NUM_STAGES: usize = 3;

    /// Maximum fetch-block span in bytes.
    pub const PREDICT_WIDTH: u64 = 64;

    /// BTB indexing block size in bytes.
    pub const BLOCK_SIZE: u64 = 32;

    /// Authoritative global history register length in bits.
    pub const HISTORY_BITS: usize = 488;

    /// Maximum history bits shifted in per predicted block.
    pub const MAX_SHAMT: usize = 8;

    /// Micro-BTB entries (fully associative).
    pub const UBTB_ENTRIES: usize = 32;
    /// Micro-BTB ways.
    pub const UBTB_WAYS: usize = 32;
    /// Micro-BTB tag width in bits.
    pub const UBTB_TAG_BITS: usize = 38;

    /// L1 BTB entries.
    pub const BTB_ENTRIES: usize = 2048;
    /// L1 BTB ways per set.
    pub const BTB_WAYS: usize = 8;
    /// L1 BTB tag width in bits.
    pub const BTB_TAG_BITS: usize = 20;
    /// L1 BTB result delay in stages.
    pub const BTB_DELAY: usize = 1;

    /// Number of tagged TAGE tables.
    pub const TAGE_TABLES: usize = 4;
    /// Rows per TAGE table.
    pub const TAGE_TABLE_SIZE: usize = 2048;
    /// TAGE result delay in stages.
    pub const TAGE_DELAY: usize = 1;

    /// Number of tagged ITTAGE tables.
    pub const ITTAGE_TABLES: usize = 4;
    /// ITTAGE result delay in stages.
    pub const ITTAGE_DELAY: usize = 2;

    /// MGSC set associativity.
    pub const MGSC_WAYS: usize = 4;
    /// MGSC perceptron counter width.
    pub const MGSC_COUNTER_WIDTH: usize = 6;
    /// MGSC result delay in stages.
    pub const MGSC_DELAY: usize = 2;
    /// Log2 rows of each MGSC bank table.
    pub const MGSC_LOG_SIZE: usize = 7;
    /// Log2 rows of the per-bank weight tables.
    pub const MGSC_LOG_WEIGHT_SIZE: usize = 7;
    /// Log2 rows of the per-PC threshold table.
    pub const MGSC_THRESHOLD_LOG_SIZE: usize = 8;
    /// Width of the global update-threshold counter.
    pub const MGSC_UPDATE_THRESHOLD_WIDTH: usize = 12;
    /// Width of the per-PC update-threshold counters.
    pub const MGSC_P_UPDATE_THRESHOLD_WIDTH: usize = 8;
    /// Initial per-PC update threshold.
    pub const MGSC_INITIAL_THRESHOLD: u32 = 35;
    /// Width of the per-bank scaling weights.
    pub const MGSC_EXTRA_WEIGHT_WIDTH: usize = 6;
    /// Number of per-PC local history registers.
    pub const MGSC_LOCAL_HISTORIES: usize = 16;

    /// Committed RAS entries.
    pub const RAS_ENTRIES: usize = 16;
    /// Speculative RAS ring entries.
    pub const RAS_INFLIGHT_ENTRIES: usize = 32;
    /// RAS recursion-compression counter width.
    pub const RAS_CTR_WIDTH: usize = 3;
}

/// Configuration error raised at construction time.
///
/// All of these are fatal: the predictor refuses to build with inconsistent
/// geometry rather than mask it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A table dimension must be a power of two.
    #[error("{what} must be a power of two, got {value}")]
    NotPowerOfTwo {
        /// Offending parameter.
        what: &'static str,
        /// Rejected value.
        value: usize,
    },

    /// A capacity must divide evenly into sets.
    #[error("{what}: {entries} entries not divisible by {ways} ways")]
    UnevenSets {
        /// Offending parameter.
        what: &'static str,
        /// Configured entry count.
        entries: usize,
        /// Configured way count.
        ways: usize,
    },

    /// Half-aligned lookup cannot be combined with ahead pipelining.
    #[error("half-aligned BTB lookup is incompatible with ahead-pipelined stages")]
    HalfAlignedAhead,

    /// A per-table parameter vector has the wrong length.
    #[error("{what} must have {expected} elements, got {actual}")]
    LengthMismatch {
        /// Offending parameter.
        what: &'static str,
        /// Required length.
        expected: usize,
        /// Provided length.
        actual: usize,
    },

    /// A parameter must be non-zero.
    #[error("{what} must be non-zero")]
    Zero {
        /// Offending parameter.
        what: &'static str,
    },

    /// A history window exceeds the authoritative register.
    #[error("{what}: history length {len} exceeds history_bits {limit}")]
    HistoryTooLong {
        /// Offending parameter.
        what: &'static str,
        /// Requested window.
        len: usize,
        /// Register length.
        limit: usize,
    },
}

/// Root configuration for the decoupled predictor.
///
/// # Examples
///
/// Deserializing a partial override from JSON:
///
/// ```
/// use bpsim_core::config::Config;
///
/// let json = r#"{
///     "queues": { "fsq_size": 24, "ftq_size": 12 },
///     "pipeline": { "history_bits": 128 },
///     "btb": { "num_entries": 1024, "num_ways": 4 }
/// }"#;
///
/// let config: Config = serde_json::from_str(json).unwrap();
/// assert_eq!(config.queues.fsq_size, 24);
/// assert_eq!(config.btb.num_ways, 4);
/// assert_eq!(config.pipeline.num_stages, 3);
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// FSQ/FTQ capacities.
    #[serde(default)]
    pub queues: QueueConfig,
    /// Pipeline depth and fetch-block geometry.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Zero-bubble micro-BTB.
    #[serde(default = "BtbConfig::default_ubtb")]
    pub ubtb: BtbConfig,
    /// Main (L1) BTB.
    #[serde(default = "BtbConfig::default_l1")]
    pub btb: BtbConfig,
    /// Conditional-direction predictor.
    #[serde(default)]
    pub tage: TageConfig,
    /// Indirect-target predictor.
    #[serde(default)]
    pub ittage: ItageConfig,
    /// Statistical corrector.
    #[serde(default)]
    pub mgsc: MgscConfig,
    /// Return address stack.
    #[serde(default)]
    pub ras: RasConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queues: QueueConfig::default(),
            pipeline: PipelineConfig::default(),
            ubtb: BtbConfig::default_ubtb(),
            btb: BtbConfig::default_l1(),
            tage: TageConfig::default(),
            ittage: ItageConfig::default(),
            mgsc: MgscConfig::default(),
            ras: RasConfig::default(),
        }
    }
}

impl Config {
    /// Checks all fatal geometry constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint; see [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queues.fsq_size == 0 {
            return Err(ConfigError::Zero { what: "fsq_size" });
        }
        if self.queues.ftq_size == 0 {
            return Err(ConfigError::Zero { what: "ftq_size" });
        }
        if self.pipeline.num_stages == 0 {
            return Err(ConfigError::Zero { what: "num_stages" });
        }
        if !self.pipeline.predict_width.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                what: "predict_width",
                value: self.pipeline.predict_width as usize,
            });
        }
        if !self.pipeline.block_size.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                what: "block_size",
                value: self.pipeline.block_size as usize,
            });
        }
        if self.pipeline.max_shamt == 0 {
            return Err(ConfigError::Zero { what: "max_shamt" });
        }
        self.ubtb.validate("ubtb")?;
        self.btb.validate("btb")?;
        self.tage.validate(self.pipeline.history_bits)?;
        self.ittage.validate(self.pipeline.history_bits)?;
        self.mgsc.validate(self.pipeline.history_bits)?;
        self.ras.validate()?;
        Ok(())
    }
}

/// FSQ/FTQ capacities.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Fetch Stream Queue capacity.
    #[serde(default = "QueueConfig::default_fsq")]
    pub fsq_size: usize,
    /// Fetch Target Queue capacity.
    #[serde(default = "QueueConfig::default_ftq")]
    pub ftq_size: usize,
}

impl QueueConfig {
    const fn default_fsq() -> usize {
        defaults::FSQ_SIZE
    }

    const fn default_ftq() -> usize {
        defaults::FTQ_SIZE
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            fsq_size: defaults::FSQ_SIZE,
            ftq_size: defaults::FTQ_SIZE,
        }
    }
}

/// Pipeline depth and fetch-block geometry.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Number of prediction stages.
    #[serde(default = "PipelineConfig::default_stages")]
    pub num_stages: usize,
    /// Maximum fetch-block span in bytes.
    #[serde(default = "PipelineConfig::default_predict_width")]
    pub predict_width: u64,
    /// BTB indexing block size in bytes.
    #[serde(default = "PipelineConfig::default_block_size")]
    pub block_size: u64,
    /// Authoritative global history length.
    #[serde(default = "PipelineConfig::default_history_bits")]
    pub history_bits: usize,
    /// Maximum history shift per block.
    #[serde(default = "PipelineConfig::default_max_shamt")]
    pub max_shamt: usize,
}

impl PipelineConfig {
    const fn default_stages() -> usize {
        defaults::NUM_STAGES
    }

    const fn default_predict_width() -> u64 {
        defaults::PREDICT_WIDTH
    }

    const fn default_block_size() -> u64 {
        defaults::BLOCK_SIZE
    }

    const fn default_history_bits() -> usize {
        defaults::HISTORY_BITS
    }

    const fn default_max_shamt() -> usize {
        defaults::MAX_SHAMT
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_stages: defaults::NUM_STAGES,
            predict_width: defaults::PREDICT_WIDTH,
            block_size: defaults::BLOCK_SIZE,
            history_bits: defaults::HISTORY_BITS,
            max_shamt: defaults::MAX_SHAMT,
        }
    }
}

/// Geometry of one set-associative BTB (used for both uBTB and L1 BTB).
#[derive(Debug, Clone, Deserialize)]
pub struct BtbConfig {
    /// Total entries.
    #[serde(default = "BtbConfig::default_entries")]
    pub num_entries: usize,
    /// Ways per set.
    #[serde(default = "BtbConfig::default_ways")]
    pub num_ways: usize,
    /// Tag width in bits.
    #[serde(default = "BtbConfig::default_tag_bits")]
    pub tag_bits: usize,
    /// Result delay in pipeline stages (0 for the uBTB).
    #[serde(default)]
    pub num_delay_stages: usize,
    /// Sets are read with a PC this many blocks ahead of the tag compare.
    #[serde(default)]
    pub ahead_pipelined_stages: usize,
    /// Look up two consecutive half-width blocks and merge the hits.
    #[serde(default)]
    pub half_aligned: bool,
    /// Index by block-aligned PC (otherwise by halfword PC).
    #[serde(default = "BtbConfig::default_align")]
    pub align_to_block_size: bool,
}

impl BtbConfig {
    const fn default_entries() -> usize {
        defaults::BTB_ENTRIES
    }

    const fn default_ways() -> usize {
        defaults::BTB_WAYS
    }

    const fn default_tag_bits() -> usize {
        defaults::BTB_TAG_BITS
    }

    const fn default_align() -> bool {
        true
    }

    /// Default micro-BTB geometry: small, fully associative, zero delay.
    pub fn default_ubtb() -> Self {
        Self {
            num_entries: defaults::UBTB_ENTRIES,
            num_ways: defaults::UBTB_WAYS,
            tag_bits: defaults::UBTB_TAG_BITS,
            num_delay_stages: 0,
            ahead_pipelined_stages: 0,
            half_aligned: false,
            align_to_block_size: true,
        }
    }

    /// Default main BTB geometry: large, 8-way, one-stage delay.
    pub fn default_l1() -> Self {
        Self {
            num_entries: defaults::BTB_ENTRIES,
            num_ways: defaults::BTB_WAYS,
            tag_bits: defaults::BTB_TAG_BITS,
            num_delay_stages: defaults::BTB_DELAY,
            ahead_pipelined_stages: 0,
            half_aligned: false,
            align_to_block_size: true,
        }
    }

    fn validate(&self, what: &'static str) -> Result<(), ConfigError> {
        if self.num_ways == 0 {
            return Err(ConfigError::Zero { what: "num_ways" });
        }
        if !self.num_entries.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                what: "btb num_entries",
                value: self.num_entries,
            });
        }
        if self.num_entries % self.num_ways != 0 {
            return Err(ConfigError::UnevenSets {
                what,
                entries: self.num_entries,
                ways: self.num_ways,
            });
        }
        if self.half_aligned && self.ahead_pipelined_stages > 0 {
            return Err(ConfigError::HalfAlignedAhead);
        }
        Ok(())
    }
}

impl Default for BtbConfig {
    fn default() -> Self {
        Self::default_l1()
    }
}

/// TAGE geometry: per-table sizes, tag widths, and history lengths.
#[derive(Debug, Clone, Deserialize)]
pub struct TageConfig {
    /// Number of tagged tables.
    #[serde(default = "TageConfig::default_tables")]
    pub num_predictors: usize,
    /// Rows per table.
    #[serde(default = "TageConfig::default_table_sizes")]
    pub table_sizes: Vec<usize>,
    /// Tag width per table.
    #[serde(default = "TageConfig::default_tag_bits")]
    pub tag_bits: Vec<usize>,
    /// History window per table.
    #[serde(default = "TageConfig::default_hist_lengths")]
    pub hist_lengths: Vec<usize>,
    /// Result delay in pipeline stages.
    #[serde(default = "TageConfig::default_delay")]
    pub num_delay_stages: usize,
}

impl TageConfig {
    const fn default_tables() -> usize {
        defaults::TAGE_TABLES
    }

    fn default_table_sizes() -> Vec<usize> {
        vec![defaults::TAGE_TABLE_SIZE; defaults::TAGE_TABLES]
    }

    fn default_tag_bits() -> Vec<usize> {
        vec![8, 8, 8, 8]
    }

    /// Geometric history lengths.
    fn default_hist_lengths() -> Vec<usize> {
        vec![8, 13, 32, 62]
    }

    const fn default_delay() -> usize {
        defaults::TAGE_DELAY
    }

    fn validate(&self, history_bits: usize) -> Result<(), ConfigError> {
        validate_tables(
            "tage",
            self.num_predictors,
            &self.table_sizes,
            &self.tag_bits,
            &self.hist_lengths,
            history_bits,
        )
    }
}

impl Default for TageConfig {
    fn default() -> Self {
        Self {
            num_predictors: Self::default_tables(),
            table_sizes: Self::default_table_sizes(),
            tag_bits: Self::default_tag_bits(),
            hist_lengths: Self::default_hist_lengths(),
            num_delay_stages: Self::default_delay(),
        }
    }
}

/// ITTAGE geometry, same shape as [`TageConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct ItageConfig {
    /// Number of tagged tables.
    #[serde(default = "ItageConfig::default_tables")]
    pub num_predictors: usize,
    /// Rows per table.
    #[serde(default = "ItageConfig::default_table_sizes")]
    pub table_sizes: Vec<usize>,
    /// Tag width per table.
    #[serde(default = "ItageConfig::default_tag_bits")]
    pub tag_bits: Vec<usize>,
    /// History window per table.
    #[serde(default = "ItageConfig::default_hist_lengths")]
    pub hist_lengths: Vec<usize>,
    /// Result delay in pipeline stages.
    #[serde(default = "ItageConfig::default_delay")]
    pub num_delay_stages: usize,
}

impl ItageConfig {
    const fn default_tables() -> usize {
        defaults::ITTAGE_TABLES
    }

    fn default_table_sizes() -> Vec<usize> {
        vec![256, 256, 512, 512]
    }

    fn default_tag_bits() -> Vec<usize> {
        vec![9, 9, 13, 13]
    }

    /// Geometric history lengths, independent of the TAGE windows.
    fn default_hist_lengths() -> Vec<usize> {
        vec![4, 10, 24, 58]
    }

    const fn default_delay() -> usize {
        defaults::ITTAGE_DELAY
    }

    fn validate(&self, history_bits: usize) -> Result<(), ConfigError> {
        validate_tables(
            "ittage",
            self.num_predictors,
            &self.table_sizes,
            &self.tag_bits,
            &self.hist_lengths,
            history_bits,
        )
    }
}

impl Default for ItageConfig {
    fn default() -> Self {
        Self {
            num_predictors: Self::default_tables(),
            table_sizes: Self::default_table_sizes(),
            tag_bits: Self::default_tag_bits(),
            hist_lengths: Self::default_hist_lengths(),
            num_delay_stages: Self::default_delay(),
        }
    }
}

/// One MGSC bank: a family of tables keyed by the same history class.
#[derive(Debug, Clone, Deserialize)]
pub struct MgscBankConfig {
    /// Number of tables in the bank.
    pub num_tables: usize,
    /// Log2 rows per table.
    pub log_size: usize,
    /// History window per table; empty for the bias bank.
    #[serde(default)]
    pub hist_lengths: Vec<usize>,
}

/// MGSC statistical corrector geometry.
#[derive(Debug, Clone, Deserialize)]
pub struct MgscConfig {
    /// Global backward-history bank.
    #[serde(default = "MgscConfig::default_bw")]
    pub backward: MgscBankConfig,
    /// Per-PC local-history bank.
    #[serde(default = "MgscConfig::default_local")]
    pub local: MgscBankConfig,
    /// Inner-most-loop-iteration bank.
    #[serde(default = "MgscConfig::default_imli")]
    pub imli: MgscBankConfig,
    /// Global-history bank.
    #[serde(default = "MgscConfig::default_global")]
    pub global: MgscBankConfig,
    /// Path-history bank.
    #[serde(default = "MgscConfig::default_path")]
    pub path: MgscBankConfig,
    /// Bias bank (history-free).
    #[serde(default = "MgscConfig::default_bias")]
    pub bias: MgscBankConfig,
    /// Ways per table row.
    #[serde(default = "MgscConfig::default_ways")]
    pub num_ways: usize,
    /// Perceptron counter width.
    #[serde(default = "MgscConfig::default_counter_width")]
    pub counter_width: usize,
    /// Log2 rows of the per-bank weight tables.
    #[serde(default = "MgscConfig::default_log_weight_size")]
    pub log_weight_size: usize,
    /// Log2 rows of the per-PC threshold table.
    #[serde(default = "MgscConfig::default_threshold_log_size")]
    pub threshold_log_size: usize,
    /// Width of the global update-threshold counter.
    #[serde(default = "MgscConfig::default_update_threshold_width")]
    pub update_threshold_width: usize,
    /// Width of the per-PC update-threshold counters.
    #[serde(default = "MgscConfig::default_p_update_threshold_width")]
    pub p_update_threshold_width: usize,
    /// Initial per-PC update threshold.
    #[serde(default = "MgscConfig::default_initial_threshold")]
    pub initial_threshold: u32,
    /// Width of the per-bank scaling weights.
    #[serde(default = "MgscConfig::default_extra_weight_width")]
    pub extra_weight_width: usize,
    /// Number of per-PC local history registers.
    #[serde(default = "MgscConfig::default_local_histories")]
    pub num_local_histories: usize,
    /// Result delay in pipeline stages.
    #[serde(default = "MgscConfig::default_delay")]
    pub num_delay_stages: usize,
}

impl MgscConfig {
    fn default_bw() -> MgscBankConfig {
        MgscBankConfig {
            num_tables: 2,
            log_size: defaults::MGSC_LOG_SIZE,
            hist_lengths: vec![10, 22],
        }
    }

    fn default_local() -> MgscBankConfig {
        MgscBankConfig {
            num_tables: 2,
            log_size: defaults::MGSC_LOG_SIZE,
            hist_lengths: vec![4, 11],
        }
    }

    fn default_imli() -> MgscBankConfig {
        MgscBankConfig {
            num_tables: 1,
            log_size: defaults::MGSC_LOG_SIZE,
            hist_lengths: vec![7],
        }
    }

    fn default_global() -> MgscBankConfig {
        MgscBankConfig {
            num_tables: 4,
            log_size: defaults::MGSC_LOG_SIZE,
            hist_lengths: vec![27, 44, 73, 119],
        }
    }

    fn default_path() -> MgscBankConfig {
        MgscBankConfig {
            num_tables: 4,
            log_size: defaults::MGSC_LOG_SIZE,
            hist_lengths: vec![16, 16, 16, 16],
        }
    }

    fn default_bias() -> MgscBankConfig {
        MgscBankConfig {
            num_tables: 1,
            log_size: defaults::MGSC_LOG_SIZE,
            hist_lengths: Vec::new(),
        }
    }

    const fn default_ways() -> usize {
        defaults::MGSC_WAYS
    }

    const fn default_counter_width() -> usize {
        defaults::MGSC_COUNTER_WIDTH
    }

    const fn default_log_weight_size() -> usize {
        defaults::MGSC_LOG_WEIGHT_SIZE
    }

    const fn default_threshold_log_size() -> usize {
        defaults::MGSC_THRESHOLD_LOG_SIZE
    }

    const fn default_update_threshold_width() -> usize {
        defaults::MGSC_UPDATE_THRESHOLD_WIDTH
    }

    const fn default_p_update_threshold_width() -> usize {
        defaults::MGSC_P_UPDATE_THRESHOLD_WIDTH
    }

    const fn default_initial_threshold() -> u32 {
        defaults::MGSC_INITIAL_THRESHOLD
    }

    const fn default_extra_weight_width() -> usize {
        defaults::MGSC_EXTRA_WEIGHT_WIDTH
    }

    const fn default_local_histories() -> usize {
        defaults::MGSC_LOCAL_HISTORIES
    }

    const fn default_delay() -> usize {
        defaults::MGSC_DELAY
    }

    fn validate(&self, history_bits: usize) -> Result<(), ConfigError> {
        for (what, bank) in [
            ("mgsc backward", &self.backward),
            ("mgsc local", &self.local),
            ("mgsc imli", &self.imli),
            ("mgsc global", &self.global),
            ("mgsc path", &self.path),
        ] {
            if bank.hist_lengths.len() != bank.num_tables {
                return Err(ConfigError::LengthMismatch {
                    what,
                    expected: bank.num_tables,
                    actual: bank.hist_lengths.len(),
                });
            }
            for &len in &bank.hist_lengths {
                if len > history_bits {
                    return Err(ConfigError::HistoryTooLong {
                        what,
                        len,
                        limit: history_bits,
                    });
                }
            }
        }
        if self.num_ways == 0 {
            return Err(ConfigError::Zero { what: "mgsc num_ways" });
        }
        if !self.num_local_histories.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                what: "mgsc num_local_histories",
                value: self.num_local_histories,
            });
        }
        Ok(())
    }
}

impl Default for MgscConfig {
    fn default() -> Self {
        Self {
            backward: Self::default_bw(),
            local: Self::default_local(),
            imli: Self::default_imli(),
            global: Self::default_global(),
            path: Self::default_path(),
            bias: Self::default_bias(),
            num_ways: Self::default_ways(),
            counter_width: Self::default_counter_width(),
            log_weight_size: Self::default_log_weight_size(),
            threshold_log_size: Self::default_threshold_log_size(),
            update_threshold_width: Self::default_update_threshold_width(),
            p_update_threshold_width: Self::default_p_update_threshold_width(),
            initial_threshold: Self::default_initial_threshold(),
            extra_weight_width: Self::default_extra_weight_width(),
            num_local_histories: Self::default_local_histories(),
            num_delay_stages: Self::default_delay(),
        }
    }
}

/// Two-level return address stack geometry.
#[derive(Debug, Clone, Deserialize)]
pub struct RasConfig {
    /// Committed stack entries.
    #[serde(default = "RasConfig::default_entries")]
    pub num_entries: usize,
    /// Speculative inflight ring entries.
    #[serde(default = "RasConfig::default_inflight")]
    pub num_inflight_entries: usize,
    /// Recursion-compression counter width.
    #[serde(default = "RasConfig::default_ctr_width")]
    pub ctr_width: usize,
}

impl RasConfig {
    const fn default_entries() -> usize {
        defaults::RAS_ENTRIES
    }

    const fn default_inflight() -> usize {
        defaults::RAS_INFLIGHT_ENTRIES
    }

    const fn default_ctr_width() -> usize {
        defaults::RAS_CTR_WIDTH
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.num_entries == 0 {
            return Err(ConfigError::Zero { what: "ras num_entries" });
        }
        if self.num_inflight_entries == 0 {
            return Err(ConfigError::Zero {
                what: "ras num_inflight_entries",
            });
        }
        if self.ctr_width == 0 {
            return Err(ConfigError::Zero { what: "ras ctr_width" });
        }
        Ok(())
    }
}

impl Default for RasConfig {
    fn default() -> Self {
        Self {
            num_entries: defaults::RAS_ENTRIES,
            num_inflight_entries: defaults::RAS_INFLIGHT_ENTRIES,
            ctr_width: defaults::RAS_CTR_WIDTH,
        }
    }
}

fn validate_tables(
    what: &'static str,
    num_predictors: usize,
    table_sizes: &[usize],
    tag_bits: &[usize],
    hist_lengths: &[usize],
    history_bits: usize,
) -> Result<(), ConfigError> {
    if num_predictors == 0 {
        return Err(ConfigError::Zero {
            what: "num_predictors",
        });
    }
    for len in [table_sizes.len(), tag_bits.len(), hist_lengths.len()] {
        if len != num_predictors {
            return Err(ConfigError::LengthMismatch {
                what,
                expected: num_predictors,
                actual: len,
            });
        }
    }
    for &size in table_sizes {
        if !size.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                what: "table size",
                value: size,
            });
        }
    }
    for &len in hist_lengths {
        if len > history_bits {
            return Err(ConfigError::HistoryTooLong {
                what,
                len,
                limit: history_bits,
            });
        }
    }
    Ok(())
}
