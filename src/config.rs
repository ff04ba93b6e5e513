//! Engine configuration
//!
//! The interpolation preference and ECL method are explicit values threaded
//! through each stage rather than read from a shared preferences row.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ecl::EclMethod;
use crate::error::Result;
use crate::pd::{ChunkSchedule, InterpolationMethod};

fn default_interpolation() -> InterpolationMethod { InterpolationMethod::Poisson }
fn default_decay() -> f64 { 0.1 }
fn default_ecl_method() -> EclMethod { EclMethod::SimpleEad }
fn default_true() -> bool { true }
fn default_concurrency() -> usize { 10 }
fn default_timeout_secs() -> u64 { 30 }
fn default_max_schedule_rows() -> usize { crate::projection::DEFAULT_MAX_SCHEDULE_ROWS }
fn default_batch_sizes() -> Vec<usize> { vec![500, 50, 1] }
fn default_pause_ms() -> u64 { 50 }
fn default_delinquency_days() -> u32 { 90 }

/// Configuration for a calculation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// PD interpolation model (default: Poisson)
    #[serde(default = "default_interpolation")]
    pub interpolation_method: InterpolationMethod,

    /// Decay constant for the exponential-decay model (default: 0.1)
    #[serde(default = "default_decay")]
    pub exponential_decay: f64,

    /// ECL aggregation method (default: simple_ead)
    #[serde(default = "default_ecl_method")]
    pub ecl_method: EclMethod,

    /// Use the discounted shortfall column in the cash_flow method (default: true)
    #[serde(default = "default_true")]
    pub discount_cash_shortfall: bool,

    /// Accounts projected concurrently (default: 10)
    #[serde(default = "default_concurrency")]
    pub projection_concurrency: usize,

    /// Wall-clock limit for one account's projection (default: 30s)
    #[serde(default = "default_timeout_secs")]
    pub account_timeout_secs: u64,

    /// Explicit schedule rows read per account (default: 1000)
    #[serde(default = "default_max_schedule_rows")]
    pub max_schedule_rows: usize,

    /// Chunk sizes for bulk upserts, largest first (default: 500, 50, 1)
    #[serde(default = "default_batch_sizes")]
    pub batch_sizes: Vec<usize>,

    /// Pause between committed batches (default: 50ms)
    #[serde(default = "default_pause_ms")]
    pub inter_batch_pause_ms: u64,

    /// Days past due at which PD is forced to 1 (default: 90)
    #[serde(default = "default_delinquency_days")]
    pub delinquency_default_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interpolation_method: default_interpolation(),
            exponential_decay: default_decay(),
            ecl_method: default_ecl_method(),
            discount_cash_shortfall: true,
            projection_concurrency: default_concurrency(),
            account_timeout_secs: default_timeout_secs(),
            max_schedule_rows: default_max_schedule_rows(),
            batch_sizes: default_batch_sizes(),
            inter_batch_pause_ms: default_pause_ms(),
            delinquency_default_days: default_delinquency_days(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Chunk schedule for bulk writes
    pub fn chunk_schedule(&self) -> ChunkSchedule {
        ChunkSchedule::new(self.batch_sizes.clone())
    }

    /// Config for tests and tight loops: no inter-batch pause
    pub fn without_pauses(mut self) -> Self {
        self.inter_batch_pause_ms = 0;
        self
    }
}
