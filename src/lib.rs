//! ECL Engine - batch IFRS9 expected credit loss calculation for loan portfolios
//!
//! This library provides:
//! - Cashflow projection per account (schedule- or formula-driven)
//! - Versioned persistence of projected cashflows under run keys
//! - Discounting at the effective interest rate
//! - PD curve interpolation (Poisson, geometric, arithmetic, exponential decay)
//! - PD assignment by rating or delinquency band with chunked, degrading writes
//! - Loss enrichment and ECL aggregation (simple EAD, cash flow, forward exposure)

pub mod account;
pub mod config;
pub mod daycount;
pub mod discount;
pub mod ecl;
pub mod error;
pub mod pd;
pub mod persistence;
pub mod pipeline;
pub mod projection;
pub mod store;

#[cfg(test)]
pub(crate) mod fixtures;

// Re-export commonly used types
pub use account::{AccountSnapshot, PortfolioInputs, StageDetermination};
pub use config::EngineConfig;
pub use ecl::{EclMethod, ReportingLine};
pub use error::{EclError, Result};
pub use pd::InterpolationMethod;
pub use persistence::RunKey;
pub use pipeline::{Pipeline, PipelineReport, Stage, StageOutcome};
pub use projection::{CashflowGenerator, ProjectionResult};
pub use store::{EclStore, InMemoryStore, SharedStore};
