//! Cashflow projection for single accounts and whole portfolios

mod cashflows;
mod engine;
mod runner;
mod state;

pub use cashflows::{CashflowBucket, CashflowType, ProjectionResult, ProjectionSummary};
pub use engine::{CashflowGenerator, ProjectionConfig, DEFAULT_MAX_SCHEDULE_ROWS};
pub use runner::PortfolioProjector;
pub use state::ProjectionState;
