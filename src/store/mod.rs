//! Relational store interface used by every stage
//!
//! Each method corresponds to one set-based statement against the backing
//! tables. Multi-row writes are atomic: either every row lands or none does,
//! which is what lets a failed ECL method roll back cleanly and what the
//! chunked-write cascade relies on to isolate a bad row.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::account::{AccountSnapshot, PaymentScheduleRow, StageDetermination};
use crate::ecl::{EclMethod, EclUpdate, ReportingLine};
use crate::error::Result;
use crate::pd::{PdAssignment, PdCurvePoint, PdTermStructure, PdTermStructureDetail};
use crate::persistence::{FinancialCashflow, RunKey};
use crate::projection::CashflowBucket;

pub use memory::InMemoryStore;

/// Shared handle passed to workers
pub type SharedStore = Arc<dyn EclStore>;

#[async_trait]
pub trait EclStore: Send + Sync {
    /// Name of the backend, for logging
    fn backend_name(&self) -> &'static str;

    // ---- Inputs owned by external collaborators ----

    /// Account snapshots for one as-of date
    async fn accounts(&self, as_of: NaiveDate) -> Result<Vec<AccountSnapshot>>;

    /// One account snapshot
    async fn account(&self, as_of: NaiveDate, account_id: &str) -> Result<Option<AccountSnapshot>>;

    /// Explicit schedule rows for an account, ordered by date, at most `limit`
    async fn payment_schedule(&self, account_id: &str, limit: usize)
        -> Result<Vec<PaymentScheduleRow>>;

    /// Stage-determination records for one as-of date
    async fn stage_determinations(&self, as_of: NaiveDate) -> Result<Vec<StageDetermination>>;

    /// All PD term structures
    async fn term_structures(&self) -> Result<Vec<PdTermStructure>>;

    /// Bulk fetch of every term-structure detail row
    async fn term_structure_details(&self) -> Result<Vec<PdTermStructureDetail>>;

    // ---- Expected cashflow staging ----

    /// Delete then insert all buckets for (as_of, account)
    async fn replace_buckets(
        &self,
        as_of: NaiveDate,
        account_id: &str,
        buckets: Vec<CashflowBucket>,
    ) -> Result<()>;

    /// Buckets for (as_of, account) in index order
    async fn buckets(&self, as_of: NaiveDate, account_id: &str) -> Result<Vec<CashflowBucket>>;

    // ---- Runs and versioned cashflows ----

    async fn latest_run_key(&self) -> Result<Option<RunKey>>;

    async fn record_run(&self, run_key: RunKey) -> Result<()>;

    /// INSERT … SELECT of every staging bucket for `as_of` under `run_key`,
    /// replacing whatever that (as_of, run) slice held; returns rows copied
    async fn copy_buckets_to_financial(&self, as_of: NaiveDate, run_key: RunKey) -> Result<usize>;

    async fn financial_cashflows(
        &self,
        as_of: NaiveDate,
        run_key: RunKey,
    ) -> Result<Vec<FinancialCashflow>>;

    /// Update existing versioned rows in place; fails without writing if any row is missing
    async fn update_financial_cashflows(&self, rows: Vec<FinancialCashflow>) -> Result<usize>;

    // ---- PD curves and assignments ----

    /// Delete then insert the interpolated curve for (as_of, account)
    async fn replace_pd_curve(
        &self,
        as_of: NaiveDate,
        account_id: &str,
        points: Vec<PdCurvePoint>,
    ) -> Result<()>;

    async fn pd_curves(&self, as_of: NaiveDate) -> Result<Vec<PdCurvePoint>>;

    /// Insert-or-update keyed by (account, as_of, run)
    async fn upsert_pd_assignments(&self, rows: Vec<PdAssignment>) -> Result<usize>;

    async fn pd_assignments(&self, as_of: NaiveDate, run_key: RunKey) -> Result<Vec<PdAssignment>>;

    // ---- Reporting lines ----

    /// Insert lines whose (run, as_of, account) is not yet present; returns rows inserted
    async fn insert_missing_reporting_lines(&self, lines: Vec<ReportingLine>) -> Result<usize>;

    async fn reporting_lines(&self, as_of: NaiveDate, run_key: RunKey) -> Result<Vec<ReportingLine>>;

    /// Write ECL figures onto existing lines in one transaction
    async fn apply_ecl(
        &self,
        as_of: NaiveDate,
        run_key: RunKey,
        method: EclMethod,
        updates: Vec<EclUpdate>,
    ) -> Result<usize>;
}
