//! Run versioning and staging → versioned cashflow persistence
//!
//! A run key is a monotonically increasing integer identifying one calculation
//! batch. Every downstream row is tagged with the run it belongs to, so several
//! vintages can coexist for the same as-of date.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pipeline::StageOutcome;
use crate::projection::{CashflowBucket, CashflowType};
use crate::store::EclStore;

/// Run key used when no run has ever been recorded
pub const INITIAL_RUN_KEY: RunKey = RunKey(1);

/// Identifier of one calculation batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunKey(pub i64);

impl RunKey {
    pub fn next(self) -> Self {
        RunKey(self.0 + 1)
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cashflow bucket copied under a run key and enriched by later stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialCashflow {
    pub run_key: RunKey,
    pub as_of: NaiveDate,
    pub account_id: String,
    pub bucket_index: u32,
    pub date: NaiveDate,
    pub principal: f64,
    pub interest: f64,
    pub total: f64,
    pub closing_balance: f64,
    pub accrued_interest: f64,
    pub cashflow_type: CashflowType,

    // Discounting
    pub discount_rate: Option<f64>,
    pub discount_factor: Option<f64>,

    // Loss enrichment
    pub lgd: Option<f64>,
    pub pd_bucket: Option<u32>,
    pub cumulative_pd: Option<f64>,
    pub marginal_pd: Option<f64>,
    pub twelve_month_pd: Option<f64>,
    pub cash_shortfall: Option<f64>,
    pub cash_shortfall_discounted: Option<f64>,
    pub forward_expected_loss: Option<f64>,
    pub within_12_months: bool,
}

impl FinancialCashflow {
    /// Copy a staging bucket under `run_key` with no enrichment yet
    pub fn from_bucket(bucket: &CashflowBucket, run_key: RunKey) -> Self {
        Self {
            run_key,
            as_of: bucket.as_of,
            account_id: bucket.account_id.clone(),
            bucket_index: bucket.bucket_index,
            date: bucket.date,
            principal: bucket.principal,
            interest: bucket.interest,
            total: bucket.total,
            closing_balance: bucket.closing_balance,
            accrued_interest: bucket.accrued_interest,
            cashflow_type: bucket.cashflow_type,
            discount_rate: None,
            discount_factor: None,
            lgd: None,
            pd_bucket: None,
            cumulative_pd: None,
            marginal_pd: None,
            twelve_month_pd: None,
            cash_shortfall: None,
            cash_shortfall_discounted: None,
            forward_expected_loss: None,
            within_12_months: false,
        }
    }

    /// Balance before this bucket's principal is paid
    pub fn opening_balance(&self) -> f64 {
        self.closing_balance + self.principal
    }
}

/// Resolve the run key for downstream stages
///
/// Returns the most recently recorded key, or 1 when none exists. This reuses
/// the latest existing key rather than allocating a new one; call
/// [`register_next_run`] to start a new vintage.
pub async fn resolve_run_key(store: &dyn EclStore) -> Result<RunKey> {
    Ok(store.latest_run_key().await?.unwrap_or(INITIAL_RUN_KEY))
}

/// Record and return a new run key (latest + 1, or 1)
pub async fn register_next_run(store: &dyn EclStore) -> Result<RunKey> {
    let next = match store.latest_run_key().await? {
        Some(latest) => latest.next(),
        None => INITIAL_RUN_KEY,
    };
    store.record_run(next).await?;
    log::info!("Registered run {}", next);
    Ok(next)
}

/// Copy every staging bucket for `as_of` into the versioned table under the resolved run
///
/// Re-running replaces the (as_of, run) slice rather than appending to it.
pub async fn persist_cashflows(store: &dyn EclStore, as_of: NaiveDate) -> StageOutcome {
    let mut outcome = StageOutcome::new("persist_cashflows");

    let run_key = match resolve_run_key(store).await {
        Ok(key) => key,
        Err(e) => return outcome.fatal(e),
    };

    match store.copy_buckets_to_financial(as_of, run_key).await {
        Ok(copied) => {
            log::info!("Persisted {} cashflow rows for {} under run {}", copied, as_of, run_key);
            outcome.processed = copied;
            outcome
        }
        Err(e) => outcome.fatal(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
    }

    fn bucket(account: &str, index: u32) -> CashflowBucket {
        CashflowBucket {
            as_of: as_of(),
            account_id: account.to_string(),
            bucket_index: index,
            date: as_of() + chrono::Duration::days(30 * index as i64),
            principal: 100.0,
            interest: 5.0,
            total: 105.0,
            closing_balance: 1000.0 - 100.0 * index as f64,
            accrued_interest: 1.0,
            cashflow_type: CashflowType::Mixed,
        }
    }

    #[tokio::test]
    async fn test_run_key_defaults_to_one() {
        let store = InMemoryStore::new();
        assert_eq!(resolve_run_key(&store).await.unwrap(), RunKey(1));
    }

    #[tokio::test]
    async fn test_run_key_returns_latest_existing() {
        let store = InMemoryStore::new();
        store.record_run(RunKey(3)).await.unwrap();
        store.record_run(RunKey(5)).await.unwrap();
        assert_eq!(resolve_run_key(&store).await.unwrap(), RunKey(5));
    }

    #[tokio::test]
    async fn test_register_next_run() {
        let store = InMemoryStore::new();
        assert_eq!(register_next_run(&store).await.unwrap(), RunKey(1));
        assert_eq!(register_next_run(&store).await.unwrap(), RunKey(2));
        assert_eq!(resolve_run_key(&store).await.unwrap(), RunKey(2));
    }

    #[tokio::test]
    async fn test_persist_is_idempotent() {
        let store = InMemoryStore::new();
        store
            .replace_buckets(as_of(), "A1", vec![bucket("A1", 1), bucket("A1", 2)])
            .await
            .unwrap();
        store
            .replace_buckets(as_of(), "A2", vec![bucket("A2", 1)])
            .await
            .unwrap();

        let first = persist_cashflows(&store, as_of()).await;
        assert!(first.succeeded);
        assert_eq!(first.processed, 3);

        let second = persist_cashflows(&store, as_of()).await;
        assert!(second.succeeded);

        let rows = store.financial_cashflows(as_of(), RunKey(1)).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.run_key == RunKey(1) && r.discount_factor.is_none()));
    }
}
