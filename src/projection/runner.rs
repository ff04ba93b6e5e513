//! Portfolio projection over the store
//!
//! Accounts of one as-of date are projected concurrently through a bounded
//! worker pool. Each account runs under its own wall-clock timeout; a bad or
//! slow account is recorded as a failure and the batch carries on.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::engine::{CashflowGenerator, ProjectionConfig};
use crate::account::AccountSnapshot;
use crate::config::EngineConfig;
use crate::error::{EclError, Result};
use crate::pipeline::StageOutcome;
use crate::store::{EclStore, SharedStore};

/// Runs the generator over every account of an as-of date
#[derive(Clone)]
pub struct PortfolioProjector {
    store: SharedStore,
    generator: Arc<CashflowGenerator>,
    concurrency: usize,
    account_timeout: Duration,
}

impl PortfolioProjector {
    pub fn new(store: SharedStore, config: &EngineConfig) -> Self {
        Self {
            store,
            generator: Arc::new(CashflowGenerator::new(ProjectionConfig {
                max_schedule_rows: config.max_schedule_rows,
            })),
            concurrency: config.projection_concurrency.max(1),
            account_timeout: Duration::from_secs(config.account_timeout_secs),
        }
    }

    /// Project and stage every account for `as_of`
    pub async fn project_portfolio(&self, as_of: NaiveDate) -> StageOutcome {
        let mut outcome = StageOutcome::new("project_cashflows");

        let accounts = match self.store.accounts(as_of).await {
            Ok(accounts) => accounts,
            Err(e) => return outcome.fatal(e),
        };
        log::info!(
            "Projecting {} accounts for {} (concurrency {})",
            accounts.len(),
            as_of,
            self.concurrency
        );

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();

        for account in accounts {
            let permits = Arc::clone(&permits);
            let projector = self.clone();
            workers.spawn(async move {
                let account_id = account.account_id.clone();
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => projector.project_with_timeout(account).await,
                    Err(e) => Err(EclError::Worker(e.to_string())),
                };
                (account_id, result)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((_, Ok(_buckets))) => outcome.processed += 1,
                Ok((account_id, Err(e))) => outcome.record_failure(&account_id, &e),
                Err(e) => outcome.record_failure("<worker>", &EclError::Worker(e.to_string())),
            }
        }

        log::info!(
            "Projection for {}: {} accounts staged, {} failed",
            as_of,
            outcome.processed,
            outcome.failures.len()
        );
        outcome
    }

    /// Project a single account by id
    pub async fn project_single(&self, as_of: NaiveDate, account_id: &str) -> Result<usize> {
        let account = self
            .store
            .account(as_of, account_id)
            .await?
            .ok_or_else(|| EclError::invalid_dates(account_id, "no snapshot for as-of date"))?;
        self.project_with_timeout(account).await
    }

    async fn project_with_timeout(&self, account: AccountSnapshot) -> Result<usize> {
        let account_id = account.account_id.clone();
        match tokio::time::timeout(self.account_timeout, self.project_and_stage(account)).await {
            Ok(result) => result,
            Err(_) => Err(EclError::Timeout {
                account_id,
                seconds: self.account_timeout.as_secs(),
            }),
        }
    }

    /// Project one account and replace its staging buckets; returns the bucket count
    async fn project_and_stage(&self, account: AccountSnapshot) -> Result<usize> {
        let store: &dyn EclStore = self.store.as_ref();
        let schedule = store
            .payment_schedule(&account.account_id, self.generator.config().max_schedule_rows)
            .await?;
        let result = self.generator.project_account(&account, &schedule)?;
        let count = result.buckets.len();
        log::debug!(
            "Account {}: {} buckets ({})",
            account.account_id,
            count,
            if result.schedule_driven { "schedule" } else { "formula" }
        );
        store
            .replace_buckets(account.as_of, &account.account_id, result.buckets)
            .await?;
        Ok(count)
    }
}
