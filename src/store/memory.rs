//! In-memory store
//!
//! All tables sit behind one async `RwLock`, so every trait method executes as
//! a single atomic statement: writers validate the whole batch before touching
//! any row. Readers never observe a half-applied write.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use super::EclStore;
use crate::account::{AccountSnapshot, PaymentScheduleRow, PortfolioInputs, StageDetermination};
use crate::ecl::{EclMethod, EclUpdate, ReportingLine};
use crate::error::{EclError, Result};
use crate::pd::{PdAssignment, PdCurvePoint, PdTermStructure, PdTermStructureDetail};
use crate::persistence::{FinancialCashflow, RunKey};
use crate::projection::CashflowBucket;

type AccountKey = (NaiveDate, String);

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountKey, AccountSnapshot>,
    schedules: HashMap<String, Vec<PaymentScheduleRow>>,
    stages: BTreeMap<AccountKey, StageDetermination>,
    structures: BTreeMap<String, PdTermStructure>,
    details: Vec<PdTermStructureDetail>,
    buckets: BTreeMap<AccountKey, Vec<CashflowBucket>>,
    runs: BTreeSet<RunKey>,
    financial: BTreeMap<(NaiveDate, RunKey, String, u32), FinancialCashflow>,
    pd_curves: BTreeMap<AccountKey, Vec<PdCurvePoint>>,
    pd_assignments: BTreeMap<(NaiveDate, RunKey, String), PdAssignment>,
    reporting: BTreeMap<(RunKey, NaiveDate, String), ReportingLine>,
}

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

fn valid_probability(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

fn check_finite(label: &str, account_id: &str, values: &[f64]) -> Result<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(EclError::Constraint(format!(
            "non-finite {} for account {}",
            label, account_id
        )))
    }
}

impl InMemoryStore {
    /// Creates a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-loaded with portfolio inputs
    pub fn from_inputs(inputs: PortfolioInputs) -> Self {
        let mut tables = Tables::default();

        for account in inputs.accounts {
            tables
                .accounts
                .insert((account.as_of, account.account_id.clone()), account);
        }
        for row in inputs.schedules {
            tables
                .schedules
                .entry(row.account_id.clone())
                .or_default()
                .push(row);
        }
        for rows in tables.schedules.values_mut() {
            rows.sort_by_key(|r| r.payment_date);
        }
        for stage in inputs.stages {
            tables
                .stages
                .insert((stage.as_of, stage.account_id.clone()), stage);
        }
        for structure in inputs.structures {
            tables.structures.insert(structure.id.clone(), structure);
        }
        tables.details = inputs.details;

        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Number of staging buckets across all accounts
    pub async fn bucket_count(&self) -> usize {
        self.tables.read().await.buckets.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl EclStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn accounts(&self, as_of: NaiveDate) -> Result<Vec<AccountSnapshot>> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .values()
            .filter(|a| a.as_of == as_of)
            .cloned()
            .collect())
    }

    async fn account(&self, as_of: NaiveDate, account_id: &str) -> Result<Option<AccountSnapshot>> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .get(&(as_of, account_id.to_string()))
            .cloned())
    }

    async fn payment_schedule(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<PaymentScheduleRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .schedules
            .get(account_id)
            .map(|rows| rows.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn stage_determinations(&self, as_of: NaiveDate) -> Result<Vec<StageDetermination>> {
        let tables = self.tables.read().await;
        Ok(tables
            .stages
            .values()
            .filter(|s| s.as_of == as_of)
            .cloned()
            .collect())
    }

    async fn term_structures(&self) -> Result<Vec<PdTermStructure>> {
        Ok(self.tables.read().await.structures.values().cloned().collect())
    }

    async fn term_structure_details(&self) -> Result<Vec<PdTermStructureDetail>> {
        Ok(self.tables.read().await.details.clone())
    }

    async fn replace_buckets(
        &self,
        as_of: NaiveDate,
        account_id: &str,
        buckets: Vec<CashflowBucket>,
    ) -> Result<()> {
        for (i, bucket) in buckets.iter().enumerate() {
            if bucket.bucket_index != i as u32 + 1 {
                return Err(EclError::Constraint(format!(
                    "bucket indices for {} are not contiguous from 1",
                    account_id
                )));
            }
            check_finite(
                "bucket amount",
                account_id,
                &[bucket.principal, bucket.interest, bucket.closing_balance],
            )?;
        }

        let mut tables = self.tables.write().await;
        tables.buckets.insert((as_of, account_id.to_string()), buckets);
        Ok(())
    }

    async fn buckets(&self, as_of: NaiveDate, account_id: &str) -> Result<Vec<CashflowBucket>> {
        let tables = self.tables.read().await;
        Ok(tables
            .buckets
            .get(&(as_of, account_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn latest_run_key(&self) -> Result<Option<RunKey>> {
        Ok(self.tables.read().await.runs.iter().next_back().copied())
    }

    async fn record_run(&self, run_key: RunKey) -> Result<()> {
        self.tables.write().await.runs.insert(run_key);
        Ok(())
    }

    async fn copy_buckets_to_financial(&self, as_of: NaiveDate, run_key: RunKey) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let Tables {
            buckets, financial, ..
        } = &mut *tables;

        financial.retain(|(date, run, _, _), _| !(*date == as_of && *run == run_key));

        let mut copied = 0;
        for ((date, account_id), rows) in buckets.iter() {
            if *date != as_of {
                continue;
            }
            for bucket in rows {
                financial.insert(
                    (as_of, run_key, account_id.clone(), bucket.bucket_index),
                    FinancialCashflow::from_bucket(bucket, run_key),
                );
                copied += 1;
            }
        }
        Ok(copied)
    }

    async fn financial_cashflows(
        &self,
        as_of: NaiveDate,
        run_key: RunKey,
    ) -> Result<Vec<FinancialCashflow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .financial
            .values()
            .filter(|r| r.as_of == as_of && r.run_key == run_key)
            .cloned()
            .collect())
    }

    async fn update_financial_cashflows(&self, rows: Vec<FinancialCashflow>) -> Result<usize> {
        let mut tables = self.tables.write().await;

        for row in &rows {
            let key = (row.as_of, row.run_key, row.account_id.clone(), row.bucket_index);
            if !tables.financial.contains_key(&key) {
                return Err(EclError::Constraint(format!(
                    "no versioned cashflow for account {} bucket {} run {}",
                    row.account_id, row.bucket_index, row.run_key
                )));
            }
            let enriched: Vec<f64> = [
                row.discount_factor,
                row.cumulative_pd,
                row.cash_shortfall,
                row.forward_expected_loss,
            ]
            .iter()
            .flatten()
            .copied()
            .collect();
            check_finite("enrichment value", &row.account_id, &enriched)?;
        }

        let count = rows.len();
        for row in rows {
            let key = (row.as_of, row.run_key, row.account_id.clone(), row.bucket_index);
            tables.financial.insert(key, row);
        }
        Ok(count)
    }

    async fn replace_pd_curve(
        &self,
        as_of: NaiveDate,
        account_id: &str,
        points: Vec<PdCurvePoint>,
    ) -> Result<()> {
        if let Some(bad) = points.iter().find(|p| !valid_probability(p.cumulative_pd)) {
            return Err(EclError::Constraint(format!(
                "cumulative PD {} out of range for account {}",
                bad.cumulative_pd, account_id
            )));
        }
        let mut tables = self.tables.write().await;
        tables.pd_curves.insert((as_of, account_id.to_string()), points);
        Ok(())
    }

    async fn pd_curves(&self, as_of: NaiveDate) -> Result<Vec<PdCurvePoint>> {
        let tables = self.tables.read().await;
        Ok(tables
            .pd_curves
            .iter()
            .filter(|((date, _), _)| *date == as_of)
            .flat_map(|(_, points)| points.iter().cloned())
            .collect())
    }

    async fn upsert_pd_assignments(&self, rows: Vec<PdAssignment>) -> Result<usize> {
        if let Some(bad) = rows
            .iter()
            .find(|r| !valid_probability(r.pd_12m) || !valid_probability(r.pd_lifetime))
        {
            return Err(EclError::Constraint(format!(
                "PD out of range for account {} (12m {}, lifetime {})",
                bad.account_id, bad.pd_12m, bad.pd_lifetime
            )));
        }

        let mut tables = self.tables.write().await;
        let count = rows.len();
        for row in rows {
            tables
                .pd_assignments
                .insert((row.as_of, row.run_key, row.account_id.clone()), row);
        }
        Ok(count)
    }

    async fn pd_assignments(&self, as_of: NaiveDate, run_key: RunKey) -> Result<Vec<PdAssignment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .pd_assignments
            .values()
            .filter(|a| a.as_of == as_of && a.run_key == run_key)
            .cloned()
            .collect())
    }

    async fn insert_missing_reporting_lines(&self, lines: Vec<ReportingLine>) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let mut inserted = 0;
        for line in lines {
            let key = (line.run_key, line.as_of, line.account_id.clone());
            if let std::collections::btree_map::Entry::Vacant(slot) = tables.reporting.entry(key) {
                slot.insert(line);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn reporting_lines(&self, as_of: NaiveDate, run_key: RunKey) -> Result<Vec<ReportingLine>> {
        let tables = self.tables.read().await;
        Ok(tables
            .reporting
            .values()
            .filter(|l| l.as_of == as_of && l.run_key == run_key)
            .cloned()
            .collect())
    }

    async fn apply_ecl(
        &self,
        as_of: NaiveDate,
        run_key: RunKey,
        method: EclMethod,
        updates: Vec<EclUpdate>,
    ) -> Result<usize> {
        let mut tables = self.tables.write().await;

        for update in &updates {
            if !tables
                .reporting
                .contains_key(&(run_key, as_of, update.account_id.clone()))
            {
                return Err(EclError::Constraint(format!(
                    "no reporting line for account {} in run {}",
                    update.account_id, run_key
                )));
            }
            check_finite(
                "ECL",
                &update.account_id,
                &[update.ecl_12m, update.ecl_lifetime, update.final_ecl],
            )?;
        }

        let count = updates.len();
        for update in updates {
            if let Some(line) = tables
                .reporting
                .get_mut(&(run_key, as_of, update.account_id.clone()))
            {
                line.ecl_12m = Some(update.ecl_12m);
                line.ecl_lifetime = Some(update.ecl_lifetime);
                line.final_ecl = Some(update.final_ecl);
                line.method = Some(method);
            }
        }
        Ok(count)
    }
}
