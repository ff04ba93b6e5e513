//! PD assignment: match each account's 12-month and lifetime buckets onto its
//! term structure and write the PDs back for the current run

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;

use super::batch::write_in_chunks;
use super::cache::PdLookupCache;
use super::{PdAssignment, PdTermStructure, StructureType};
use crate::account::{stages_by_account, AccountSnapshot, StageDetermination};
use crate::config::EngineConfig;
use crate::daycount::months_between;
use crate::error::{EclError, Result};
use crate::persistence::{resolve_run_key, RunKey};
use crate::pipeline::StageOutcome;
use crate::store::EclStore;

/// Delinquency band label for a days-past-due count
pub fn delinquency_band(days_past_due: u32) -> &'static str {
    match days_past_due {
        0 => "0",
        1..=30 => "1-30",
        31..=60 => "31-60",
        61..=89 => "61-89",
        _ => "90+",
    }
}

/// Where an account sits on its term structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketPlacement {
    pub months_to_maturity: u32,
    /// Bucket used for the 12-month PD, capped at one year
    pub twelve_month_bucket: u32,
    /// Bucket at the account's (effective) maturity
    pub lifetime_bucket: u32,
    /// Rating grade or delinquency band used as the lookup key
    pub band: String,
}

impl BucketPlacement {
    pub fn compute(
        structure: &PdTermStructure,
        account: &AccountSnapshot,
        stage: &StageDetermination,
        as_of: NaiveDate,
    ) -> Result<Self> {
        let maturity = account
            .maturity_date
            .ok_or_else(|| EclError::invalid_dates(&account.account_id, "missing maturity date"))?;

        let band = match structure.structure_type {
            StructureType::Rating => stage
                .rating
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or_else(|| EclError::MissingRating(account.account_id.clone()))?
                .to_string(),
            StructureType::Delinquency => delinquency_band(stage.days_past_due).to_string(),
        };

        let months = months_to(structure.structure_type, maturity, account.next_payment_date, as_of);
        Ok(Self::from_months(months, structure.bucket_size_months(), band))
    }

    /// Placement for an account at or past the default threshold
    ///
    /// Never fails: no rating is needed, a missing maturity places the account
    /// in the first bucket, and without a structure buckets are monthly.
    pub fn for_defaulted(
        structure: Option<&PdTermStructure>,
        account: &AccountSnapshot,
        as_of: NaiveDate,
    ) -> Self {
        let structure_type = structure.map_or(StructureType::Delinquency, |s| s.structure_type);
        let size = structure.map_or(1, PdTermStructure::bucket_size_months);
        let months = account
            .maturity_date
            .map_or(0, |maturity| months_to(structure_type, maturity, account.next_payment_date, as_of));
        Self::from_months(months, size, delinquency_band(u32::MAX).to_string())
    }

    fn from_months(months_to_maturity: u32, size: u32, band: String) -> Self {
        let size = size.max(1);
        let raw_bucket = months_to_maturity.div_ceil(size);
        Self {
            months_to_maturity,
            twelve_month_bucket: raw_bucket.clamp(1, 12u32.div_ceil(size)),
            lifetime_bucket: raw_bucket.max(1),
            band,
        }
    }
}

/// Whole months to the effective maturity, clamped at zero
///
/// Past-maturity delinquent accounts are measured to their next payment.
fn months_to(
    structure_type: StructureType,
    maturity: NaiveDate,
    next_payment: Option<NaiveDate>,
    as_of: NaiveDate,
) -> u32 {
    let effective_maturity = match (structure_type, next_payment) {
        (StructureType::Delinquency, Some(next)) if maturity < as_of => next,
        _ => maturity,
    };
    months_between(as_of, effective_maturity).max(0) as u32
}

/// Forced PD = 1 row for an account at or past the default threshold
fn defaulted_assignment(
    account: &AccountSnapshot,
    structure: Option<&PdTermStructure>,
    as_of: NaiveDate,
    run_key: RunKey,
) -> PdAssignment {
    let placement = BucketPlacement::for_defaulted(structure, account, as_of);
    PdAssignment {
        as_of,
        account_id: account.account_id.clone(),
        run_key,
        pd_12m: 1.0,
        pd_lifetime: 1.0,
        twelve_month_bucket: placement.twelve_month_bucket,
        lifetime_bucket: placement.lifetime_bucket,
        defaulted: true,
    }
}

fn assignment_for(
    account: &AccountSnapshot,
    stage: &StageDetermination,
    structure: &PdTermStructure,
    cache: &PdLookupCache,
    as_of: NaiveDate,
    run_key: RunKey,
) -> Result<PdAssignment> {
    let placement = BucketPlacement::compute(structure, account, stage, as_of)?;
    let id = &account.account_id;

    Ok(PdAssignment {
        as_of,
        account_id: id.clone(),
        run_key,
        pd_12m: cache.require(&structure.id, &placement.band, placement.twelve_month_bucket, id)?,
        pd_lifetime: cache.require(&structure.id, &placement.band, placement.lifetime_bucket, id)?,
        twelve_month_bucket: placement.twelve_month_bucket,
        lifetime_bucket: placement.lifetime_bucket,
        defaulted: false,
    })
}

/// Assign 12-month and lifetime PDs to every account with a structure
///
/// Staged accounts at or past the default threshold are always written with
/// PD 1, even without a structure, rating or maturity date.
///
/// Writes go through the bulk → micro-batch → single-row cascade; a row that
/// still fails alone is reported and the run continues.
pub async fn assign_pds(store: &dyn EclStore, as_of: NaiveDate, config: &EngineConfig) -> StageOutcome {
    let mut outcome = StageOutcome::new("assign_pds");

    let inputs = async {
        let run_key = resolve_run_key(store).await?;
        let structures: HashMap<String, PdTermStructure> = store
            .term_structures()
            .await?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        let cache = PdLookupCache::build(store.term_structure_details().await?);
        let stages = stages_by_account(store.stage_determinations(as_of).await?);
        let accounts = store.accounts(as_of).await?;
        Ok::<_, EclError>((run_key, structures, cache, stages, accounts))
    }
    .await;
    let (run_key, structures, cache, stages, accounts) = match inputs {
        Ok(inputs) => inputs,
        Err(e) => return outcome.fatal(e),
    };

    log::info!(
        "Assigning PDs for {} accounts on {} (run {}, {} structure bands cached)",
        accounts.len(),
        as_of,
        run_key,
        cache.len()
    );

    let mut rows = Vec::with_capacity(accounts.len());
    for account in &accounts {
        let stage = stages.get(&account.account_id);
        let structure_id = account.pd_structure_id.as_deref();

        // Defaulted accounts get PD 1 whether or not their structure resolves
        if stage.is_some_and(|s| s.is_defaulted(config.delinquency_default_days)) {
            let structure = structure_id.and_then(|id| structures.get(id));
            rows.push(defaulted_assignment(account, structure, as_of, run_key));
            continue;
        }

        let Some(structure_id) = structure_id else {
            continue;
        };
        let assignment = structures
            .get(structure_id)
            .ok_or_else(|| EclError::UnknownTermStructure(structure_id.to_string()))
            .and_then(|structure| {
                let stage = stage.ok_or_else(|| {
                    EclError::invalid_dates(&account.account_id, "no stage determination record")
                })?;
                assignment_for(account, stage, structure, &cache, as_of, run_key)
            });
        match assignment {
            Ok(row) => rows.push(row),
            Err(e) => outcome.record_failure(&account.account_id, &e),
        }
    }

    let report = write_in_chunks(
        rows,
        &config.chunk_schedule(),
        Duration::from_millis(config.inter_batch_pause_ms),
        |chunk| store.upsert_pd_assignments(chunk),
    )
    .await;

    outcome.processed = report.succeeded;
    for (row, reason) in report.failed {
        outcome.record_failure_reason(&row.account_id, reason);
    }

    log::info!(
        "PD assignment for {}: {} written in {} batches ({} degraded), {} failed",
        as_of,
        report.succeeded,
        report.batches_committed,
        report.degraded_batches,
        outcome.failures.len()
    );
    outcome
}
