//! Point PD → cumulative default-probability curve
//!
//! `p` is the annual point PD and `max_bucket` the number of buckets per year
//! for the structure's frequency, so `k / max_bucket` is elapsed years.
//! Every model is non-decreasing in `k` and bounded to [0, 1].

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::assignment::BucketPlacement;
use super::cache::PdLookupCache;
use super::{PdCurvePoint, PdTermStructure};
use crate::account::{stages_by_account, AccountSnapshot, StageDetermination};
use crate::config::EngineConfig;
use crate::error::{EclError, Result};
use crate::pipeline::StageOutcome;
use crate::store::EclStore;

/// Curve expansion model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpolationMethod {
    /// cum(k) = 1 − exp(−p·k / max_bucket)
    #[serde(alias = "poisson")]
    Poisson,
    /// cum(k) = 1 − (1 − p / max_bucket)^k
    #[serde(alias = "geometric")]
    Geometric,
    /// cum(k) = min(1, k·p / max_bucket)
    #[serde(alias = "arithmetic", alias = "linear")]
    Arithmetic,
    /// cum(k) = min(1, p·(1 − exp(−decay·k)))
    #[serde(alias = "exponential_decay", alias = "exponential")]
    ExponentialDecay,
}

impl InterpolationMethod {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "poisson" => Ok(InterpolationMethod::Poisson),
            "geometric" => Ok(InterpolationMethod::Geometric),
            "arithmetic" | "linear" => Ok(InterpolationMethod::Arithmetic),
            "exponential_decay" | "exponential" | "exponentialdecay" => {
                Ok(InterpolationMethod::ExponentialDecay)
            }
            _ => Err(EclError::UnknownInterpolation(name.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InterpolationMethod::Poisson => "poisson",
            InterpolationMethod::Geometric => "geometric",
            InterpolationMethod::Arithmetic => "arithmetic",
            InterpolationMethod::ExponentialDecay => "exponential_decay",
        }
    }

    /// Cumulative default probability at bucket `k`
    pub fn cumulative(&self, point_pd: f64, k: u32, max_bucket: u32, decay: f64) -> f64 {
        let p = if point_pd.is_finite() { point_pd.clamp(0.0, 1.0) } else { 0.0 };
        let k = k as f64;
        let max_bucket = max_bucket.max(1) as f64;

        let value = match self {
            InterpolationMethod::Poisson => 1.0 - (-p * k / max_bucket).exp(),
            InterpolationMethod::Geometric => {
                let rate = p / max_bucket;
                1.0 - (1.0 - rate).powf(k)
            }
            InterpolationMethod::Arithmetic => k * p / max_bucket,
            InterpolationMethod::ExponentialDecay => p * (1.0 - (-decay.max(0.0) * k).exp()),
        };
        value.clamp(0.0, 1.0)
    }

    /// Curve values for buckets 1..=horizon
    pub fn curve(&self, point_pd: f64, max_bucket: u32, horizon: u32, decay: f64) -> Vec<f64> {
        (1..=horizon)
            .map(|k| self.cumulative(point_pd, k, max_bucket, decay))
            .collect()
    }
}

/// Curve for one account: flat 1.0 when defaulted (no rating or maturity
/// needed), otherwise the model expansion
fn account_curve(
    account: &AccountSnapshot,
    stage: &StageDetermination,
    structure: &PdTermStructure,
    cache: &PdLookupCache,
    as_of: NaiveDate,
    config: &EngineConfig,
) -> Result<Vec<PdCurvePoint>> {
    let max_bucket = structure.buckets_per_year();

    let values = if stage.is_defaulted(config.delinquency_default_days) {
        let placement = BucketPlacement::for_defaulted(Some(structure), account, as_of);
        vec![1.0; placement.lifetime_bucket.max(max_bucket) as usize]
    } else {
        let placement = BucketPlacement::compute(structure, account, stage, as_of)?;
        let point_pd = cache.require(
            &structure.id,
            &placement.band,
            placement.twelve_month_bucket,
            &account.account_id,
        )?;
        let horizon = placement.lifetime_bucket.max(max_bucket);
        config
            .interpolation_method
            .curve(point_pd, max_bucket, horizon, config.exponential_decay)
    };

    Ok(values
        .into_iter()
        .enumerate()
        .map(|(i, cumulative_pd)| PdCurvePoint {
            as_of,
            account_id: account.account_id.clone(),
            bucket: i as u32 + 1,
            cumulative_pd,
        })
        .collect())
}

/// Interpolate and replace the PD curve of every account with a PD structure
pub async fn interpolate_pds(
    store: &dyn EclStore,
    as_of: NaiveDate,
    config: &EngineConfig,
) -> StageOutcome {
    let mut outcome = StageOutcome::new("interpolate_pds");

    let inputs = async {
        let structures: HashMap<String, PdTermStructure> = store
            .term_structures()
            .await?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        let cache = PdLookupCache::build(store.term_structure_details().await?);
        let stages = stages_by_account(store.stage_determinations(as_of).await?);
        let accounts = store.accounts(as_of).await?;
        Ok::<_, EclError>((structures, cache, stages, accounts))
    }
    .await;
    let (structures, cache, stages, accounts) = match inputs {
        Ok(inputs) => inputs,
        Err(e) => return outcome.fatal(e),
    };

    log::info!(
        "Interpolating PD curves for {} using {}",
        as_of,
        config.interpolation_method.as_str()
    );

    for account in &accounts {
        let Some(structure_id) = account.pd_structure_id.as_deref() else {
            log::debug!("Account {} has no PD structure, skipping", account.account_id);
            continue;
        };

        let curve = structures
            .get(structure_id)
            .ok_or_else(|| EclError::UnknownTermStructure(structure_id.to_string()))
            .and_then(|structure| {
                let stage = stages.get(&account.account_id).ok_or_else(|| {
                    EclError::invalid_dates(&account.account_id, "no stage determination record")
                })?;
                account_curve(account, stage, structure, &cache, as_of, config)
            });

        let written = match curve {
            Ok(points) => store.replace_pd_curve(as_of, &account.account_id, points).await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => outcome.processed += 1,
            Err(e) => outcome.record_failure(&account.account_id, &e),
        }
    }

    log::info!(
        "PD interpolation for {}: {} curves written, {} failed (cache hit rate {:.1}%)",
        as_of,
        outcome.processed,
        outcome.failures.len(),
        cache.hit_rate() * 100.0
    );
    outcome
}
