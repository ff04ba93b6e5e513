//! Discounting of versioned cashflows at each account's effective interest rate
//!
//! factor = 1 / (1 + rate)^(bucket_index / frequency), where the compounding
//! frequency comes from the stage-determination term unit.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::account::stages_by_account;
use crate::daycount::{round_amount, TermUnit};
use crate::error::EclError;
use crate::persistence::resolve_run_key;
use crate::pipeline::StageOutcome;
use crate::store::EclStore;

/// Compounding periods per year for a term unit
///
/// Day → 365, Week → 52, Month → 12, Quarter → 4, Half → 2, Year → 1, else 12.
pub fn compounding_frequency(unit: TermUnit) -> u32 {
    match unit {
        TermUnit::Day => 365,
        TermUnit::Week => 52,
        TermUnit::Month => 12,
        TermUnit::Quarter => 4,
        TermUnit::HalfYear => 2,
        TermUnit::Year => 1,
        TermUnit::Unknown => 12,
    }
}

/// Flat discount curve at one effective rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscountCurve {
    /// Annual effective rate as a fraction (0.05 = 5%)
    pub annual_rate: f64,

    /// Compounding periods per year
    pub frequency: u32,
}

impl DiscountCurve {
    /// Build from a percentage rate and the account's term unit
    pub fn from_effective_rate(rate_pct: f64, unit: TermUnit) -> Self {
        Self {
            annual_rate: rate_pct / 100.0,
            frequency: compounding_frequency(unit),
        }
    }

    /// Discount factor for a 1-based bucket index
    pub fn factor(&self, bucket_index: u32) -> f64 {
        let periods = bucket_index as f64 / self.frequency.max(1) as f64;
        1.0 / (1.0 + self.annual_rate).powf(periods)
    }
}

/// Populate discount rate and factor on every versioned row of the latest run
pub async fn apply_discounting(store: &dyn EclStore, as_of: NaiveDate) -> StageOutcome {
    let mut outcome = StageOutcome::new("apply_discounting");

    let inputs = async {
        let run_key = resolve_run_key(store).await?;
        let rows = store.financial_cashflows(as_of, run_key).await?;
        let stages = stages_by_account(store.stage_determinations(as_of).await?);
        Ok::<_, EclError>((run_key, rows, stages))
    }
    .await;
    let (run_key, rows, stages) = match inputs {
        Ok(inputs) => inputs,
        Err(e) => return outcome.fatal(e),
    };

    if rows.is_empty() {
        log::info!("No versioned cashflows for {} run {}; nothing to discount", as_of, run_key);
        return outcome;
    }

    let mut unmatched = BTreeSet::new();
    let mut updated = Vec::with_capacity(rows.len());
    for mut row in rows {
        let Some(stage) = stages.get(&row.account_id) else {
            unmatched.insert(row.account_id.clone());
            continue;
        };
        let curve = DiscountCurve::from_effective_rate(stage.effective_interest_rate, stage.term_unit);
        row.discount_rate = Some(curve.annual_rate);
        row.discount_factor = Some(round_amount(curve.factor(row.bucket_index)));
        updated.push(row);
    }

    for account_id in unmatched {
        outcome.record_failure(
            &account_id,
            &EclError::invalid_dates(&account_id, "no stage determination record to discount against"),
        );
    }

    match store.update_financial_cashflows(updated).await {
        Ok(count) => {
            log::info!("Discounted {} cashflow rows for {} run {}", count, as_of, run_key);
            outcome.processed = count;
            outcome
        }
        Err(e) => outcome.fatal(e),
    }
}
