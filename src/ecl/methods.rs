//! ECL aggregation onto reporting lines
//!
//! Every method computes the full update set first and then applies it in a
//! single atomic store call, so a rejected row leaves every line unchanged.
//! Re-running a method for the same (run, as_of) overwrites the same lines.

use std::collections::HashMap;

use chrono::NaiveDate;

use super::{EclMethod, EclUpdate, ReportingLine};
use crate::config::EngineConfig;
use crate::daycount::round_amount;
use crate::error::{EclError, Result};
use crate::persistence::{resolve_run_key, FinancialCashflow};
use crate::pipeline::StageOutcome;
use crate::store::EclStore;

/// Per-account 12-month and lifetime loss sums
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct LossRollup {
    twelve_month: f64,
    lifetime: f64,
}

fn rollup<F>(rows: &[FinancialCashflow], loss: F) -> HashMap<&str, LossRollup>
where
    F: Fn(&FinancialCashflow) -> f64,
{
    let mut sums: HashMap<&str, LossRollup> = HashMap::new();
    for row in rows {
        let value = loss(row);
        let entry = sums.entry(row.account_id.as_str()).or_default();
        entry.lifetime += value;
        if row.within_12_months {
            entry.twelve_month += value;
        }
    }
    sums
}

fn update(line: &ReportingLine, ecl_12m: f64, ecl_lifetime: f64) -> EclUpdate {
    let ecl_12m = round_amount(ecl_12m);
    let ecl_lifetime = round_amount(ecl_lifetime);
    EclUpdate {
        account_id: line.account_id.clone(),
        ecl_12m,
        ecl_lifetime,
        final_ecl: if line.uses_lifetime_ecl() { ecl_lifetime } else { ecl_12m },
    }
}

/// ECL updates for every reporting line under `method`
pub fn compute_updates(
    method: EclMethod,
    lines: &[ReportingLine],
    cashflows: &[FinancialCashflow],
    discounted: bool,
) -> Vec<EclUpdate> {
    match method {
        EclMethod::SimpleEad => lines
            .iter()
            .map(|l| {
                update(
                    l,
                    l.exposure * l.pd_12m * l.lgd,
                    l.exposure * l.pd_lifetime * l.lgd,
                )
            })
            .collect(),
        EclMethod::CashFlow | EclMethod::ForwardExposure => {
            let sums = rollup(cashflows, |row| {
                let value = match (method, discounted) {
                    (EclMethod::ForwardExposure, _) => row.forward_expected_loss,
                    (_, true) => row.cash_shortfall_discounted,
                    (_, false) => row.cash_shortfall,
                };
                value.unwrap_or(0.0)
            });
            lines
                .iter()
                .map(|l| {
                    let sum = sums.get(l.account_id.as_str()).copied().unwrap_or_default();
                    update(l, sum.twelve_month, sum.lifetime)
                })
                .collect()
        }
    }
}

/// Write 12-month, lifetime and final ECL for `as_of` under the latest run
///
/// Rejects the call before any write when the run has no reporting lines for
/// the date.
pub async fn aggregate_ecl(
    store: &dyn EclStore,
    as_of: NaiveDate,
    method: EclMethod,
    config: &EngineConfig,
) -> StageOutcome {
    let mut outcome = StageOutcome::new("aggregate_ecl");

    let loaded = async {
        let run_key = resolve_run_key(store).await?;
        let lines = store.reporting_lines(as_of, run_key).await?;
        if lines.is_empty() {
            return Err(EclError::MissingRunKey(as_of));
        }
        let cashflows = match method {
            EclMethod::SimpleEad => Vec::new(),
            _ => store.financial_cashflows(as_of, run_key).await?,
        };
        Ok::<_, EclError>((run_key, lines, cashflows))
    }
    .await;
    let (run_key, lines, cashflows) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => return outcome.fatal(e),
    };

    let updates = compute_updates(method, &lines, &cashflows, config.discount_cash_shortfall);
    let total: f64 = updates.iter().map(|u| u.final_ecl).sum();

    match store.apply_ecl(as_of, run_key, method, updates).await {
        Ok(count) => {
            log::info!(
                "Applied {} ECL to {} reporting lines for {} run {} (total {:.2})",
                method.as_str(),
                count,
                as_of,
                run_key,
                total
            );
            outcome.processed = count;
            outcome
        }
        Err(e) => outcome.fatal(e),
    }
}

/// [`aggregate_ecl`] with the method given by name; unknown names write nothing
pub async fn aggregate_ecl_by_name(
    store: &dyn EclStore,
    as_of: NaiveDate,
    method: &str,
    config: &EngineConfig,
) -> StageOutcome {
    match EclMethod::parse(method) {
        Ok(method) => aggregate_ecl(store, as_of, method, config).await,
        Err(e) => StageOutcome::new("aggregate_ecl").fatal(e),
    }
}

/// Sum of final ECL across lines that have one
pub fn total_final_ecl(lines: &[ReportingLine]) -> Result<f64> {
    let missing = lines.iter().filter(|l| l.final_ecl.is_none()).count();
    if missing > 0 {
        return Err(EclError::Constraint(format!("{} reporting lines have no ECL", missing)));
    }
    Ok(lines.iter().filter_map(|l| l.final_ecl).sum())
}
