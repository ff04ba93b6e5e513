//! Per-bucket loss enrichment of the versioned cashflows
//!
//! Each row gets the cumulative PD at its date's bucket, the marginal PD since
//! the previous row, the account's 12-month PD and LGD, and the resulting cash
//! shortfall and forward expected loss.

use std::collections::HashMap;

use chrono::{Months, NaiveDate};

use crate::account::{stages_by_account, StageDetermination};
use crate::config::EngineConfig;
use crate::daycount::{months_between, round_amount};
use crate::error::{EclError, Result};
use crate::pd::PdTermStructure;
use crate::persistence::{resolve_run_key, FinancialCashflow};
use crate::pipeline::StageOutcome;
use crate::store::EclStore;

/// PD curve bucket for a cashflow date, clamped to the curve
pub fn pd_bucket_for(as_of: NaiveDate, date: NaiveDate, bucket_size_months: u32, curve_len: usize) -> u32 {
    let months = months_between(as_of, date).max(0) as u32;
    let upper = (curve_len as u32).max(1);
    months.div_ceil(bucket_size_months.max(1)).clamp(1, upper)
}

/// What the enrichment needs to know about one account
struct AccountRisk<'a> {
    stage: &'a StageDetermination,
    curve: &'a [f64],
    bucket_size: u32,
    twelve_month_bucket: u32,
    defaulted: bool,
}

/// Per-account lookups gathered once per run
struct RiskInputs {
    stages: HashMap<String, StageDetermination>,
    structures: HashMap<String, PdTermStructure>,
    structure_of: HashMap<String, String>,
    twelve_month_buckets: HashMap<String, u32>,
    curves: HashMap<String, Vec<f64>>,
}

impl RiskInputs {
    fn risk_for(&self, account_id: &str, default_days: u32) -> Result<AccountRisk<'_>> {
        let stage = self
            .stages
            .get(account_id)
            .ok_or_else(|| EclError::invalid_dates(account_id, "no stage determination record"))?;
        let defaulted = stage.is_defaulted(default_days);

        let structure_id = self.structure_of.get(account_id);
        let structure = structure_id.and_then(|id| self.structures.get(id));
        let curve = self.curves.get(account_id).map(Vec::as_slice).unwrap_or(&[]);
        if !defaulted && (structure.is_none() || curve.is_empty()) {
            return Err(EclError::PdNotFound {
                structure_id: structure_id.cloned().unwrap_or_default(),
                band: "interpolated curve".to_string(),
                bucket: 1,
            });
        }

        let bucket_size = structure.map(PdTermStructure::bucket_size_months).unwrap_or(1);
        let twelve_month_bucket = self
            .twelve_month_buckets
            .get(account_id)
            .copied()
            .unwrap_or_else(|| 12u32.div_ceil(bucket_size));
        Ok(AccountRisk {
            stage,
            curve,
            bucket_size,
            twelve_month_bucket,
            defaulted,
        })
    }
}

/// Enrich one account's rows (already in bucket order)
fn enrich_account(rows: &mut [FinancialCashflow], risk: &AccountRisk<'_>, as_of: NaiveDate) {
    let horizon = as_of.checked_add_months(Months::new(12)).unwrap_or(NaiveDate::MAX);
    let lgd = risk.stage.lgd;
    let twelve_month_pd = if risk.defaulted {
        1.0
    } else {
        let index = (risk.twelve_month_bucket as usize).clamp(1, risk.curve.len()) - 1;
        risk.curve[index]
    };

    let mut previous_cumulative = 0.0;
    for row in rows.iter_mut() {
        let bucket = pd_bucket_for(as_of, row.date, risk.bucket_size, risk.curve.len());
        let cumulative = if risk.defaulted { 1.0 } else { risk.curve[bucket as usize - 1] };
        let marginal = (cumulative - previous_cumulative).max(0.0);
        previous_cumulative = cumulative;
        // Every remaining cashflow of a defaulted account is short
        let shortfall_pd = if risk.defaulted { 1.0 } else { marginal };

        let discount_factor = row.discount_factor.unwrap_or(1.0);
        let shortfall = row.total * shortfall_pd * lgd;

        row.lgd = Some(lgd);
        row.pd_bucket = Some(bucket);
        row.cumulative_pd = Some(round_amount(cumulative));
        row.marginal_pd = Some(round_amount(marginal));
        row.twelve_month_pd = Some(round_amount(twelve_month_pd));
        row.cash_shortfall = Some(round_amount(shortfall));
        row.cash_shortfall_discounted = Some(round_amount(shortfall * discount_factor));
        row.forward_expected_loss =
            Some(round_amount(row.opening_balance() * marginal * lgd * discount_factor));
        row.within_12_months = row.date <= horizon;
    }
}

/// Enrich every versioned cashflow of the latest run with PD, LGD and losses
///
/// All enriched rows are written back in one atomic update; accounts that
/// cannot be enriched are reported and their rows left as they were.
pub async fn enrich_losses(store: &dyn EclStore, as_of: NaiveDate, config: &EngineConfig) -> StageOutcome {
    let mut outcome = StageOutcome::new("enrich_losses");

    let loaded = async {
        let run_key = resolve_run_key(store).await?;
        let rows = store.financial_cashflows(as_of, run_key).await?;
        let stages = stages_by_account(store.stage_determinations(as_of).await?);
        let structures = store
            .term_structures()
            .await?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        let structure_of = store
            .accounts(as_of)
            .await?
            .into_iter()
            .filter_map(|a| a.pd_structure_id.map(|s| (a.account_id, s)))
            .collect();
        let twelve_month_buckets = store
            .pd_assignments(as_of, run_key)
            .await?
            .into_iter()
            .map(|a| (a.account_id, a.twelve_month_bucket))
            .collect();

        let mut points: HashMap<String, Vec<(u32, f64)>> = HashMap::new();
        for point in store.pd_curves(as_of).await? {
            points
                .entry(point.account_id)
                .or_default()
                .push((point.bucket, point.cumulative_pd));
        }
        let curves = points
            .into_iter()
            .map(|(account_id, mut points)| {
                points.sort_by_key(|(bucket, _)| *bucket);
                (account_id, points.into_iter().map(|(_, pd)| pd).collect())
            })
            .collect();

        let inputs = RiskInputs {
            stages,
            structures,
            structure_of,
            twelve_month_buckets,
            curves,
        };
        Ok::<_, EclError>((rows, inputs))
    }
    .await;
    let (rows, inputs) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => return outcome.fatal(e),
    };

    if rows.is_empty() {
        log::info!("No versioned cashflows for {}; nothing to enrich", as_of);
        return outcome;
    }

    let mut by_account: Vec<(String, Vec<FinancialCashflow>)> = Vec::new();
    for row in rows {
        match by_account.last_mut() {
            Some((account_id, group)) if *account_id == row.account_id => group.push(row),
            _ => by_account.push((row.account_id.clone(), vec![row])),
        }
    }

    let mut enriched = Vec::new();
    for (account_id, mut group) in by_account {
        group.sort_by_key(|r| r.bucket_index);

        match inputs.risk_for(&account_id, config.delinquency_default_days) {
            Ok(risk) => {
                enrich_account(&mut group, &risk, as_of);
                enriched.extend(group);
            }
            Err(e) => outcome.record_failure(&account_id, &e),
        }
    }

    match store.update_financial_cashflows(enriched).await {
        Ok(count) => {
            log::info!(
                "Loss-enriched {} cashflow rows for {} ({} accounts failed)",
                count,
                as_of,
                outcome.failures.len()
            );
            outcome.processed = count;
            outcome
        }
        Err(e) => outcome.fatal(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, date};
    use crate::persistence::RunKey;
    use crate::projection::{CashflowBucket, CashflowType};
    use approx::assert_relative_eq;

    #[test]
    fn test_pd_bucket_for() {
        let as_of = date(2024, 1, 15);
        assert_eq!(pd_bucket_for(as_of, date(2024, 1, 20), 1, 24), 1);
        assert_eq!(pd_bucket_for(as_of, date(2024, 7, 15), 1, 24), 6);
        assert_eq!(pd_bucket_for(as_of, date(2024, 7, 15), 3, 24), 2);
        assert_eq!(pd_bucket_for(as_of, date(2030, 1, 15), 1, 24), 24);
        assert_eq!(pd_bucket_for(as_of, date(2023, 1, 15), 1, 24), 1);
    }

    fn row(index: u32, date: NaiveDate, principal: f64, closing: f64, df: f64) -> FinancialCashflow {
        let bucket = CashflowBucket {
            as_of: fixtures::as_of(),
            account_id: "A1".to_string(),
            bucket_index: index,
            date,
            principal,
            interest: 0.0,
            total: principal,
            closing_balance: closing,
            accrued_interest: 0.0,
            cashflow_type: CashflowType::Mixed,
        };
        let mut row = FinancialCashflow::from_bucket(&bucket, RunKey(1));
        row.discount_factor = Some(df);
        row
    }

    #[test]
    fn test_enrich_account_marginal_pd() {
        let stage = fixtures::stage("A1", 1, 12.0, 0.5, 0, Some("BBB"));
        let curve: Vec<f64> = (1..=24).map(|k| k as f64 * 0.01).collect();
        let risk = AccountRisk {
            stage: &stage,
            curve: &curve,
            bucket_size: 1,
            twelve_month_bucket: 12,
            defaulted: false,
        };
        let mut rows = vec![
            row(1, date(2024, 4, 15), 100.0, 200.0, 0.9),
            row(2, date(2024, 10, 15), 100.0, 100.0, 0.8),
            row(3, date(2025, 4, 15), 100.0, 0.0, 0.7),
        ];
        enrich_account(&mut rows, &risk, fixtures::as_of());

        assert_eq!(rows[0].pd_bucket, Some(3));
        assert_eq!(rows[1].pd_bucket, Some(9));
        assert_eq!(rows[2].pd_bucket, Some(15));
        assert_relative_eq!(rows[0].marginal_pd.unwrap(), 0.03, epsilon = 1e-9);
        assert_relative_eq!(rows[1].marginal_pd.unwrap(), 0.06, epsilon = 1e-9);
        assert_relative_eq!(rows[2].marginal_pd.unwrap(), 0.06, epsilon = 1e-9);
        assert_relative_eq!(rows[1].twelve_month_pd.unwrap(), 0.12, epsilon = 1e-9);

        // 100 × 0.06 × 0.5 = 3, discounted at 0.8
        assert_relative_eq!(rows[1].cash_shortfall.unwrap(), 3.0, epsilon = 1e-9);
        assert_relative_eq!(rows[1].cash_shortfall_discounted.unwrap(), 2.4, epsilon = 1e-9);
        // opening 200 × 0.06 × 0.5 × 0.8
        assert_relative_eq!(rows[1].forward_expected_loss.unwrap(), 4.8, epsilon = 1e-9);

        assert!(rows[0].within_12_months && rows[1].within_12_months);
        assert!(!rows[2].within_12_months);
    }

    #[test]
    fn test_defaulted_account_full_loss() {
        let stage = fixtures::stage("A1", 3, 10.0, 0.6, 120, None);
        let risk = AccountRisk {
            stage: &stage,
            curve: &[],
            bucket_size: 1,
            twelve_month_bucket: 12,
            defaulted: true,
        };
        let mut rows = vec![row(1, date(2024, 2, 15), 50.0, 50.0, 1.0), row(2, date(2024, 3, 15), 50.0, 0.0, 1.0)];
        enrich_account(&mut rows, &risk, fixtures::as_of());

        for r in &rows {
            assert_eq!(r.cumulative_pd, Some(1.0));
            assert_relative_eq!(r.cash_shortfall.unwrap(), 30.0);
        }
        let total: f64 = rows.iter().map(|r| r.cash_shortfall.unwrap()).sum();
        assert_relative_eq!(total, 100.0 * 0.6);

        // the flat curve defaults once: the opening balance is lost in the first bucket only
        assert_eq!(rows[0].marginal_pd, Some(1.0));
        assert_eq!(rows[1].marginal_pd, Some(0.0));
        assert_relative_eq!(rows[0].forward_expected_loss.unwrap(), 100.0 * 0.6);
        assert_eq!(rows[1].forward_expected_loss, Some(0.0));
    }
}
