//! Cashflow projection for a single account
//!
//! Two modes:
//! - **Schedule-driven**: explicit contractual principal per date; interest is
//!   accrued on the running balance between consecutive dates.
//! - **Formula-driven**: periods stepped by the day-count interval from the next
//!   payment date to maturity, principal shaped by the repayment convention.
//!
//! Buckets are strictly sequential: each depends on the prior closing balance.

use chrono::{Duration, NaiveDate};

use super::cashflows::{CashflowBucket, CashflowType, ProjectionResult};
use super::state::ProjectionState;
use crate::account::{AccountSnapshot, PaymentScheduleRow, RepaymentType};
use crate::daycount::{resolve_interval, round_amount};
use crate::error::Result;

/// Upper bound on explicit schedule rows read per account
pub const DEFAULT_MAX_SCHEDULE_ROWS: usize = 1000;

/// Configuration for the generator
#[derive(Debug, Clone)]
pub struct ProjectionConfig {
    /// Explicit schedule rows beyond this count are ignored
    pub max_schedule_rows: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            max_schedule_rows: DEFAULT_MAX_SCHEDULE_ROWS,
        }
    }
}

/// Pure cashflow generator; persistence is handled by the portfolio runner
#[derive(Debug, Clone, Default)]
pub struct CashflowGenerator {
    config: ProjectionConfig,
}

impl CashflowGenerator {
    pub fn new(config: ProjectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    /// Project one account, preferring explicit schedule rows when present
    pub fn project_account(
        &self,
        account: &AccountSnapshot,
        schedule: &[PaymentScheduleRow],
    ) -> Result<ProjectionResult> {
        if schedule.is_empty() {
            self.project_from_formula(account)
        } else {
            self.project_from_schedule(account, schedule)
        }
    }

    /// Schedule-driven projection
    fn project_from_schedule(
        &self,
        account: &AccountSnapshot,
        schedule: &[PaymentScheduleRow],
    ) -> Result<ProjectionResult> {
        let mut rows: Vec<&PaymentScheduleRow> = schedule.iter().collect();
        rows.sort_by_key(|r| r.payment_date);
        rows.truncate(self.config.max_schedule_rows);

        let mut result = ProjectionResult::new(account.as_of, &account.account_id, true);
        let mut state = ProjectionState::from_account(account);
        // Without a start date, interest for the first row runs from the snapshot date
        let first_from = account.start_date.unwrap_or(account.as_of);

        let last = rows.len().saturating_sub(1);
        for (i, row) in rows.iter().enumerate() {
            let days = match state.previous_date {
                Some(_) => state.days_since_previous(row.payment_date, 0),
                None => (row.payment_date - first_from).num_days().max(0),
            };
            let interest = state.interest_for(days);

            // Final row retires whatever is left; earlier rows never overdraw the balance
            let principal = if i == last {
                state.balance
            } else {
                row.principal.max(0.0).min(state.balance)
            };

            self.emit(
                &mut state,
                &mut result,
                row.payment_date,
                principal,
                interest,
                CashflowType::Contractual,
            );
        }

        Ok(result)
    }

    /// Formula-driven projection
    fn project_from_formula(&self, account: &AccountSnapshot) -> Result<ProjectionResult> {
        let interval = resolve_interval(account.day_count, account.term_unit)? as i64;
        let (next_payment, maturity) = account.projection_dates()?;

        let span = (maturity - next_payment).num_days();
        let total_periods = ((span + interval - 1) / interval).max(1);

        let mut result = ProjectionResult::new(account.as_of, &account.account_id, false);
        let mut state = ProjectionState::from_account(account);

        let fixed_principal = state.balance / total_periods as f64;
        let period_rate =
            account.interest_rate / 100.0 * interval as f64 / account.day_count.denominator();
        let instalment = annuity_instalment(state.balance, period_rate, total_periods);

        for period in 1..=total_periods {
            let is_final = period == total_periods;
            let date = if is_final {
                maturity
            } else {
                next_payment + Duration::days((period - 1) * interval)
            };

            let days = state.days_since_previous(date, interval);
            let interest = state.interest_for(days);

            let (principal, cashflow_type) = if is_final {
                (state.balance, CashflowType::Mixed)
            } else {
                match account.repayment_type {
                    RepaymentType::EqualPrincipal => {
                        (fixed_principal.min(state.balance), CashflowType::Mixed)
                    }
                    RepaymentType::Bullet => (0.0, CashflowType::Interest),
                    RepaymentType::Annuity => (
                        (instalment - interest).clamp(0.0, state.balance),
                        CashflowType::Mixed,
                    ),
                }
            };

            self.emit(&mut state, &mut result, date, principal, interest, cashflow_type);
        }

        Ok(result)
    }

    /// Append one cleaned bucket and advance the running state
    fn emit(
        &self,
        state: &mut ProjectionState,
        result: &mut ProjectionResult,
        date: NaiveDate,
        principal: f64,
        interest: f64,
        cashflow_type: CashflowType,
    ) {
        let principal = round_amount(principal);
        let interest = round_amount(interest);
        let closing = round_amount(state.balance - principal).max(0.0);
        let accrued = round_amount(state.accrued_interest(closing, date));
        state.advance(principal, date);

        result.add_bucket(CashflowBucket {
            as_of: result.as_of,
            account_id: result.account_id.clone(),
            bucket_index: state.bucket_index,
            date,
            principal,
            interest,
            total: round_amount(principal + interest),
            closing_balance: closing,
            accrued_interest: accrued,
            cashflow_type,
        });
    }
}

/// Level instalment for `periods` payments at `period_rate`; zero rate falls back to equal principal
fn annuity_instalment(balance: f64, period_rate: f64, periods: i64) -> f64 {
    if periods <= 0 {
        return balance;
    }
    if period_rate.abs() < 1e-12 {
        return balance / periods as f64;
    }
    balance * period_rate / (1.0 - (1.0 + period_rate).powi(-(periods as i32)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daycount::{DayCountConvention, TermUnit};
    use crate::error::EclError;
    use approx::assert_abs_diff_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn test_account() -> AccountSnapshot {
        // Jan 15 → Dec 15 2024 is 335 days: 12 monthly periods at 30 days
        AccountSnapshot {
            as_of: date(2024, 1, 1),
            account_id: "LN-1200".to_string(),
            outstanding_balance: 1200.0,
            interest_rate: 12.0,
            day_count: DayCountConvention::Thirty360,
            term_unit: TermUnit::Month,
            repayment_type: RepaymentType::EqualPrincipal,
            start_date: Some(date(2023, 12, 15)),
            next_payment_date: Some(date(2024, 1, 15)),
            maturity_date: Some(date(2024, 12, 15)),
            stage: 1,
            segment: "retail".to_string(),
            pd_structure_id: None,
        }
    }

    fn assert_bucket_invariants(result: &ProjectionResult, starting_balance: f64) {
        let summary = result.summary();
        assert_abs_diff_eq!(summary.total_principal, starting_balance, epsilon = 1e-6);
        assert_abs_diff_eq!(summary.final_balance, 0.0, epsilon = 1e-6);

        let mut previous = starting_balance;
        for (i, bucket) in result.buckets.iter().enumerate() {
            assert_eq!(bucket.bucket_index, i as u32 + 1);
            assert!(bucket.closing_balance >= 0.0);
            assert_abs_diff_eq!(bucket.closing_balance, previous - bucket.principal, epsilon = 1e-6);
            assert_abs_diff_eq!(bucket.total, bucket.principal + bucket.interest, epsilon = 1e-6);
            previous = bucket.closing_balance;
        }
    }

    #[test]
    fn test_twelve_equal_principal_buckets() {
        let generator = CashflowGenerator::default();
        let result = generator.project_account(&test_account(), &[]).unwrap();

        assert_eq!(result.buckets.len(), 12);
        for bucket in &result.buckets {
            assert_abs_diff_eq!(bucket.principal, 100.0, epsilon = 1e-6);
        }
        assert_eq!(result.buckets.last().unwrap().date, date(2024, 12, 15));
        assert!(!result.schedule_driven);
        assert_bucket_invariants(&result, 1200.0);
    }

    #[test]
    fn test_interest_on_running_balance() {
        let generator = CashflowGenerator::default();
        let result = generator.project_account(&test_account(), &[]).unwrap();

        // 1200 * 12% * 30/360 on the first bucket, 1100 * 12% * 30/360 on the second
        assert_abs_diff_eq!(result.buckets[0].interest, 12.0, epsilon = 1e-8);
        assert_abs_diff_eq!(result.buckets[1].interest, 11.0, epsilon = 1e-8);

        // First bucket accrues from the start date (31 days) on the closing balance
        let expected_accrued = 1100.0 * 0.12 * 31.0 / 360.0;
        assert_abs_diff_eq!(result.buckets[0].accrued_interest, expected_accrued, epsilon = 1e-6);
    }

    #[test]
    fn test_bullet_repays_at_maturity() {
        let mut account = test_account();
        account.repayment_type = RepaymentType::Bullet;
        let result = CashflowGenerator::default().project_account(&account, &[]).unwrap();

        assert_eq!(result.buckets.len(), 12);
        for bucket in &result.buckets[..11] {
            assert_eq!(bucket.principal, 0.0);
            assert_eq!(bucket.cashflow_type, CashflowType::Interest);
        }
        assert_abs_diff_eq!(result.buckets[11].principal, 1200.0, epsilon = 1e-6);
        assert_bucket_invariants(&result, 1200.0);
    }

    #[test]
    fn test_annuity_has_level_instalments() {
        let mut account = test_account();
        account.repayment_type = RepaymentType::Annuity;
        let result = CashflowGenerator::default().project_account(&account, &[]).unwrap();

        assert_bucket_invariants(&result, 1200.0);
        // Instalments before the stub final period are level
        let first = result.buckets[0].total;
        for bucket in &result.buckets[1..11] {
            assert_abs_diff_eq!(bucket.total, first, epsilon = 1e-6);
        }
        // Principal share grows as interest shrinks
        assert!(result.buckets[5].principal > result.buckets[0].principal);
    }

    #[test]
    fn test_schedule_driven_projection() {
        let account = test_account();
        let schedule = vec![
            PaymentScheduleRow {
                account_id: account.account_id.clone(),
                payment_date: date(2024, 3, 15),
                principal: 400.0,
            },
            PaymentScheduleRow {
                account_id: account.account_id.clone(),
                payment_date: date(2024, 1, 15),
                principal: 300.0,
            },
            PaymentScheduleRow {
                account_id: account.account_id.clone(),
                payment_date: date(2024, 6, 15),
                principal: 100.0,
            },
        ];

        let result = CashflowGenerator::default()
            .project_account(&account, &schedule)
            .unwrap();

        assert!(result.schedule_driven);
        assert_eq!(result.buckets.len(), 3);
        // Sorted by date
        assert_eq!(result.buckets[0].date, date(2024, 1, 15));
        assert_abs_diff_eq!(result.buckets[0].principal, 300.0);
        assert_abs_diff_eq!(result.buckets[1].principal, 400.0);
        // Final row retires the remaining balance
        assert_abs_diff_eq!(result.buckets[2].principal, 500.0);
        assert_eq!(result.buckets[0].cashflow_type, CashflowType::Contractual);

        // Interest for the first row runs from the start date: 31 days on 1200
        assert_abs_diff_eq!(result.buckets[0].interest, 1200.0 * 0.12 * 31.0 / 360.0, epsilon = 1e-6);
        assert_bucket_invariants(&result, 1200.0);
    }

    #[test]
    fn test_schedule_never_overdraws_on_non_final_rows() {
        let account = test_account();
        let schedule = vec![
            PaymentScheduleRow {
                account_id: account.account_id.clone(),
                payment_date: date(2024, 2, 15),
                principal: 5000.0,
            },
            PaymentScheduleRow {
                account_id: account.account_id.clone(),
                payment_date: date(2024, 3, 15),
                principal: 10.0,
            },
        ];

        let result = CashflowGenerator::default()
            .project_account(&account, &schedule)
            .unwrap();
        assert_abs_diff_eq!(result.buckets[0].principal, 1200.0);
        assert_eq!(result.buckets[1].principal, 0.0);
        assert_bucket_invariants(&result, 1200.0);
    }

    #[test]
    fn test_schedule_rows_capped() {
        let account = test_account();
        let generator = CashflowGenerator::new(ProjectionConfig { max_schedule_rows: 5 });
        let schedule: Vec<_> = (0..20)
            .map(|i| PaymentScheduleRow {
                account_id: account.account_id.clone(),
                payment_date: date(2024, 1, 15) + Duration::days(30 * i),
                principal: 10.0,
            })
            .collect();

        let result = generator.project_account(&account, &schedule).unwrap();
        assert_eq!(result.buckets.len(), 5);
        assert_bucket_invariants(&result, 1200.0);
    }

    #[test]
    fn test_maturity_on_next_payment_gives_single_bucket() {
        let mut account = test_account();
        account.maturity_date = account.next_payment_date;
        let result = CashflowGenerator::default().project_account(&account, &[]).unwrap();
        assert_eq!(result.buckets.len(), 1);
        assert_bucket_invariants(&result, 1200.0);
    }

    #[test]
    fn test_missing_dates_fail() {
        let mut account = test_account();
        account.maturity_date = None;
        let err = CashflowGenerator::default().project_account(&account, &[]).unwrap_err();
        assert!(matches!(err, EclError::InvalidDates { .. }));
    }

    #[test]
    fn test_quarterly_30_365() {
        let mut account = test_account();
        account.day_count = DayCountConvention::Thirty365;
        account.term_unit = TermUnit::Quarter;
        account.next_payment_date = Some(date(2024, 3, 31));
        account.maturity_date = Some(date(2025, 3, 31));

        let result = CashflowGenerator::default().project_account(&account, &[]).unwrap();
        // 365 days / 91 → 5 periods
        assert_eq!(result.buckets.len(), 5);
        assert_eq!(result.buckets[1].date, date(2024, 3, 31) + Duration::days(91));
        assert_bucket_invariants(&result, 1200.0);
    }
}
