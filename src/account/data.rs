//! Account snapshot and stage-determination records
//!
//! Both are keyed by (as-of date, account id) and are read-only inputs owned by
//! the loan master and staging collaborators.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::daycount::{DayCountConvention, TermUnit};
use crate::error::{EclError, Result};

/// Repayment convention used by formula-driven projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RepaymentType {
    /// Equal principal every period, interest on the running balance
    #[default]
    EqualPrincipal,
    /// Interest only, full principal at maturity
    Bullet,
    /// Level instalment (principal + interest)
    Annuity,
}

impl RepaymentType {
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "bullet" | "interest_only" | "interest only" => RepaymentType::Bullet,
            "annuity" | "emi" | "level" => RepaymentType::Annuity,
            _ => RepaymentType::EqualPrincipal,
        }
    }
}

/// Loan terms for one account on one as-of date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Snapshot date
    pub as_of: NaiveDate,

    /// Account identifier
    pub account_id: String,

    /// Outstanding principal at the as-of date
    pub outstanding_balance: f64,

    /// Contractual annual interest rate, in percent
    pub interest_rate: f64,

    pub day_count: DayCountConvention,

    /// Repayment frequency
    pub term_unit: TermUnit,

    pub repayment_type: RepaymentType,

    /// Origination / disbursement date
    pub start_date: Option<NaiveDate>,

    /// Next scheduled payment date
    pub next_payment_date: Option<NaiveDate>,

    /// Contractual maturity
    pub maturity_date: Option<NaiveDate>,

    /// IFRS9 stage (1, 2 or 3)
    pub stage: u8,

    /// Portfolio segment
    pub segment: String,

    /// PD term structure this account is measured against
    pub pd_structure_id: Option<String>,
}

impl AccountSnapshot {
    /// Next payment and maturity dates, both required for projection
    pub fn projection_dates(&self) -> Result<(NaiveDate, NaiveDate)> {
        let next = self
            .next_payment_date
            .ok_or_else(|| EclError::invalid_dates(&self.account_id, "missing next payment date"))?;
        let maturity = self
            .maturity_date
            .ok_or_else(|| EclError::invalid_dates(&self.account_id, "missing maturity date"))?;
        if maturity < next {
            return Err(EclError::invalid_dates(
                &self.account_id,
                format!("maturity {} precedes next payment {}", maturity, next),
            ));
        }
        Ok((next, maturity))
    }

    /// Date interest starts accruing from for the first bucket
    pub fn accrual_start(&self) -> Option<NaiveDate> {
        self.start_date.or(self.next_payment_date)
    }
}

/// Explicit contractual payment for one date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentScheduleRow {
    pub account_id: String,
    pub payment_date: NaiveDate,
    /// Contractual principal due
    pub principal: f64,
}

/// Staging and risk attributes of an account on one as-of date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDetermination {
    pub as_of: NaiveDate,
    pub account_id: String,

    /// IFRS9 stage (1, 2 or 3)
    pub stage: u8,

    /// Effective interest rate used for discounting, in percent
    pub effective_interest_rate: f64,

    /// Loss given default as a fraction
    pub lgd: f64,

    /// Days past due
    pub days_past_due: u32,

    /// Internal or external rating grade
    pub rating: Option<String>,

    /// Repayment frequency used to derive the discount compounding frequency
    pub term_unit: TermUnit,
}

impl StageDetermination {
    /// Whether the account is past the default threshold
    pub fn is_defaulted(&self, threshold_days: u32) -> bool {
        self.days_past_due >= threshold_days
    }

    /// Whether lifetime ECL applies
    pub fn uses_lifetime_ecl(&self) -> bool {
        self.stage >= 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(next: Option<NaiveDate>, maturity: Option<NaiveDate>) -> AccountSnapshot {
        AccountSnapshot {
            as_of: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            account_id: "ACC-1".to_string(),
            outstanding_balance: 1000.0,
            interest_rate: 5.0,
            day_count: DayCountConvention::Thirty360,
            term_unit: TermUnit::Month,
            repayment_type: RepaymentType::EqualPrincipal,
            start_date: None,
            next_payment_date: next,
            maturity_date: maturity,
            stage: 1,
            segment: "retail".to_string(),
            pd_structure_id: None,
        }
    }

    #[test]
    fn test_projection_dates_required() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 1);
        assert!(account(None, d).projection_dates().is_err());
        assert!(account(d, None).projection_dates().is_err());
        assert!(account(d, d).projection_dates().is_ok());
    }

    #[test]
    fn test_maturity_before_next_payment_rejected() {
        let next = NaiveDate::from_ymd_opt(2024, 5, 1);
        let maturity = NaiveDate::from_ymd_opt(2024, 2, 1);
        let err = account(next, maturity).projection_dates().unwrap_err();
        assert!(matches!(err, EclError::InvalidDates { .. }));
    }

    #[test]
    fn test_repayment_type_parse() {
        assert_eq!(RepaymentType::parse("Bullet"), RepaymentType::Bullet);
        assert_eq!(RepaymentType::parse("EMI"), RepaymentType::Annuity);
        assert_eq!(RepaymentType::parse("amortizing"), RepaymentType::EqualPrincipal);
    }
}
