//! Running state while projecting one account

use chrono::NaiveDate;

use crate::account::AccountSnapshot;
use crate::daycount::{period_interest, round_amount, DayCountConvention};

/// State of an account between buckets
#[derive(Debug, Clone)]
pub struct ProjectionState {
    /// Index of the last emitted bucket (0 before the first)
    pub bucket_index: u32,

    /// Outstanding balance after the last emitted bucket
    pub balance: f64,

    /// Date of the last emitted bucket
    pub previous_date: Option<NaiveDate>,

    /// Where accrued interest for the first bucket starts
    pub accrual_start: Option<NaiveDate>,

    rate_pct: f64,
    convention: DayCountConvention,
}

impl ProjectionState {
    /// Initialize state from an account at projection start
    pub fn from_account(account: &AccountSnapshot) -> Self {
        Self {
            bucket_index: 0,
            balance: account.outstanding_balance.max(0.0),
            previous_date: None,
            accrual_start: account.accrual_start(),
            rate_pct: account.interest_rate,
            convention: account.day_count,
        }
    }

    /// Interest on the running balance over `days`
    pub fn interest_for(&self, days: i64) -> f64 {
        period_interest(self.balance, self.rate_pct, days, self.convention)
    }

    /// Days elapsed since the previous bucket, or `first_period_days` for the first one
    pub fn days_since_previous(&self, date: NaiveDate, first_period_days: i64) -> i64 {
        match self.previous_date {
            Some(prev) => (date - prev).num_days().max(0),
            None => first_period_days,
        }
    }

    /// Accrued interest on a closing balance up to `date`
    ///
    /// First bucket accrues from the account's start (or next payment) date,
    /// later buckets from the prior bucket's date.
    pub fn accrued_interest(&self, closing_balance: f64, date: NaiveDate) -> f64 {
        let from = match self.previous_date {
            Some(prev) => Some(prev),
            None => self.accrual_start,
        };
        let days = from.map(|f| (date - f).num_days().max(0)).unwrap_or(0);
        period_interest(closing_balance, self.rate_pct, days, self.convention)
    }

    /// Pay `principal` and move to the next bucket; returns the closing balance
    ///
    /// The closing balance is rounded to the persisted precision and floored at zero.
    pub fn advance(&mut self, principal: f64, date: NaiveDate) -> f64 {
        let closing = round_amount(self.balance - principal).max(0.0);
        self.balance = closing;
        self.previous_date = Some(date);
        self.bucket_index += 1;
        closing
    }
}
