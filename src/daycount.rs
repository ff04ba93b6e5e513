//! Day-count and schedule primitives
//!
//! Resolves a (convention, term unit) pair into a fixed interval in days and
//! accrues simple interest over a number of days. Also hosts the whole-month
//! difference used for bucket alignment and the amount cleaner applied to every
//! monetary value before it is persisted.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{EclError, Result};

/// Number of decimals kept on persisted monetary values
pub const AMOUNT_DECIMALS: i32 = 8;

/// Day-count convention of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DayCountConvention {
    /// 30/360: 360-day year, 30-day months
    Thirty360,
    /// 30/365: 365-day year
    Thirty365,
    /// Anything else; treated like 30/365
    #[default]
    Default,
}

impl DayCountConvention {
    /// Parse the convention label used in the loan master ("30/360", "30/365")
    pub fn parse(label: &str) -> Self {
        match label.trim() {
            "30/360" => DayCountConvention::Thirty360,
            "30/365" => DayCountConvention::Thirty365,
            _ => DayCountConvention::Default,
        }
    }

    /// Year length used as the interest denominator
    pub fn denominator(&self) -> f64 {
        match self {
            DayCountConvention::Thirty360 => 360.0,
            _ => 365.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DayCountConvention::Thirty360 => "30/360",
            DayCountConvention::Thirty365 => "30/365",
            DayCountConvention::Default => "default",
        }
    }
}

/// Repayment term unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TermUnit {
    Day,
    Week,
    #[default]
    Month,
    Quarter,
    HalfYear,
    Year,
    /// Unrecognised unit; resolves to a 30-day interval
    Unknown,
}

impl TermUnit {
    /// Parse a term unit code or name ("M", "Month", "Q", "Quarterly", ...)
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "D" | "DAY" | "DAILY" => TermUnit::Day,
            "W" | "WEEK" | "WEEKLY" => TermUnit::Week,
            "M" | "MONTH" | "MONTHLY" => TermUnit::Month,
            "Q" | "QUARTER" | "QUARTERLY" => TermUnit::Quarter,
            "H" | "HALF" | "HALF-YEAR" | "HALFYEAR" | "SEMI-ANNUAL" => TermUnit::HalfYear,
            "Y" | "YEAR" | "YEARLY" | "ANNUAL" => TermUnit::Year,
            _ => TermUnit::Unknown,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            TermUnit::Day => "D",
            TermUnit::Week => "W",
            TermUnit::Month => "M",
            TermUnit::Quarter => "Q",
            TermUnit::HalfYear => "H",
            TermUnit::Year => "Y",
            TermUnit::Unknown => "?",
        }
    }
}

/// Interval in days for a convention and term unit
///
/// 30/360 → {1, 7, 30, 90, 180, 360}; every other convention →
/// {1, 7, 30, 91, 182, 365}. Unknown units are 30 days under both.
pub fn interval_days(convention: DayCountConvention, unit: TermUnit) -> u32 {
    match (convention, unit) {
        (_, TermUnit::Day) => 1,
        (_, TermUnit::Week) => 7,
        (_, TermUnit::Month) => 30,
        (DayCountConvention::Thirty360, TermUnit::Quarter) => 90,
        (DayCountConvention::Thirty360, TermUnit::HalfYear) => 180,
        (DayCountConvention::Thirty360, TermUnit::Year) => 360,
        (_, TermUnit::Quarter) => 91,
        (_, TermUnit::HalfYear) => 182,
        (_, TermUnit::Year) => 365,
        (_, TermUnit::Unknown) => 30,
    }
}

/// Interval resolution that treats a zero-length interval as fatal
///
/// The fixed tables in [`interval_days`] are all positive, so today this
/// never returns `ZeroInterval`; the projection engine resolves through here
/// so a zero entry added to the tables fails the account instead of looping.
pub fn resolve_interval(convention: DayCountConvention, unit: TermUnit) -> Result<u32> {
    match interval_days(convention, unit) {
        0 => Err(EclError::ZeroInterval(unit.code().to_string())),
        days => Ok(days),
    }
}

/// Simple interest accrued on `balance` over `days`
///
/// `annual_rate_pct` is a percentage (5.0 = 5%).
pub fn period_interest(
    balance: f64,
    annual_rate_pct: f64,
    days: i64,
    convention: DayCountConvention,
) -> f64 {
    balance * (annual_rate_pct / 100.0) * (days as f64 / convention.denominator())
}

/// Whole calendar months from `from` to `to`, negative if `to` is earlier
///
/// A partial month does not count: 15 Jan → 14 Mar is 1 month.
pub fn months_between(from: NaiveDate, to: NaiveDate) -> i64 {
    let mut months =
        (to.year() as i64 - from.year() as i64) * 12 + (to.month() as i64 - from.month() as i64);
    if months > 0 && to.day() < from.day() {
        months -= 1;
    } else if months < 0 && to.day() > from.day() {
        months += 1;
    }
    months
}

/// Round to the persisted precision
pub fn round_amount(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let scale = 10f64.powi(AMOUNT_DECIMALS);
    (value * scale).round() / scale
}

/// Clean a raw monetary string: strip separators and currency marks, coerce
/// anything non-numeric to zero, cap to the persisted precision
pub fn clean_amount(raw: &str) -> f64 {
    let stripped: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '_' | ' ' | '$' | '€' | '£'))
        .collect();
    stripped
        .parse::<f64>()
        .map(round_amount)
        .unwrap_or(0.0)
}
