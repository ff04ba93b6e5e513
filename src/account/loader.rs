//! Load account, schedule and stage-determination inputs from CSV
//!
//! Monetary columns are read as text and run through [`clean_amount`]; bad
//! dates load as `None` so the account fails on its own at projection time.

use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use csv::Reader;

use super::{AccountSnapshot, PaymentScheduleRow, RepaymentType, StageDetermination};
use crate::daycount::{clean_amount, DayCountConvention, TermUnit};
use crate::error::Result;

/// File names expected in an input directory
pub const ACCOUNTS_FILE: &str = "accounts.csv";
pub const SCHEDULES_FILE: &str = "payment_schedules.csv";
pub const STAGES_FILE: &str = "stage_determination.csv";

/// Parse an ISO date, tolerating surrounding whitespace and a time suffix
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let date_part = trimmed.split(['T', ' ']).next().unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date_part, "%d/%m/%Y"))
        .ok()
}

fn optional(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Raw CSV row for accounts.csv
#[derive(Debug, serde::Deserialize)]
struct AccountCsvRow {
    as_of: String,
    account_id: String,
    outstanding_balance: String,
    interest_rate: String,
    #[serde(default)]
    day_count: String,
    #[serde(default)]
    term_unit: String,
    #[serde(default)]
    repayment_type: String,
    #[serde(default)]
    start_date: String,
    #[serde(default)]
    next_payment_date: String,
    #[serde(default)]
    maturity_date: String,
    #[serde(default)]
    stage: Option<u8>,
    #[serde(default)]
    segment: String,
    #[serde(default)]
    pd_structure_id: String,
}

impl AccountCsvRow {
    fn into_snapshot(self) -> Option<AccountSnapshot> {
        let as_of = parse_date(&self.as_of)?;
        Some(AccountSnapshot {
            as_of,
            account_id: self.account_id.trim().to_string(),
            outstanding_balance: clean_amount(&self.outstanding_balance),
            interest_rate: clean_amount(&self.interest_rate),
            day_count: DayCountConvention::parse(&self.day_count),
            term_unit: TermUnit::parse(&self.term_unit),
            repayment_type: RepaymentType::parse(&self.repayment_type),
            start_date: parse_date(&self.start_date),
            next_payment_date: parse_date(&self.next_payment_date),
            maturity_date: parse_date(&self.maturity_date),
            stage: self.stage.unwrap_or(1),
            segment: self.segment.trim().to_string(),
            pd_structure_id: optional(&self.pd_structure_id),
        })
    }
}

/// Raw CSV row for payment_schedules.csv
#[derive(Debug, serde::Deserialize)]
struct ScheduleCsvRow {
    account_id: String,
    payment_date: String,
    principal: String,
}

/// Raw CSV row for stage_determination.csv
#[derive(Debug, serde::Deserialize)]
struct StageCsvRow {
    as_of: String,
    account_id: String,
    #[serde(default)]
    stage: Option<u8>,
    #[serde(default)]
    effective_interest_rate: String,
    #[serde(default)]
    lgd: String,
    #[serde(default)]
    days_past_due: Option<u32>,
    #[serde(default)]
    rating: String,
    #[serde(default)]
    term_unit: String,
}

/// Load account snapshots from any reader
///
/// Rows without a parseable as-of date cannot be keyed and are skipped with a warning.
pub fn load_accounts_from_reader<R: Read>(reader: R) -> Result<Vec<AccountSnapshot>> {
    let mut csv_reader = Reader::from_reader(reader);
    let mut accounts = Vec::new();

    for result in csv_reader.deserialize() {
        let row: AccountCsvRow = result?;
        let account_id = row.account_id.clone();
        match row.into_snapshot() {
            Some(snapshot) => accounts.push(snapshot),
            None => log::warn!("Skipping account {}: unparseable as-of date", account_id),
        }
    }

    Ok(accounts)
}

/// Load payment schedule rows from any reader
pub fn load_schedules_from_reader<R: Read>(reader: R) -> Result<Vec<PaymentScheduleRow>> {
    let mut csv_reader = Reader::from_reader(reader);
    let mut rows = Vec::new();

    for result in csv_reader.deserialize() {
        let row: ScheduleCsvRow = result?;
        match parse_date(&row.payment_date) {
            Some(payment_date) => rows.push(PaymentScheduleRow {
                account_id: row.account_id.trim().to_string(),
                payment_date,
                principal: clean_amount(&row.principal),
            }),
            None => log::warn!(
                "Skipping schedule row for {}: bad payment date {:?}",
                row.account_id,
                row.payment_date
            ),
        }
    }

    Ok(rows)
}

/// Load stage-determination records from any reader
pub fn load_stages_from_reader<R: Read>(reader: R) -> Result<Vec<StageDetermination>> {
    let mut csv_reader = Reader::from_reader(reader);
    let mut rows = Vec::new();

    for result in csv_reader.deserialize() {
        let row: StageCsvRow = result?;
        let Some(as_of) = parse_date(&row.as_of) else {
            log::warn!("Skipping stage record for {}: bad as-of date", row.account_id);
            continue;
        };
        rows.push(StageDetermination {
            as_of,
            account_id: row.account_id.trim().to_string(),
            stage: row.stage.unwrap_or(1),
            effective_interest_rate: clean_amount(&row.effective_interest_rate),
            lgd: clean_amount(&row.lgd),
            days_past_due: row.days_past_due.unwrap_or(0),
            rating: optional(&row.rating),
            term_unit: TermUnit::parse(&row.term_unit),
        });
    }

    Ok(rows)
}

/// Load accounts.csv from an input directory
pub fn load_accounts(dir: &Path) -> Result<Vec<AccountSnapshot>> {
    load_accounts_from_reader(std::fs::File::open(dir.join(ACCOUNTS_FILE))?)
}

/// Load payment_schedules.csv from an input directory; a missing file means no explicit schedules
pub fn load_schedules(dir: &Path) -> Result<Vec<PaymentScheduleRow>> {
    let path = dir.join(SCHEDULES_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    load_schedules_from_reader(std::fs::File::open(path)?)
}

/// Load stage_determination.csv from an input directory
pub fn load_stages(dir: &Path) -> Result<Vec<StageDetermination>> {
    load_stages_from_reader(std::fs::File::open(dir.join(STAGES_FILE))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNTS_CSV: &str = "\
as_of,account_id,outstanding_balance,interest_rate,day_count,term_unit,repayment_type,start_date,next_payment_date,maturity_date,stage,segment,pd_structure_id
2024-01-31,A1,\"1,200.00\",12,30/360,M,,2024-01-15,2024-02-15,2025-01-15,1,retail,PD_R
2024-01-31,A2,abc,5,30/365,Q,bullet,,not-a-date,2026-01-01,2,sme,
";

    #[test]
    fn test_load_accounts() {
        let accounts = load_accounts_from_reader(ACCOUNTS_CSV.as_bytes()).unwrap();
        assert_eq!(accounts.len(), 2);

        let a1 = &accounts[0];
        assert_eq!(a1.account_id, "A1");
        assert_eq!(a1.outstanding_balance, 1200.0);
        assert_eq!(a1.day_count, DayCountConvention::Thirty360);
        assert_eq!(a1.term_unit, TermUnit::Month);
        assert_eq!(a1.pd_structure_id.as_deref(), Some("PD_R"));

        let a2 = &accounts[1];
        assert_eq!(a2.outstanding_balance, 0.0);
        assert_eq!(a2.repayment_type, RepaymentType::Bullet);
        assert!(a2.next_payment_date.is_none());
        assert!(a2.pd_structure_id.is_none());
        assert_eq!(a2.stage, 2);
    }

    #[test]
    fn test_load_stages() {
        let csv = "\
as_of,account_id,stage,effective_interest_rate,lgd,days_past_due,rating,term_unit
2024-01-31,A1,1,6.5,0.45,0,BBB,M
2024-01-31,A2,3,5,0.6,120,,Q
";
        let stages = load_stages_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].rating.as_deref(), Some("BBB"));
        assert!(stages[1].is_defaulted(90));
        assert!(stages[1].rating.is_none());
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5);
        assert_eq!(parse_date("2024-03-05"), expected);
        assert_eq!(parse_date("2024-03-05T00:00:00"), expected);
        assert_eq!(parse_date("05/03/2024"), expected);
        assert_eq!(parse_date(""), None);
    }
}
