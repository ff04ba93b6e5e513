//! Shared portfolio used by stage and pipeline tests
//!
//! - `A1`: 1200 at 12%, monthly 30/360 equal principal, rating BBB, stage 1
//! - `A2`: 5000 at 6%, quarterly bullet, 45 days past due, stage 2
//! - `A3`: 800 at 10%, 120 days past due, stage 3 (forced default)

use chrono::NaiveDate;

use crate::account::{AccountSnapshot, PortfolioInputs, RepaymentType, StageDetermination};
use crate::daycount::{DayCountConvention, TermUnit};
use crate::pd::{PdTermStructure, PdTermStructureDetail, StructureType};
use crate::store::InMemoryStore;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn as_of() -> NaiveDate {
    date(2024, 1, 15)
}

#[allow(clippy::too_many_arguments)]
pub fn account(
    id: &str,
    balance: f64,
    rate: f64,
    day_count: DayCountConvention,
    term_unit: TermUnit,
    repayment_type: RepaymentType,
    next: NaiveDate,
    maturity: NaiveDate,
    stage: u8,
    structure: &str,
) -> AccountSnapshot {
    AccountSnapshot {
        as_of: as_of(),
        account_id: id.to_string(),
        outstanding_balance: balance,
        interest_rate: rate,
        day_count,
        term_unit,
        repayment_type,
        start_date: Some(date(2023, 12, 15)),
        next_payment_date: Some(next),
        maturity_date: Some(maturity),
        stage,
        segment: "retail".to_string(),
        pd_structure_id: Some(structure.to_string()),
    }
}

pub fn stage(id: &str, stage: u8, eir: f64, lgd: f64, dpd: u32, rating: Option<&str>) -> StageDetermination {
    StageDetermination {
        as_of: as_of(),
        account_id: id.to_string(),
        stage,
        effective_interest_rate: eir,
        lgd,
        days_past_due: dpd,
        rating: rating.map(str::to_string),
        term_unit: TermUnit::Month,
    }
}

fn detail(structure: &str, band: &str, bucket: u32, pd: f64) -> PdTermStructureDetail {
    PdTermStructureDetail {
        structure_id: structure.to_string(),
        band: band.to_string(),
        bucket,
        pd,
        account_id: None,
    }
}

pub fn inputs() -> PortfolioInputs {
    PortfolioInputs {
        accounts: vec![
            account(
                "A1",
                1200.0,
                12.0,
                DayCountConvention::Thirty360,
                TermUnit::Month,
                RepaymentType::EqualPrincipal,
                date(2024, 2, 15),
                date(2025, 1, 15),
                1,
                "PD_R",
            ),
            account(
                "A2",
                5000.0,
                6.0,
                DayCountConvention::Thirty365,
                TermUnit::Quarter,
                RepaymentType::Bullet,
                date(2024, 4, 15),
                date(2026, 1, 15),
                2,
                "PD_D",
            ),
            account(
                "A3",
                800.0,
                10.0,
                DayCountConvention::Thirty360,
                TermUnit::Month,
                RepaymentType::EqualPrincipal,
                date(2024, 2, 15),
                date(2024, 12, 15),
                3,
                "PD_D",
            ),
        ],
        schedules: Vec::new(),
        stages: vec![
            stage("A1", 1, 12.0, 0.45, 0, Some("BBB")),
            stage("A2", 2, 6.0, 0.4, 45, None),
            stage("A3", 3, 10.0, 0.6, 120, None),
        ],
        structures: vec![
            PdTermStructure {
                id: "PD_R".to_string(),
                structure_type: StructureType::Rating,
                frequency: TermUnit::Month,
            },
            PdTermStructure {
                id: "PD_D".to_string(),
                structure_type: StructureType::Delinquency,
                frequency: TermUnit::Quarter,
            },
        ],
        details: vec![
            detail("PD_R", "BBB", 12, 0.02),
            detail("PD_D", "31-60", 4, 0.08),
            detail("PD_D", "31-60", 8, 0.15),
        ],
    }
}

pub fn store() -> InMemoryStore {
    InMemoryStore::from_inputs(inputs())
}
