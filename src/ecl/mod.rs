//! Expected credit loss: loss enrichment of versioned cashflows, reporting-line
//! population and the three aggregation methods

pub mod enrichment;
pub mod methods;
pub mod reporting;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{EclError, Result};
use crate::persistence::RunKey;

pub use enrichment::enrich_losses;
pub use methods::{aggregate_ecl, aggregate_ecl_by_name, compute_updates, total_final_ecl};
pub use reporting::populate_reporting_lines;

/// ECL aggregation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EclMethod {
    /// exposure × PD × LGD, undiscounted
    SimpleEad,
    /// Sum of per-bucket cash shortfalls
    CashFlow,
    /// Sum of per-bucket forward expected losses
    ForwardExposure,
}

impl EclMethod {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "simple_ead" => Ok(EclMethod::SimpleEad),
            "cash_flow" => Ok(EclMethod::CashFlow),
            "forward_exposure" => Ok(EclMethod::ForwardExposure),
            _ => Err(EclError::UnknownMethod(name.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EclMethod::SimpleEad => "simple_ead",
            EclMethod::CashFlow => "cash_flow",
            EclMethod::ForwardExposure => "forward_exposure",
        }
    }
}

/// One account's ECL figures for a run and as-of date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportingLine {
    pub run_key: RunKey,
    pub as_of: NaiveDate,
    pub account_id: String,
    pub stage: u8,

    /// Exposure at default (outstanding balance)
    pub exposure: f64,
    pub pd_12m: f64,
    pub pd_lifetime: f64,
    pub lgd: f64,

    pub ecl_12m: Option<f64>,
    pub ecl_lifetime: Option<f64>,
    /// 12-month ECL for stage 1, lifetime ECL for stages 2 and 3
    pub final_ecl: Option<f64>,
    /// Method that produced the ECL columns
    pub method: Option<EclMethod>,
}

impl ReportingLine {
    pub fn uses_lifetime_ecl(&self) -> bool {
        self.stage >= 2
    }
}

/// ECL values written onto an existing reporting line
#[derive(Debug, Clone, PartialEq)]
pub struct EclUpdate {
    pub account_id: String,
    pub ecl_12m: f64,
    pub ecl_lifetime: f64,
    pub final_ecl: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names() {
        for method in [EclMethod::SimpleEad, EclMethod::CashFlow, EclMethod::ForwardExposure] {
            assert_eq!(EclMethod::parse(method.as_str()).unwrap(), method);
        }
        assert!(matches!(EclMethod::parse("monte_carlo"), Err(EclError::UnknownMethod(_))));
    }

    #[test]
    fn test_method_serde() {
        let json = serde_json::to_string(&EclMethod::ForwardExposure).unwrap();
        assert_eq!(json, "\"forward_exposure\"");
    }
}
