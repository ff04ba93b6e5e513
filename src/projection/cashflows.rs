//! Expected cashflow buckets produced by projection

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Kind of cashflow a bucket carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CashflowType {
    /// Principal and interest
    #[default]
    Mixed,
    /// Interest only (bullet loans before maturity)
    Interest,
    /// Taken from an explicit payment schedule
    Contractual,
}

impl CashflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CashflowType::Mixed => "mixed",
            CashflowType::Interest => "interest",
            CashflowType::Contractual => "contractual",
        }
    }
}

/// One projected bucket for (as-of date, account, bucket index)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashflowBucket {
    pub as_of: NaiveDate,
    pub account_id: String,

    /// 1-based, contiguous per account and date
    pub bucket_index: u32,

    /// Payment date of the bucket
    pub date: NaiveDate,

    pub principal: f64,
    pub interest: f64,

    /// principal + interest
    pub total: f64,

    /// Balance after this bucket's principal
    pub closing_balance: f64,

    /// Interest accrued on the closing balance since the previous bucket
    pub accrued_interest: f64,

    pub cashflow_type: CashflowType,
}

impl CashflowBucket {
    /// Balance before this bucket's principal is paid
    pub fn opening_balance(&self) -> f64 {
        self.closing_balance + self.principal
    }
}

/// Complete projection for one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionResult {
    pub as_of: NaiveDate,
    pub account_id: String,

    /// Buckets in index order
    pub buckets: Vec<CashflowBucket>,

    /// Whether the buckets came from an explicit payment schedule
    pub schedule_driven: bool,
}

impl ProjectionResult {
    pub fn new(as_of: NaiveDate, account_id: &str, schedule_driven: bool) -> Self {
        Self {
            as_of,
            account_id: account_id.to_string(),
            buckets: Vec::new(),
            schedule_driven,
        }
    }

    /// Add a bucket
    pub fn add_bucket(&mut self, bucket: CashflowBucket) {
        self.buckets.push(bucket);
    }

    /// Get summary statistics
    pub fn summary(&self) -> ProjectionSummary {
        let total_principal: f64 = self.buckets.iter().map(|b| b.principal).sum();
        let total_interest: f64 = self.buckets.iter().map(|b| b.interest).sum();
        let final_balance = self.buckets.last().map(|b| b.closing_balance).unwrap_or(0.0);

        ProjectionSummary {
            bucket_count: self.buckets.len() as u32,
            total_principal,
            total_interest,
            final_balance,
            last_date: self.buckets.last().map(|b| b.date),
        }
    }
}

/// Summary statistics for a projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionSummary {
    pub bucket_count: u32,
    pub total_principal: f64,
    pub total_interest: f64,
    pub final_balance: f64,
    pub last_date: Option<NaiveDate>,
}
