//! Probability-of-default term structures, curve interpolation and assignment
//!
//! - [`interpolation`]: point PD → cumulative default curve (four models)
//! - [`cache`]: in-memory lookup of term-structure detail rows, built once per run
//! - [`assignment`]: 12-month / lifetime bucket matching onto accounts
//! - [`batch`]: bulk → micro-batch → single-row write cascade

pub mod assignment;
pub mod batch;
pub mod cache;
pub mod interpolation;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::daycount::TermUnit;
use crate::persistence::RunKey;

pub use assignment::{assign_pds, delinquency_band, BucketPlacement};
pub use batch::{write_in_chunks, ChunkSchedule, ChunkedWriteReport};
pub use cache::PdLookupCache;
pub use interpolation::{interpolate_pds, InterpolationMethod};

/// How a term structure is banded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureType {
    /// Banded by rating grade ("R")
    Rating,
    /// Banded by days-past-due ("D")
    Delinquency,
}

impl StructureType {
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "R" | "RATING" => Some(StructureType::Rating),
            "D" | "DELINQUENCY" => Some(StructureType::Delinquency),
            _ => None,
        }
    }
}

/// A named PD curve definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdTermStructure {
    pub id: String,
    pub structure_type: StructureType,
    /// Width of one PD bucket
    pub frequency: TermUnit,
}

impl PdTermStructure {
    /// Bucket width in months: M → 1, Q → 3, H → 6, Y → 12 (anything else monthly)
    pub fn bucket_size_months(&self) -> u32 {
        match self.frequency {
            TermUnit::Quarter => 3,
            TermUnit::HalfYear => 6,
            TermUnit::Year => 12,
            _ => 1,
        }
    }

    /// Number of buckets spanning one year; the interpolation `max_bucket`
    pub fn buckets_per_year(&self) -> u32 {
        12u32.div_ceil(self.bucket_size_months())
    }
}

/// Point PD for one (band, bucket) of a structure, optionally pinned to one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdTermStructureDetail {
    pub structure_id: String,
    /// Rating grade or delinquency band
    pub band: String,
    pub bucket: u32,
    /// Cumulative PD to the end of the bucket
    pub pd: f64,
    /// Account-specific override
    pub account_id: Option<String>,
}

/// One point of an account's interpolated cumulative PD curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdCurvePoint {
    pub as_of: NaiveDate,
    pub account_id: String,
    pub bucket: u32,
    pub cumulative_pd: f64,
}

/// PDs written back onto stage determination for one account, date and run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdAssignment {
    pub as_of: NaiveDate,
    pub account_id: String,
    pub run_key: RunKey,
    pub pd_12m: f64,
    pub pd_lifetime: f64,
    pub twelve_month_bucket: u32,
    pub lifetime_bucket: u32,
    /// Forced to PD = 1 by the delinquency threshold
    pub defaulted: bool,
}

/// Loader for PD structure CSVs
pub mod loader {
    use std::io::Read;
    use std::path::Path;

    use csv::Reader;

    use super::{PdTermStructure, PdTermStructureDetail, StructureType};
    use crate::daycount::{clean_amount, TermUnit};
    use crate::error::Result;

    pub const STRUCTURES_FILE: &str = "pd_term_structures.csv";
    pub const DETAILS_FILE: &str = "pd_term_structure_details.csv";

    #[derive(Debug, serde::Deserialize)]
    struct StructureCsvRow {
        id: String,
        structure_type: String,
        frequency: String,
    }

    #[derive(Debug, serde::Deserialize)]
    struct DetailCsvRow {
        structure_id: String,
        band: String,
        bucket: u32,
        pd: String,
        #[serde(default)]
        account_id: String,
    }

    pub fn load_structures_from_reader<R: Read>(reader: R) -> Result<Vec<PdTermStructure>> {
        let mut csv_reader = Reader::from_reader(reader);
        let mut structures = Vec::new();
        for result in csv_reader.deserialize() {
            let row: StructureCsvRow = result?;
            match StructureType::parse(&row.structure_type) {
                Some(structure_type) => structures.push(PdTermStructure {
                    id: row.id.trim().to_string(),
                    structure_type,
                    frequency: TermUnit::parse(&row.frequency),
                }),
                None => log::warn!(
                    "Skipping PD structure {}: unknown type {:?}",
                    row.id,
                    row.structure_type
                ),
            }
        }
        Ok(structures)
    }

    pub fn load_details_from_reader<R: Read>(reader: R) -> Result<Vec<PdTermStructureDetail>> {
        let mut csv_reader = Reader::from_reader(reader);
        let mut details = Vec::new();
        for result in csv_reader.deserialize() {
            let row: DetailCsvRow = result?;
            let account = row.account_id.trim();
            details.push(PdTermStructureDetail {
                structure_id: row.structure_id.trim().to_string(),
                band: row.band.trim().to_string(),
                bucket: row.bucket,
                pd: clean_amount(&row.pd),
                account_id: (!account.is_empty()).then(|| account.to_string()),
            });
        }
        Ok(details)
    }

    pub fn load_structures(dir: &Path) -> Result<Vec<PdTermStructure>> {
        load_structures_from_reader(std::fs::File::open(dir.join(STRUCTURES_FILE))?)
    }

    pub fn load_details(dir: &Path) -> Result<Vec<PdTermStructureDetail>> {
        load_details_from_reader(std::fs::File::open(dir.join(DETAILS_FILE))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structure(frequency: TermUnit) -> PdTermStructure {
        PdTermStructure {
            id: "S".to_string(),
            structure_type: StructureType::Rating,
            frequency,
        }
    }

    #[test]
    fn test_bucket_sizes() {
        assert_eq!(structure(TermUnit::Month).bucket_size_months(), 1);
        assert_eq!(structure(TermUnit::Quarter).bucket_size_months(), 3);
        assert_eq!(structure(TermUnit::HalfYear).bucket_size_months(), 6);
        assert_eq!(structure(TermUnit::Year).bucket_size_months(), 12);
        assert_eq!(structure(TermUnit::Quarter).buckets_per_year(), 4);
        assert_eq!(structure(TermUnit::Year).buckets_per_year(), 1);
    }

    #[test]
    fn test_load_details() {
        let csv = "\
structure_id,band,bucket,pd,account_id
PD_R,BBB,12,0.02,
PD_R,BBB,24,0.035,
PD_R,BBB,12,0.5,A9
";
        let details = loader::load_details_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(details.len(), 3);
        assert!(details[0].account_id.is_none());
        assert_eq!(details[2].account_id.as_deref(), Some("A9"));
    }

    #[test]
    fn test_load_structures_skips_unknown_type() {
        let csv = "id,structure_type,frequency\nPD_R,R,M\nPD_X,Z,Q\nPD_D,D,Q\n";
        let structures = loader::load_structures_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(structures.len(), 2);
        assert_eq!(structures[1].structure_type, StructureType::Delinquency);
    }
}
