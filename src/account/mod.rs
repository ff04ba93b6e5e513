//! Account snapshots, explicit payment schedules and stage determination inputs

mod data;
pub mod loader;

use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::pd::{loader as pd_loader, PdTermStructure, PdTermStructureDetail};

pub use data::{AccountSnapshot, PaymentScheduleRow, RepaymentType, StageDetermination};
pub use loader::{load_accounts, load_schedules, load_stages};

/// Everything the engine reads from external collaborators
#[derive(Debug, Clone, Default)]
pub struct PortfolioInputs {
    pub accounts: Vec<AccountSnapshot>,
    pub schedules: Vec<PaymentScheduleRow>,
    pub stages: Vec<StageDetermination>,
    pub structures: Vec<PdTermStructure>,
    pub details: Vec<PdTermStructureDetail>,
}

impl PortfolioInputs {
    /// Load every input CSV from one directory
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let inputs = Self {
            accounts: load_accounts(dir)?,
            schedules: load_schedules(dir)?,
            stages: load_stages(dir)?,
            structures: pd_loader::load_structures(dir)?,
            details: pd_loader::load_details(dir)?,
        };
        log::info!(
            "Loaded {} accounts, {} schedule rows, {} stage records, {} PD structures ({} detail rows) from {}",
            inputs.accounts.len(),
            inputs.schedules.len(),
            inputs.stages.len(),
            inputs.structures.len(),
            inputs.details.len(),
            dir.display()
        );
        Ok(inputs)
    }
}

/// Index stage-determination records by account id
pub fn stages_by_account(stages: Vec<StageDetermination>) -> HashMap<String, StageDetermination> {
    stages
        .into_iter()
        .map(|s| (s.account_id.clone(), s))
        .collect()
}
