//! Stage outcomes and end-to-end orchestration
//!
//! Every stage reports a [`StageOutcome`] rather than returning early on the
//! first bad account: per-entity failures are collected and the stage carries
//! on, while a fatal error (a store failure, a rejected method) marks the
//! stage as failed and stops the pipeline.

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::discount::apply_discounting;
use crate::ecl::{aggregate_ecl, enrich_losses, populate_reporting_lines};
use crate::error::{EclError, Result};
use crate::pd::{assign_pds, interpolate_pds};
use crate::persistence::{persist_cashflows, register_next_run, RunKey};
use crate::projection::PortfolioProjector;
use crate::store::SharedStore;

/// One entity a stage could not process
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityFailure {
    pub entity_id: String,
    pub reason: String,
}

/// Result of one stage over one as-of date
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub stage: &'static str,
    /// False only when the stage hit a fatal error
    pub succeeded: bool,
    /// Entities (or rows) written
    pub processed: usize,
    pub failures: Vec<EntityFailure>,
    /// Fatal error, if any
    pub error: Option<String>,
}

impl StageOutcome {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            succeeded: true,
            processed: 0,
            failures: Vec::new(),
            error: None,
        }
    }

    /// Mark the stage failed
    pub fn fatal(mut self, error: EclError) -> Self {
        log::error!("Stage {} failed: {}", self.stage, error);
        self.succeeded = false;
        self.error = Some(error.to_string());
        self
    }

    /// Record a per-entity failure and keep going
    pub fn record_failure(&mut self, entity_id: &str, error: &EclError) {
        self.record_failure_reason(entity_id, error.to_string());
    }

    pub fn record_failure_reason(&mut self, entity_id: &str, reason: String) {
        log::warn!("{}: {} failed: {}", self.stage, entity_id, reason);
        self.failures.push(EntityFailure {
            entity_id: entity_id.to_string(),
            reason,
        });
    }

    /// Succeeded with no per-entity failures
    pub fn is_clean(&self) -> bool {
        self.succeeded && self.failures.is_empty()
    }
}

/// Outcomes of a pipeline run, in stage order
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub as_of: NaiveDate,
    pub outcomes: Vec<StageOutcome>,
}

impl PipelineReport {
    /// Whether every stage ran and none failed fatally
    pub fn succeeded(&self) -> bool {
        self.outcomes.len() == Stage::ALL.len() && self.outcomes.iter().all(|o| o.succeeded)
    }

    /// The stage that stopped the run, if any
    pub fn failed_stage(&self) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| !o.succeeded)
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.iter().map(|o| o.failures.len()).sum()
    }
}

/// Pipeline stages in dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ProjectCashflows,
    PersistCashflows,
    ApplyDiscounting,
    InterpolatePds,
    AssignPds,
    EnrichLosses,
    PopulateReportingLines,
    AggregateEcl,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::ProjectCashflows,
        Stage::PersistCashflows,
        Stage::ApplyDiscounting,
        Stage::InterpolatePds,
        Stage::AssignPds,
        Stage::EnrichLosses,
        Stage::PopulateReportingLines,
        Stage::AggregateEcl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ProjectCashflows => "project_cashflows",
            Stage::PersistCashflows => "persist_cashflows",
            Stage::ApplyDiscounting => "apply_discounting",
            Stage::InterpolatePds => "interpolate_pds",
            Stage::AssignPds => "assign_pds",
            Stage::EnrichLosses => "enrich_losses",
            Stage::PopulateReportingLines => "populate_reporting_lines",
            Stage::AggregateEcl => "aggregate_ecl",
        }
    }
}

/// Runs every stage for an as-of date against one store
///
/// # Example
/// ```ignore
/// let pipeline = Pipeline::new(store, EngineConfig::default());
/// pipeline.start_run().await?;
/// let report = pipeline.run(as_of).await;
/// ```
#[derive(Clone)]
pub struct Pipeline {
    store: SharedStore,
    config: EngineConfig,
}

impl Pipeline {
    pub fn new(store: SharedStore, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Register a new run key so this run's rows form a new vintage
    pub async fn start_run(&self) -> Result<RunKey> {
        register_next_run(self.store.as_ref()).await
    }

    /// Run one stage on its own
    pub async fn run_stage(&self, stage: Stage, as_of: NaiveDate) -> StageOutcome {
        let store = self.store.as_ref();
        match stage {
            Stage::ProjectCashflows => {
                PortfolioProjector::new(self.store.clone(), &self.config)
                    .project_portfolio(as_of)
                    .await
            }
            Stage::PersistCashflows => persist_cashflows(store, as_of).await,
            Stage::ApplyDiscounting => apply_discounting(store, as_of).await,
            Stage::InterpolatePds => interpolate_pds(store, as_of, &self.config).await,
            Stage::AssignPds => assign_pds(store, as_of, &self.config).await,
            Stage::EnrichLosses => enrich_losses(store, as_of, &self.config).await,
            Stage::PopulateReportingLines => populate_reporting_lines(store, as_of).await,
            Stage::AggregateEcl => {
                aggregate_ecl(store, as_of, self.config.ecl_method, &self.config).await
            }
        }
    }

    /// Run every stage in order, stopping at the first fatal failure
    pub async fn run(&self, as_of: NaiveDate) -> PipelineReport {
        log::info!(
            "Running ECL pipeline for {} on {} store ({} method)",
            as_of,
            self.store.backend_name(),
            self.config.ecl_method.as_str()
        );

        let mut outcomes = Vec::with_capacity(Stage::ALL.len());
        for stage in Stage::ALL {
            let outcome = self.run_stage(stage, as_of).await;
            let stop = !outcome.succeeded;
            log::info!(
                "Stage {}: processed {}, {} failures",
                outcome.stage,
                outcome.processed,
                outcome.failures.len()
            );
            outcomes.push(outcome);
            if stop {
                log::error!("Pipeline stopped at {}", stage.as_str());
                break;
            }
        }

        PipelineReport { as_of, outcomes }
    }
}
