//! Reporting-line population for a run

use std::collections::HashMap;

use chrono::NaiveDate;

use super::ReportingLine;
use crate::error::EclError;
use crate::persistence::resolve_run_key;
use crate::pipeline::StageOutcome;
use crate::store::EclStore;

/// Insert one reporting line per staged account missing from (run, as_of)
///
/// Existing lines are never touched, so a second call inserts nothing.
pub async fn populate_reporting_lines(store: &dyn EclStore, as_of: NaiveDate) -> StageOutcome {
    let mut outcome = StageOutcome::new("populate_reporting_lines");

    let loaded = async {
        let run_key = resolve_run_key(store).await?;
        let stages = store.stage_determinations(as_of).await?;
        let balances: HashMap<String, f64> = store
            .accounts(as_of)
            .await?
            .into_iter()
            .map(|a| (a.account_id, a.outstanding_balance))
            .collect();
        let pds: HashMap<String, (f64, f64)> = store
            .pd_assignments(as_of, run_key)
            .await?
            .into_iter()
            .map(|a| (a.account_id, (a.pd_12m, a.pd_lifetime)))
            .collect();
        Ok::<_, EclError>((run_key, stages, balances, pds))
    }
    .await;
    let (run_key, stages, balances, pds) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => return outcome.fatal(e),
    };

    let mut lines = Vec::with_capacity(stages.len());
    for stage in stages {
        let Some(exposure) = balances.get(&stage.account_id).copied() else {
            outcome.record_failure(
                &stage.account_id,
                &EclError::invalid_dates(&stage.account_id, "no account snapshot for the as-of date"),
            );
            continue;
        };
        let (pd_12m, pd_lifetime) = pds.get(&stage.account_id).copied().unwrap_or((0.0, 0.0));
        lines.push(ReportingLine {
            run_key,
            as_of,
            account_id: stage.account_id,
            stage: stage.stage,
            exposure,
            pd_12m,
            pd_lifetime,
            lgd: stage.lgd,
            ecl_12m: None,
            ecl_lifetime: None,
            final_ecl: None,
            method: None,
        });
    }

    match store.insert_missing_reporting_lines(lines).await {
        Ok(inserted) => {
            log::info!("Inserted {} reporting lines for {} run {}", inserted, as_of, run_key);
            outcome.processed = inserted;
            outcome
        }
        Err(e) => outcome.fatal(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::fixtures;
    use crate::pd::assign_pds;
    use crate::persistence::RunKey;

    #[tokio::test]
    async fn test_populates_once() {
        let store = fixtures::store();
        assign_pds(&store, fixtures::as_of(), &EngineConfig::default().without_pauses()).await;

        let first = populate_reporting_lines(&store, fixtures::as_of()).await;
        assert!(first.succeeded);
        assert_eq!(first.processed, 3);

        let second = populate_reporting_lines(&store, fixtures::as_of()).await;
        assert!(second.succeeded);
        assert_eq!(second.processed, 0);

        let lines = store.reporting_lines(fixtures::as_of(), RunKey(1)).await.unwrap();
        assert_eq!(lines.len(), 3);
        let a2 = lines.iter().find(|l| l.account_id == "A2").unwrap();
        assert_eq!(a2.exposure, 5000.0);
        assert_eq!(a2.pd_12m, 0.08);
        assert_eq!(a2.lgd, 0.4);
        assert!(a2.final_ecl.is_none());
    }

    #[tokio::test]
    async fn test_unassigned_pd_defaults_to_zero() {
        let store = fixtures::store();
        populate_reporting_lines(&store, fixtures::as_of()).await;
        let lines = store.reporting_lines(fixtures::as_of(), RunKey(1)).await.unwrap();
        assert!(lines.iter().all(|l| l.pd_12m == 0.0 && l.pd_lifetime == 0.0));
    }
}
