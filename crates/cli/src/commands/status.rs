use std::collections::BTreeMap;

use leadflow_core::domain::advisor::AdvisorId;
use leadflow_core::domain::rotation::RotationState;
use leadflow_core::round_robin::{ActiveRoster, RoundRobinPolicy};
use leadflow_db::repositories::{
    AdvisorRepository, AssignmentRepository, LeadRepository, RepositoryError,
    SqlAdvisorRepository, SqlAssignmentRepository, SqlLeadRepository,
};
use leadflow_db::DbPool;
use serde::Serialize;

use crate::commands::{open_database, prepare, to_details, CommandResult, Failure};

#[derive(Debug, Serialize)]
struct AdvisorWorkload {
    id: AdvisorId,
    name: String,
    active: bool,
    assigned_leads: u64,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    rotation: Option<RotationState>,
    /// Advisor the next assignment would pick if nothing changes first.
    next_advisor: Option<AdvisorId>,
    pending_leads: u64,
    advisors: Vec<AdvisorWorkload>,
}

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("status") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let report =
            collect(&pool).await.map_err(|error| ("status_query", error.to_string(), 3u8))?;
        pool.close().await;
        Ok::<_, Failure>(report)
    });

    let report = match result {
        Ok(report) => report,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("status", error_class, message, exit_code);
        }
    };

    let active = report.advisors.iter().filter(|advisor| advisor.active).count();
    let message = format!(
        "{} pending lead(s), {active} of {} advisor(s) active",
        report.pending_leads,
        report.advisors.len()
    );
    match to_details(&report) {
        Ok(details) => CommandResult::success_with_details("status", message, Some(details)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("status", error_class, message, exit_code)
        }
    }
}

async fn collect(pool: &DbPool) -> Result<StatusReport, RepositoryError> {
    let assignment = SqlAssignmentRepository::new(pool.clone());
    let advisors = SqlAdvisorRepository::new(pool.clone());
    let leads = SqlLeadRepository::new(pool.clone());

    let rotation = assignment.load_rotation_state().await?;
    let roster = ActiveRoster::new(assignment.list_active_advisors().await?)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;
    let last_assigned = rotation.as_ref().and_then(|state| state.last_assigned);
    let next_advisor = RoundRobinPolicy.select(&roster, last_assigned).candidate();

    let workload: BTreeMap<AdvisorId, u64> = leads.count_by_advisor().await?.into_iter().collect();
    let advisors = advisors
        .list_all()
        .await?
        .into_iter()
        .map(|advisor| AdvisorWorkload {
            assigned_leads: workload.get(&advisor.id).copied().unwrap_or(0),
            id: advisor.id,
            name: advisor.name,
            active: advisor.active,
        })
        .collect();

    let pending_leads = leads.count_pending().await?;
    Ok(StatusReport { rotation, next_advisor, pending_leads, advisors })
}
