use leadflow_db::repositories::{SqlAssignmentRepository, SqlLeadRepository};
use leadflow_db::{AssignmentError, AssignmentSettings, Assigner};

use crate::commands::{open_database, prepare, to_details, CommandResult, Failure};

pub fn run(limit: Option<u32>) -> CommandResult {
    let (config, runtime) = match prepare("assign-pending") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let limit = limit.unwrap_or(config.assignment.batch_limit);
    if limit == 0 {
        return CommandResult::failure(
            "assign-pending",
            "invalid_argument",
            "--limit must be greater than zero",
            2,
        );
    }

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;

        let assigner = Assigner::with_settings(
            SqlAssignmentRepository::new(pool.clone()),
            AssignmentSettings::from(&config.assignment),
        );
        let leads = SqlLeadRepository::new(pool.clone());

        assigner.initialize().await.map_err(assignment_failure)?;
        let report = assigner.drain_pending(&leads, limit).await.map_err(assignment_failure)?;

        pool.close().await;
        Ok::<_, Failure>(report)
    });

    match result {
        Ok(report) => {
            let message = if report.halted_on_exhaustion {
                format!("assigned {} pending lead(s); no active advisors remain", report.assigned)
            } else {
                format!("assigned {} pending lead(s)", report.assigned)
            };
            match to_details(&report) {
                Ok(details) => {
                    CommandResult::success_with_details("assign-pending", message, Some(details))
                }
                Err((error_class, message, exit_code)) => {
                    CommandResult::failure("assign-pending", error_class, message, exit_code)
                }
            }
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("assign-pending", error_class, message, exit_code)
        }
    }
}

fn assignment_failure(error: AssignmentError) -> Failure {
    let error_class = match error {
        AssignmentError::Transient { .. } => "assignment_transient",
        AssignmentError::InvariantViolation(_) => "assignment_invariant",
        AssignmentError::LeadNotPending(_) => "assignment_lead_state",
        AssignmentError::LeadNotFound(_) => "assignment_lead_missing",
    };
    (error_class, error.to_string(), 6u8)
}

#[cfg(test)]
mod tests {
    use leadflow_core::domain::lead::LeadId;
    use leadflow_db::AssignmentError;

    use super::assignment_failure;

    #[test]
    fn assignment_errors_share_exit_code_but_not_class() {
        let transient =
            assignment_failure(AssignmentError::Transient { attempts: 3, message: "busy".into() });
        let invariant = assignment_failure(AssignmentError::InvariantViolation("gap".into()));
        let lead = assignment_failure(AssignmentError::LeadNotPending(LeadId(4)));

        assert_eq!((transient.0, transient.2), ("assignment_transient", 6));
        assert_eq!((invariant.0, invariant.2), ("assignment_invariant", 6));
        assert_eq!(lead.0, "assignment_lead_state");
        assert_eq!(lead.1, "lead 4 is not pending assignment");

        let missing = assignment_failure(AssignmentError::LeadNotFound(LeadId(9)));
        assert_eq!(missing.0, "assignment_lead_missing");
        assert_eq!(missing.1, "lead 9 does not exist");
    }
}
