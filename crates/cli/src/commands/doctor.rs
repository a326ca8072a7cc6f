use leadflow_core::config::{AppConfig, LoadOptions};
use leadflow_db::migrations;
use leadflow_db::repositories::{AssignmentRepository, SqlAssignmentRepository};
use leadflow_db::{connect_with_config, DbPool};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DATABASE_CHECKS: &[&str] = &["schema_migrations", "rotation_state", "active_advisors"];

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.push(DoctorCheck::skipped(
                "database_connectivity",
                "configuration did not load",
            ));
            for name in DATABASE_CHECKS {
                checks.push(DoctorCheck::skipped(*name, "configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let mut checks = vec![DoctorCheck::fail(
                "database_connectivity",
                format!("failed to initialize async runtime: {error}"),
            )];
            checks.extend(
                DATABASE_CHECKS.iter().map(|name| DoctorCheck::skipped(*name, "no async runtime")),
            );
            return checks;
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                let mut checks = vec![DoctorCheck::fail(
                    "database_connectivity",
                    format!("failed to connect to database: {error}"),
                )];
                checks.extend(
                    DATABASE_CHECKS
                        .iter()
                        .map(|name| DoctorCheck::skipped(*name, "the database is unreachable")),
                );
                return checks;
            }
        };

        let mut checks = vec![DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        )];
        let schema = check_migrations(&pool).await;
        let schema_ready = schema.status == CheckStatus::Pass;
        checks.push(schema);

        if schema_ready {
            let repository = SqlAssignmentRepository::new(pool.clone());
            checks.push(check_rotation_state(&repository).await);
            checks.push(check_active_advisors(&repository).await);
        } else {
            checks.push(DoctorCheck::skipped("rotation_state", "the schema is not migrated"));
            checks.push(DoctorCheck::skipped("active_advisors", "the schema is not migrated"));
        }

        pool.close().await;
        checks
    })
}

async fn check_migrations(pool: &DbPool) -> DoctorCheck {
    match migrations::status(pool).await {
        Ok(status) if status.is_current() => DoctorCheck::pass(
            "schema_migrations",
            format!("{} migration(s) applied", status.applied),
        ),
        Ok(status) => DoctorCheck::fail(
            "schema_migrations",
            format!(
                "{} of {} migration(s) applied; run `leadflow migrate`",
                status.applied, status.expected
            ),
        ),
        Err(error) => DoctorCheck::fail(
            "schema_migrations",
            format!("migration history unavailable ({error}); run `leadflow migrate`"),
        ),
    }
}

async fn check_rotation_state(repository: &SqlAssignmentRepository) -> DoctorCheck {
    match repository.load_rotation_state().await {
        Ok(Some(state)) => DoctorCheck::pass(
            "rotation_state",
            match state.last_assigned {
                Some(advisor) => {
                    format!("version {}, last assigned advisor {advisor}", state.version)
                }
                None => format!("version {}, no advisor assigned yet", state.version),
            },
        ),
        Ok(None) => DoctorCheck::fail(
            "rotation_state",
            "rotation state row is missing; run `leadflow migrate`",
        ),
        Err(error) => DoctorCheck::fail("rotation_state", error.to_string()),
    }
}

async fn check_active_advisors(repository: &SqlAssignmentRepository) -> DoctorCheck {
    match repository.list_active_advisors().await {
        Ok(roster) if roster.is_empty() => DoctorCheck::fail(
            "active_advisors",
            "no active advisors; new leads will stay pending",
        ),
        Ok(roster) => {
            DoctorCheck::pass("active_advisors", format!("{} advisor(s) active", roster.len()))
        }
        Err(error) => DoctorCheck::fail("active_advisors", error.to_string()),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::{render_human, CheckStatus, DoctorCheck, DoctorReport};

    #[test]
    fn human_rendering_marks_each_check() {
        let report = DoctorReport {
            overall_status: CheckStatus::Fail,
            summary: "doctor: one or more readiness checks failed".to_string(),
            checks: vec![
                DoctorCheck::pass("config_validation", "configuration loaded and validated"),
                DoctorCheck::fail("active_advisors", "no active advisors"),
                DoctorCheck::skipped("rotation_state", "the schema is not migrated"),
            ],
        };

        let rendered = render_human(&report);

        assert_eq!(
            rendered,
            "doctor: one or more readiness checks failed\n\
             - [ok] config_validation: configuration loaded and validated\n\
             - [fail] active_advisors: no active advisors\n\
             - [skip] rotation_state: skipped because the schema is not migrated"
        );
    }
}
