use leadflow_db::DemoDataset;
use serde_json::json;

use crate::commands::{open_database, prepare, CommandResult, Failure};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;

        let seed_result = DemoDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        pool.close().await;

        if !verification.all_present {
            let failed_checks: Vec<&str> = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
                .collect();
            return Err(("seed_verification", verification_message(&failed_checks), 6u8));
        }
        Ok::<_, Failure>(seed_result)
    });

    match result {
        Ok(seed_result) => CommandResult::success_with_details(
            "seed",
            format!(
                "demo dataset ready: {} advisors, {} leads",
                DemoDataset::advisor_count(),
                DemoDataset::lead_count()
            ),
            Some(json!({
                "advisors_inserted": seed_result.advisors_inserted,
                "leads_inserted": seed_result.leads_inserted,
            })),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::verification_message;

    #[test]
    fn verification_message_names_failed_checks() {
        let message = verification_message(&[
            "advisor andrea.gomez@leadflow.test",
            "lead laura.diaz@example.test",
        ]);

        assert_eq!(
            message,
            "seed verification failed for checks: advisor andrea.gomez@leadflow.test, \
             lead laura.diaz@example.test"
        );
    }

    #[test]
    fn verification_message_falls_back_to_generic_text() {
        assert_eq!(verification_message(&[]), "some seed data failed to load");
    }
}
