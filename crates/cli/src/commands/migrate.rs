use leadflow_db::repositories::SqlAssignmentRepository;
use leadflow_db::Assigner;

use crate::commands::{open_database, prepare, CommandResult, Failure};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("migrate") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;

        let assigner = Assigner::new(SqlAssignmentRepository::new(pool.clone()));
        let created = assigner
            .initialize()
            .await
            .map_err(|error| ("rotation_state", error.to_string(), 5u8))?;

        pool.close().await;
        Ok::<bool, Failure>(created)
    });

    match result {
        Ok(true) => {
            CommandResult::success("migrate", "applied pending migrations; rotation state created")
        }
        Ok(false) => CommandResult::success("migrate", "applied pending migrations"),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
