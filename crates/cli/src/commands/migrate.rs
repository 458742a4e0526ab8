use attendance_core::config::LoadOptions;
use attendance_db::migrations;

use crate::commands::{load_config, open_pool, runtime, CommandResult};

pub fn run(options: &LoadOptions) -> CommandResult {
    let config = match load_config("migrate", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("migrate") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_pool("migrate", &config).await?;
        let applied = migrations::run_pending(&pool).await;
        pool.close().await;
        applied.map_err(|error| {
            CommandResult::failure("migrate", "migration", error.to_string(), 5)
        })
    });

    match result {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err(failure) => failure,
    }
}
