use cadence_db::migrations;

use crate::commands::{with_migrated_database, CommandResult, Failure};

pub fn run() -> CommandResult {
    let recorded = with_migrated_database(|_config, pool| async move {
        migrations::applied_versions(&pool).await.map_err(Failure::migration)
    });

    match recorded {
        Ok(versions) => CommandResult::success(
            "migrate",
            format!("schema is current ({} migrations recorded)", versions.len()),
        ),
        Err(failure) => failure.into_result("migrate"),
    }
}
