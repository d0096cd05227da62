use crate::commands::CommandResult;
use tally_core::config::{AppConfig, LoadOptions};
use tally_db::{connect, migrations};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let applied = migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<Vec<String>, (&'static str, String, u8)>(applied)
    });

    match result {
        Ok(applied) => CommandResult::success("migrate", describe_applied(&applied)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}

fn describe_applied(applied: &[String]) -> String {
    if applied.is_empty() {
        "no pending migrations".to_string()
    } else {
        format!("applied {}: {}", count_noun(applied.len()), applied.join(", "))
    }
}

fn count_noun(count: usize) -> String {
    if count == 1 {
        "1 migration".to_string()
    } else {
        format!("{count} migrations")
    }
}

#[cfg(test)]
mod tests {
    use super::describe_applied;

    #[test]
    fn applied_migrations_are_named_in_the_message() {
        assert_eq!(describe_applied(&[]), "no pending migrations");
        assert_eq!(
            describe_applied(&["0001 baseline".to_string()]),
            "applied 1 migration: 0001 baseline"
        );
        assert_eq!(
            describe_applied(&["0001 baseline".to_string(), "0002 indexes".to_string()]),
            "applied 2 migrations: 0001 baseline, 0002 indexes"
        );
    }
}
