use chrono::NaiveDate;

use crate::commands::CommandResult;
use tally_core::config::{AppConfig, LoadOptions};
use tally_core::domain::query::{QueryMetric, QueryPlan};
use tally_core::domain::record::{NewRecord, RecordKind};
use tally_db::repositories::{LedgerRepository, SqlLedgerRepository};
use tally_db::{connect, migrations};

const SEED_NOTE: &str = "demo-seed";

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
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
                "seed",
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

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let repository = SqlLedgerRepository::new(pool.clone());

        let existing = repository
            .summarize(&QueryPlan {
                metric: QueryMetric::Count,
                note_contains: Some(SEED_NOTE.to_string()),
                ..QueryPlan::default()
            })
            .await
            .map_err(|error| ("seed_lookup", error.to_string(), 5u8))?;

        let inserted = if existing.total_rows > 0 {
            0
        } else {
            let records = demo_records(&config.ledger.default_currency);
            let count = records.len();
            for record in records {
                repository
                    .insert(record)
                    .await
                    .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
            }
            count
        };

        pool.close().await;
        Ok::<usize, (&'static str, String, u8)>(inserted)
    });

    match result {
        Ok(0) => CommandResult::success("seed", "demo ledger already present, nothing inserted"),
        Ok(count) => CommandResult::success("seed", format!("inserted {count} demo records")),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn demo_records(currency: &str) -> Vec<NewRecord> {
    let entries: [(u32, (u32, u32), &str, i64, RecordKind, Option<&str>, &str); 6] = [
        (18, (8, 10), "早餐", 1000, RecordKind::Expense, Some("food"), "我早上买了个早餐花了10元"),
        (18, (12, 40), "午餐", 2500, RecordKind::Expense, Some("food"), "午饭25"),
        (19, (9, 5), "咖啡", 1850, RecordKind::Expense, Some("drink"), "买了杯咖啡 18块5"),
        (19, (18, 30), "地铁", 400, RecordKind::Expense, Some("transport"), "地铁4块"),
        (20, (10, 0), "工资", 800_000, RecordKind::Income, None, "发工资了8000"),
        (20, (20, 15), "哑铃", 9900, RecordKind::Expense, Some("fitness"), "买了一个哑铃99"),
    ];

    entries
        .iter()
        .filter_map(|&(day, (hour, minute), item, cents, kind, category, source)| {
            let occurred_at = NaiveDate::from_ymd_opt(2025, 8, day)?.and_hms_opt(hour, minute, 0)?;
            Some(NewRecord {
                occurred_at,
                item: item.to_string(),
                amount_cents: cents,
                currency: currency.to_string(),
                kind,
                category: category.map(str::to_string),
                merchant: None,
                note: Some(SEED_NOTE.to_string()),
                source_message: source.to_string(),
            })
        })
        .collect()
}
