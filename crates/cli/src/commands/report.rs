use chrono::{Days, Months, NaiveDate};

use crate::commands::CommandResult;
use tally_core::config::{AppConfig, LoadOptions};
use tally_core::domain::query::{LedgerSummary, QueryMetric, QueryPlan};
use tally_db::repositories::{LedgerRepository, SqlLedgerRepository};
use tally_db::{connect, migrations};

#[derive(Debug)]
pub struct ReportArgs {
    pub month: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub metric: String,
    pub keywords: Vec<String>,
    pub categories: Vec<String>,
    pub merchants: Vec<String>,
}

pub fn run(args: ReportArgs) -> CommandResult {
    let plan = match build_plan(&args) {
        Ok(plan) => plan,
        Err(message) => return CommandResult::failure("report", "invalid_arguments", message, 2),
    };

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "report",
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
                "report",
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

        let summary = SqlLedgerRepository::new(pool.clone())
            .summarize(&plan)
            .await
            .map_err(|error| ("summarize", error.to_string(), 5u8))?;

        pool.close().await;
        Ok::<LedgerSummary, (&'static str, String, u8)>(summary)
    });

    match result {
        Ok(summary) => CommandResult::success("report", render_summary(&summary)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("report", error_class, message, exit_code)
        }
    }
}

fn build_plan(args: &ReportArgs) -> Result<QueryPlan, String> {
    let metric = parse_metric(&args.metric)?;

    let (mut start, mut end) = (None, None);
    if let Some(month) = args.month.as_deref() {
        let (month_start, month_end) = parse_month(month)?;
        start = Some(month_start);
        end = Some(month_end);
    }
    if let Some(from) = args.from.as_deref() {
        start = Some(parse_date(from)?);
    }
    if let Some(to) = args.to.as_deref() {
        end = Some(parse_date(to)?);
    }

    Ok(QueryPlan {
        metric,
        start,
        end,
        item_keywords: args.keywords.clone(),
        categories: args.categories.clone(),
        merchants: args.merchants.clone(),
        note_contains: None,
    }
    .ordered())
}

fn parse_metric(raw: &str) -> Result<QueryMetric, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "sum" => Ok(QueryMetric::Sum),
        "avg" => Ok(QueryMetric::Avg),
        "count" => Ok(QueryMetric::Count),
        "list" => Ok(QueryMetric::List),
        "latest" => Ok(QueryMetric::Latest),
        other => Err(format!("unknown metric `{other}` (expected sum|avg|count|list|latest)")),
    }
}

fn parse_month(raw: &str) -> Result<(NaiveDate, NaiveDate), String> {
    let start = NaiveDate::parse_from_str(&format!("{}-01", raw.trim()), "%Y-%m-%d")
        .map_err(|_| format!("invalid month `{raw}` (expected YYYY-MM)"))?;
    let end = start
        .checked_add_months(Months::new(1))
        .and_then(|next| next.checked_sub_days(Days::new(1)))
        .ok_or_else(|| format!("month `{raw}` is out of range"))?;
    Ok((start, end))
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| format!("invalid date `{raw}` (expected YYYY-MM-DD)"))
}

fn render_summary(summary: &LedgerSummary) -> String {
    match summary.metric {
        QueryMetric::Sum => format!(
            "sum = {} over {} records",
            format_cents(summary.total_cents.unwrap_or(0)),
            summary.total_rows,
        ),
        QueryMetric::Avg => format!(
            "avg = {} (sum {} over {} records)",
            format_cents(summary.avg_cents.unwrap_or(0.0).round() as i64),
            format_cents(summary.total_cents.unwrap_or(0)),
            summary.total_rows,
        ),
        QueryMetric::Count => format!("{} records", summary.total_rows),
        QueryMetric::List => {
            if summary.details.is_empty() {
                return "no matching records".to_string();
            }
            let mut lines = vec![format!("{} records:", summary.total_rows)];
            for row in &summary.details {
                lines.push(format!(
                    "- {} {} {} {}",
                    row.occurred_at,
                    row.item,
                    format_cents(row.amount_cents),
                    row.currency,
                ));
            }
            lines.join("\n")
        }
        QueryMetric::Latest => match &summary.latest {
            Some(record) => format!(
                "latest: {} {} {} {} ({})",
                record.occurred_at.format("%Y-%m-%d %H:%M"),
                record.item,
                format_cents(record.amount_cents),
                record.currency,
                record.kind.as_str(),
            ),
            None => "no matching records".to_string(),
        },
    }
}

fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.abs();
    format!("{sign}{}.{:02}", cents / 100, cents % 100)
}
