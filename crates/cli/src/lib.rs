pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "tally",
    about = "Conversational bookkeeping CLI",
    long_about = "Chat free-form expense and income notes into a local ledger, \
inspect it, and operate migrations and configuration.",
    after_help = "Examples:\n  tally chat\n  tally migrate\n  tally report --month 2025-08\n  tally config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start an interactive bookkeeping chat session")]
    Chat {
        #[arg(long, help = "Resume a named session instead of generating a fresh id")]
        session: Option<String>,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load a small deterministic demo ledger")]
    Seed,
    #[command(about = "Summarize the ledger over a time range with optional filters")]
    Report {
        #[arg(long, help = "Calendar month shorthand, e.g. 2025-08")]
        month: Option<String>,
        #[arg(long, help = "Inclusive start date, e.g. 2025-08-01")]
        from: Option<String>,
        #[arg(long, help = "Inclusive end date, e.g. 2025-08-31")]
        to: Option<String>,
        #[arg(long, default_value = "sum", help = "sum | avg | count | list | latest")]
        metric: String,
        #[arg(long, help = "Item keyword filter, repeatable")]
        keyword: Vec<String>,
        #[arg(long, help = "Category filter, repeatable")]
        category: Vec<String>,
        #[arg(long, help = "Merchant filter, repeatable")]
        merchant: Vec<String>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Chat { session } => commands::chat::run(session),
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Report { month, from, to, metric, keyword, category, merchant } => {
            commands::report::run(commands::report::ReportArgs {
                month,
                from,
                to,
                metric,
                keywords: keyword,
                categories: category,
                merchants: merchant,
            })
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
