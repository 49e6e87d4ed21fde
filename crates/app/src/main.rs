use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

mod commands;
mod orchestrator;

#[derive(Parser)]
#[command(name = "tally", about = "Bank statement import and double-entry ledger", version)]
struct Cli {
    /// Database file; defaults to the platform data directory.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database and seed the default chart of accounts.
    Init,
    /// Parse statement files, categorize, and commit to the ledger.
    Import {
        /// OFX/QFX statement files.
        files: Vec<PathBuf>,
        /// TOML rule file; stored rules are used when omitted.
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// List the chart of accounts.
    Accounts,
    /// Balance of one account, replayed from the journal.
    Balance {
        code: String,
        #[arg(long, value_name = "DATE")]
        as_of: Option<NaiveDate>,
    },
    /// Transactions still awaiting a category.
    Uncategorized,
    /// Move a committed transaction to a different category.
    Recategorize { transaction_id: i64, code: String },
    /// Financial reports as JSON.
    Report {
        #[command(subcommand)]
        kind: ReportKind,
    },
    /// Manage categorization rules.
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
}

#[derive(Subcommand)]
enum ReportKind {
    /// Profit and loss over a period.
    Pnl {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// Balance sheet as of a date (defaults to all time).
    BalanceSheet {
        #[arg(long, value_name = "DATE")]
        as_of: Option<NaiveDate>,
    },
    /// Cash in and out of asset accounts over a period.
    CashFlow {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
}

#[derive(Subcommand)]
enum RulesAction {
    /// Save rules from a TOML file into the database.
    Load { file: PathBuf },
    /// List stored rules in evaluation order.
    List,
}

fn default_db_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("dev", "tally", "Tally")
        .context("could not determine a data directory")?;
    let data_dir = dirs.data_dir();
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;
    Ok(data_dir.join("ledger.db"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let db_path = match cli.db {
        Some(p) => p,
        None => default_db_path()?,
    };
    let pool = tally_storage::create_db(&db_path)
        .await
        .with_context(|| format!("opening database {}", db_path.display()))?;
    tally_storage::seed_default_accounts(&pool).await?;

    match cli.command {
        Command::Init => {
            println!("initialized {}", db_path.display());
        }
        Command::Import { files, rules } => {
            commands::import(&pool, &files, rules.as_deref()).await?;
        }
        Command::Accounts => commands::accounts(&pool).await?,
        Command::Balance { code, as_of } => commands::balance(&pool, &code, as_of).await?,
        Command::Uncategorized => commands::uncategorized(&pool).await?,
        Command::Recategorize { transaction_id, code } => {
            commands::recategorize(&pool, transaction_id, &code).await?;
        }
        Command::Report { kind } => match kind {
            ReportKind::Pnl { from, to } => {
                commands::report(&pool, commands::Report::ProfitAndLoss, Some(from), Some(to))
                    .await?;
            }
            ReportKind::BalanceSheet { as_of } => {
                commands::report(&pool, commands::Report::BalanceSheet, None, as_of).await?;
            }
            ReportKind::CashFlow { from, to } => {
                commands::report(&pool, commands::Report::CashFlow, Some(from), Some(to)).await?;
            }
        },
        Command::Rules { action } => match action {
            RulesAction::Load { file } => commands::load_rules(&pool, &file).await?,
            RulesAction::List => commands::list_rules(&pool).await?,
        },
    }
    Ok(())
}
