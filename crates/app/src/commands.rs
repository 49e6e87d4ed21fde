use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use tally_core::{CategoryState, DateRange, Ledger};
use tally_import::{RuleEngine, TransferDetector};
use tally_storage::DbPool;

use crate::orchestrator::{self, BatchFile};

/// `tally import <files..> [--rules rules.toml]`
///
/// Stages every file, classifies, and commits without an interactive
/// review step; review edits belong to a frontend, not this binary.
pub async fn import(pool: &DbPool, files: &[PathBuf], rules_path: Option<&Path>) -> Result<()> {
    let engine = match rules_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading rules file {}", path.display()))?;
            RuleEngine::from_toml(&text)
                .with_context(|| format!("parsing rules file {}", path.display()))?
        }
        None => {
            let stored = tally_storage::get_rules(pool).await?;
            RuleEngine::new(stored.into_iter().map(|s| s.rule).collect())
        }
    };

    let mut batch = Vec::with_capacity(files.len());
    for path in files {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        batch.push(BatchFile {
            name: path.display().to_string(),
            contents,
        });
    }

    let (report, rejected) =
        orchestrator::run_import(pool, batch, &engine, &TransferDetector::default()).await?;

    for (name, reason) in &rejected {
        eprintln!("rejected {name}: {reason}");
    }
    println!(
        "imported {} ({} duplicates skipped, {} entries posted)",
        report.imported, report.duplicates, report.entries_posted
    );
    for (external_id, reason) in &report.failures {
        eprintln!("failed {external_id}: {reason}");
    }
    if !report.failures.is_empty() {
        bail!("{} transactions failed to commit", report.failures.len());
    }
    Ok(())
}

/// `tally accounts` — the chart of accounts, one line per account.
pub async fn accounts(pool: &DbPool) -> Result<()> {
    let accounts = tally_storage::get_all_accounts(pool).await?;
    for a in accounts {
        let marker = if a.is_active { " " } else { "x" };
        println!(
            "{marker} {}  {:<10} {}",
            a.code,
            a.account_type.as_str(),
            a.name
        );
    }
    Ok(())
}

/// `tally balance <code> [--as-of DATE]`
pub async fn balance(pool: &DbPool, code: &str, as_of: Option<NaiveDate>) -> Result<()> {
    let account = tally_storage::get_account_by_code(pool, code)
        .await?
        .with_context(|| format!("no account with code {code}"))?;
    let id = account.id.context("account has no id")?;

    let (accounts, entries) = tally_storage::load_ledger(pool).await?;
    let ledger = Ledger::new(&accounts, &entries);
    println!("{} {}: {}", account.code, account.name, ledger.balance_of(id, as_of));
    Ok(())
}

/// `tally uncategorized` — transactions awaiting a category, oldest
/// first, so the next review session knows where to start.
pub async fn uncategorized(pool: &DbPool) -> Result<()> {
    let accounts = tally_storage::get_all_accounts(pool).await?;
    for account in &accounts {
        let Some(id) = account.id else { continue };
        let txs = tally_storage::get_transactions_for_account(pool, id).await?;
        for tx in txs {
            if tx.state == CategoryState::Uncategorized {
                println!("{} {:>12} {} [{}]", tx.posted, tx.amount.to_string(), tx.payee, account.code);
            }
        }
    }
    Ok(())
}

/// `tally recategorize <transaction-id> <code>`
pub async fn recategorize(pool: &DbPool, transaction_id: i64, code: &str) -> Result<()> {
    let account = tally_storage::get_account_by_code(pool, code)
        .await?
        .with_context(|| format!("no account with code {code}"))?;
    let id = account.id.context("account has no id")?;

    let entry_id =
        tally_storage::recategorize_transaction(pool, transaction_id, CategoryState::Category(id))
            .await?;
    match entry_id {
        Some(e) => println!("transaction {transaction_id} -> {code} (entry {e})"),
        None => println!("transaction {transaction_id} -> {code}"),
    }
    Ok(())
}

pub enum Report {
    ProfitAndLoss,
    BalanceSheet,
    CashFlow,
}

/// `tally report <kind> --from DATE --to DATE` — JSON on stdout.
pub async fn report(
    pool: &DbPool,
    kind: Report,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<()> {
    let (accounts, entries) = tally_storage::load_ledger(pool).await?;
    let ledger = Ledger::new(&accounts, &entries);

    let range = || -> Result<DateRange> {
        let start = from.context("--from is required for this report")?;
        let end = to.context("--to is required for this report")?;
        Ok(DateRange::new(start, end))
    };

    let json = match kind {
        Report::ProfitAndLoss => serde_json::to_string_pretty(&ledger.profit_and_loss(range()?))?,
        Report::BalanceSheet => serde_json::to_string_pretty(&ledger.balance_sheet(to))?,
        Report::CashFlow => serde_json::to_string_pretty(&ledger.cash_flow(range()?))?,
    };
    println!("{json}");
    Ok(())
}

/// `tally rules load <file>` — replace nothing, just append; rules are
/// additive and deactivated individually.
pub async fn load_rules(pool: &DbPool, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading rules file {}", path.display()))?;
    let engine = RuleEngine::from_toml(&text)
        .with_context(|| format!("parsing rules file {}", path.display()))?;
    let mut saved = 0;
    for rule in engine.rules() {
        tally_storage::save_rule(pool, rule).await?;
        saved += 1;
    }
    println!("saved {saved} rules");
    Ok(())
}

/// `tally rules list`
pub async fn list_rules(pool: &DbPool) -> Result<()> {
    for stored in tally_storage::get_rules(pool).await? {
        let r = &stored.rule;
        let marker = if r.is_active { " " } else { "x" };
        println!(
            "{marker} [{:>4}] {} ({} {} on {})",
            r.priority,
            r.name,
            r.pattern_kind.as_str(),
            r.pattern,
            r.match_field.as_str()
        );
    }
    Ok(())
}
