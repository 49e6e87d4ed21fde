use chrono::NaiveDate;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;

use tally_core::{
    AccountId, AccountType, CategoryState, ChartAccount, DraftEntry, JournalEntry, JournalLine,
    LedgerError, Money, Side, Transaction, DEFAULT_ACCOUNTS,
};
use tally_import::{CategoryRule, MatchField, PatternKind, RuleTarget};

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("transaction not found: {0}")]
    TransactionNotFound(i64),
    #[error("stored row is malformed: {0}")]
    Corrupt(String),
}

pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    connect(&format!("sqlite:{}?mode=rwc", path.display())).await
}

/// In-memory database for tests and dry runs.
pub async fn create_memory_db() -> Result<DbPool, sqlx::Error> {
    connect("sqlite::memory:").await
}

async fn connect(url: &str) -> Result<DbPool, sqlx::Error> {
    // A single connection serializes writes: balance replays must never
    // observe a half-written entry.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(url)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            account_type TEXT NOT NULL,
            parent_id INTEGER REFERENCES accounts(id),
            is_system INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS statement_accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_hash TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            currency TEXT NOT NULL,
            account_id INTEGER NOT NULL REFERENCES accounts(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL REFERENCES accounts(id),
            external_id TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            posted TEXT NOT NULL,
            payee TEXT NOT NULL,
            memo TEXT,
            check_number TEXT,
            state_kind TEXT NOT NULL DEFAULT 'uncategorized',
            state_account_id INTEGER REFERENCES accounts(id),
            journal_entry_id INTEGER REFERENCES journal_entries(id),
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (account_id, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS journal_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            description TEXT NOT NULL,
            source_transaction_id INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS journal_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_id INTEGER NOT NULL REFERENCES journal_entries(id) ON DELETE CASCADE,
            account_id INTEGER NOT NULL REFERENCES accounts(id),
            amount_cents INTEGER NOT NULL CHECK (amount_cents >= 0),
            side TEXT NOT NULL CHECK (side IN ('debit', 'credit'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            priority INTEGER NOT NULL,
            pattern TEXT NOT NULL,
            pattern_kind TEXT NOT NULL,
            match_field TEXT NOT NULL,
            target_kind TEXT NOT NULL,
            target_account_id INTEGER REFERENCES accounts(id),
            scope_account_id INTEGER REFERENCES accounts(id),
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn seed_default_accounts(pool: &DbPool) -> Result<(), sqlx::Error> {
    for (code, name, account_type, is_system) in DEFAULT_ACCOUNTS {
        sqlx::query(
            "INSERT OR IGNORE INTO accounts (code, name, account_type, is_system) VALUES (?, ?, ?, ?)",
        )
        .bind(code)
        .bind(name)
        .bind(account_type.as_str())
        .bind(*is_system as i64)
        .execute(pool)
        .await?;
    }
    Ok(())
}

type AccountRow = (i64, String, String, String, Option<i64>, i64, i64);

fn account_from_row(r: AccountRow) -> Result<ChartAccount, StorageError> {
    let account_type = AccountType::from_str_opt(&r.3)
        .ok_or_else(|| StorageError::Corrupt(format!("account type '{}'", r.3)))?;
    Ok(ChartAccount {
        id: Some(AccountId(r.0)),
        code: r.1,
        name: r.2,
        account_type,
        parent_id: r.4.map(AccountId),
        is_system: r.5 != 0,
        is_active: r.6 != 0,
    })
}

const ACCOUNT_COLUMNS: &str =
    "id, code, name, account_type, parent_id, is_system, is_active";

pub async fn get_all_accounts(pool: &DbPool) -> Result<Vec<ChartAccount>, StorageError> {
    let rows = sqlx::query_as::<_, AccountRow>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY code"
    ))
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(account_from_row).collect()
}

pub async fn get_account(pool: &DbPool, id: AccountId) -> Result<Option<ChartAccount>, StorageError> {
    let row = sqlx::query_as::<_, AccountRow>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"
    ))
    .bind(id.0)
    .fetch_optional(pool)
    .await?;
    row.map(account_from_row).transpose()
}

pub async fn get_account_by_code(
    pool: &DbPool,
    code: &str,
) -> Result<Option<ChartAccount>, StorageError> {
    let row = sqlx::query_as::<_, AccountRow>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE code = ?"
    ))
    .bind(code)
    .fetch_optional(pool)
    .await?;
    row.map(account_from_row).transpose()
}

/// Creates an account after the structural checks: code prefix encodes
/// the type, a child shares its parent's type, the code is free.
pub async fn insert_account(
    pool: &DbPool,
    account: &ChartAccount,
) -> Result<AccountId, StorageError> {
    let parent = match account.parent_id {
        Some(pid) => Some(
            get_account(pool, pid)
                .await?
                .ok_or(LedgerError::AccountNotFound(pid))?,
        ),
        None => None,
    };
    account.validate(parent.as_ref())?;

    if get_account_by_code(pool, &account.code).await?.is_some() {
        return Err(LedgerError::CodeTaken(account.code.clone()).into());
    }

    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO accounts (code, name, account_type, parent_id, is_system, is_active)
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&account.code)
    .bind(&account.name)
    .bind(account.account_type.as_str())
    .bind(account.parent_id.map(|p| p.0))
    .bind(account.is_system as i64)
    .bind(account.is_active as i64)
    .fetch_one(pool)
    .await?;
    Ok(AccountId(id))
}

/// Deactivation is blocked while the account has children or journal
/// lines. Accounts are never physically deleted: historical entries must
/// stay resolvable.
pub async fn deactivate_account(pool: &DbPool, id: AccountId) -> Result<(), StorageError> {
    let (children,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM accounts WHERE parent_id = ? AND is_active = 1")
            .bind(id.0)
            .fetch_one(pool)
            .await?;
    if children > 0 {
        return Err(LedgerError::HasChildren(id).into());
    }

    let (lines,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM journal_lines WHERE account_id = ?")
            .bind(id.0)
            .fetch_one(pool)
            .await?;
    if lines > 0 {
        return Err(LedgerError::HasJournalLines(id).into());
    }

    sqlx::query("UPDATE accounts SET is_active = 0 WHERE id = ?")
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(())
}

/// Re-points every journal line, transaction, and rule from `loser` to
/// `survivor`, then deactivates `loser`. One SQL transaction: a merge is
/// observed whole or not at all.
pub async fn merge_accounts(
    pool: &DbPool,
    loser: AccountId,
    survivor: AccountId,
) -> Result<(), StorageError> {
    let survivor_acct = get_account(pool, survivor)
        .await?
        .ok_or(LedgerError::AccountNotFound(survivor))?;
    let loser_acct = get_account(pool, loser)
        .await?
        .ok_or(LedgerError::AccountNotFound(loser))?;
    if survivor_acct.account_type != loser_acct.account_type {
        return Err(LedgerError::ParentTypeMismatch {
            child: loser_acct.account_type,
            parent: survivor_acct.account_type,
        }
        .into());
    }

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE journal_lines SET account_id = ? WHERE account_id = ?")
        .bind(survivor.0)
        .bind(loser.0)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE transactions SET account_id = ? WHERE account_id = ?")
        .bind(survivor.0)
        .bind(loser.0)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE transactions SET state_account_id = ? WHERE state_account_id = ?")
        .bind(survivor.0)
        .bind(loser.0)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE rules SET target_account_id = ? WHERE target_account_id = ?")
        .bind(survivor.0)
        .bind(loser.0)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE rules SET scope_account_id = ? WHERE scope_account_id = ?")
        .bind(survivor.0)
        .bind(loser.0)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE statement_accounts SET account_id = ? WHERE account_id = ?")
        .bind(survivor.0)
        .bind(loser.0)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE accounts SET is_active = 0 WHERE id = ?")
        .bind(loser.0)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(loser = loser.0, survivor = survivor.0, "merged accounts");
    Ok(())
}

/// Maps a statement's account-identity hash to its ledger account. The
/// raw account number is never stored.
pub async fn link_statement_account(
    pool: &DbPool,
    account_hash: &str,
    kind: &str,
    currency: &str,
    account_id: AccountId,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO statement_accounts (account_hash, kind, currency, account_id)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (account_hash) DO UPDATE SET account_id = excluded.account_id",
    )
    .bind(account_hash)
    .bind(kind)
    .bind(currency)
    .bind(account_id.0)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_statement_account(
    pool: &DbPool,
    account_hash: &str,
) -> Result<Option<AccountId>, StorageError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT account_id FROM statement_accounts WHERE account_hash = ?")
            .bind(account_hash)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(id,)| AccountId(id)))
}

/// Dedup lookup on the `(account, external id)` key.
pub async fn find_transaction(
    pool: &DbPool,
    account_id: AccountId,
    external_id: &str,
) -> Result<Option<i64>, StorageError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM transactions WHERE account_id = ? AND external_id = ?")
            .bind(account_id.0)
            .bind(external_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(id,)| id))
}

pub async fn insert_transaction(pool: &DbPool, tx: &Transaction) -> Result<i64, StorageError> {
    let (state_kind, state_account) = tx.state.encode();
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO transactions
            (account_id, external_id, amount_cents, posted, payee, memo, check_number,
             state_kind, state_account_id, journal_entry_id)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(tx.account_id.0)
    .bind(&tx.external_id)
    .bind(tx.amount.to_cents())
    .bind(tx.posted.to_string())
    .bind(&tx.payee)
    .bind(&tx.memo)
    .bind(&tx.check_number)
    .bind(state_kind)
    .bind(state_account)
    .bind(tx.journal_entry_id)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

type TransactionRow = (
    i64,
    i64,
    String,
    i64,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<i64>,
    Option<i64>,
);

fn transaction_from_row(r: TransactionRow) -> Result<Transaction, StorageError> {
    let posted = parse_date(&r.4)?;
    let state = CategoryState::decode(&r.8, r.9)
        .ok_or_else(|| StorageError::Corrupt(format!("category state '{}'", r.8)))?;
    Ok(Transaction {
        id: Some(r.0),
        account_id: AccountId(r.1),
        external_id: r.2,
        amount: Money::from_cents(r.3),
        posted,
        payee: r.5,
        memo: r.6,
        check_number: r.7,
        state,
        journal_entry_id: r.10,
    })
}

const TRANSACTION_COLUMNS: &str = "id, account_id, external_id, amount_cents, posted, payee, \
     memo, check_number, state_kind, state_account_id, journal_entry_id";

pub async fn get_transaction(pool: &DbPool, id: i64) -> Result<Option<Transaction>, StorageError> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(transaction_from_row).transpose()
}

pub async fn get_transactions_for_account(
    pool: &DbPool,
    account_id: AccountId,
) -> Result<Vec<Transaction>, StorageError> {
    let rows = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account_id = ? ORDER BY posted, id"
    ))
    .bind(account_id.0)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(transaction_from_row).collect()
}

fn parse_date(s: &str) -> Result<NaiveDate, StorageError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| StorageError::Corrupt(format!("date '{s}'")))
}

/// The only write path for journal lines. The draft is validated first;
/// an unbalanced entry is rejected before anything touches the database,
/// and entry plus lines land in one SQL transaction.
pub async fn post_entry(pool: &DbPool, draft: DraftEntry) -> Result<JournalEntry, StorageError> {
    let mut entry = JournalEntry::validate(draft)?;

    for line in &entry.lines {
        let account = get_account(pool, line.account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(line.account_id))?;
        if !account.is_active {
            return Err(LedgerError::InactiveAccount(line.account_id).into());
        }
    }

    let mut tx = pool.begin().await?;
    let (entry_id,): (i64,) = sqlx::query_as(
        "INSERT INTO journal_entries (date, description, source_transaction_id)
         VALUES (?, ?, ?) RETURNING id",
    )
    .bind(entry.date.to_string())
    .bind(&entry.description)
    .bind(entry.source_transaction_id)
    .fetch_one(&mut *tx)
    .await?;

    for line in &entry.lines {
        sqlx::query(
            "INSERT INTO journal_lines (entry_id, account_id, amount_cents, side)
             VALUES (?, ?, ?, ?)",
        )
        .bind(entry_id)
        .bind(line.account_id.0)
        .bind(line.amount.to_cents())
        .bind(line.side.as_str())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    entry.id = Some(entry_id);
    Ok(entry)
}

pub async fn delete_entry(pool: &DbPool, entry_id: i64) -> Result<(), StorageError> {
    // Lines cascade.
    sqlx::query("DELETE FROM journal_entries WHERE id = ?")
        .bind(entry_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Changes a stored transaction's category state and keeps the journal
/// consistent: the old linked entry is retracted, and a fresh one is
/// posted when the new state is a real category. Returns the new entry
/// id, if any.
pub async fn recategorize_transaction(
    pool: &DbPool,
    transaction_id: i64,
    state: CategoryState,
) -> Result<Option<i64>, StorageError> {
    let stored = get_transaction(pool, transaction_id)
        .await?
        .ok_or(StorageError::TransactionNotFound(transaction_id))?;

    // Build and check the replacement entry before touching any row; a
    // rejected draft leaves the old state fully intact.
    let new_entry = if let CategoryState::Category(category_id) = state {
        let bank = get_account(pool, stored.account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(stored.account_id))?;
        let category = get_account(pool, category_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(category_id))?;
        let draft_source = Transaction {
            state,
            ..stored.clone()
        };
        Some(JournalEntry::from_transaction(&draft_source, &bank, &category)?)
    } else {
        None
    };

    // Retract and repost in one SQL transaction. The transaction's link
    // must be cleared before the old entry row can be deleted: the
    // foreign key is enforced.
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE transactions SET journal_entry_id = NULL WHERE id = ?")
        .bind(transaction_id)
        .execute(&mut *tx)
        .await?;
    if let Some(old_entry) = stored.journal_entry_id {
        // Lines cascade.
        sqlx::query("DELETE FROM journal_entries WHERE id = ?")
            .bind(old_entry)
            .execute(&mut *tx)
            .await?;
    }

    let new_entry_id = match &new_entry {
        Some(entry) => {
            let (entry_id,): (i64,) = sqlx::query_as(
                "INSERT INTO journal_entries (date, description, source_transaction_id)
                 VALUES (?, ?, ?) RETURNING id",
            )
            .bind(entry.date.to_string())
            .bind(&entry.description)
            .bind(entry.source_transaction_id)
            .fetch_one(&mut *tx)
            .await?;
            for line in &entry.lines {
                sqlx::query(
                    "INSERT INTO journal_lines (entry_id, account_id, amount_cents, side)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(entry_id)
                .bind(line.account_id.0)
                .bind(line.amount.to_cents())
                .bind(line.side.as_str())
                .execute(&mut *tx)
                .await?;
            }
            Some(entry_id)
        }
        None => None,
    };

    let (state_kind, state_account) = state.encode();
    sqlx::query(
        "UPDATE transactions SET state_kind = ?, state_account_id = ?, journal_entry_id = ?
         WHERE id = ?",
    )
    .bind(state_kind)
    .bind(state_account)
    .bind(new_entry_id)
    .bind(transaction_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(new_entry_id)
}

pub async fn link_entry_to_transaction(
    pool: &DbPool,
    transaction_id: i64,
    entry_id: i64,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE transactions SET journal_entry_id = ? WHERE id = ?")
        .bind(entry_id)
        .bind(transaction_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// A persisted rule plus its row id. Row ids grow with insertion, so
/// `ORDER BY priority DESC, id ASC` reproduces the engine's stable
/// priority-then-insertion ordering.
#[derive(Debug, Clone)]
pub struct StoredRule {
    pub id: i64,
    pub rule: CategoryRule,
}

pub async fn save_rule(pool: &DbPool, rule: &CategoryRule) -> Result<i64, StorageError> {
    let (target_kind, target_account) = rule.target.encode();
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO rules
            (name, priority, pattern, pattern_kind, match_field,
             target_kind, target_account_id, scope_account_id, is_active)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&rule.name)
    .bind(rule.priority)
    .bind(&rule.pattern)
    .bind(rule.pattern_kind.as_str())
    .bind(rule.match_field.as_str())
    .bind(target_kind)
    .bind(target_account)
    .bind(rule.account_scope.map(|a| a.0))
    .bind(rule.is_active as i64)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn get_rules(pool: &DbPool) -> Result<Vec<StoredRule>, StorageError> {
    let rows: Vec<(i64, String, i32, String, String, String, String, Option<i64>, Option<i64>, i64)> =
        sqlx::query_as(
            "SELECT id, name, priority, pattern, pattern_kind, match_field,
                    target_kind, target_account_id, scope_account_id, is_active
             FROM rules ORDER BY priority DESC, id ASC",
        )
        .fetch_all(pool)
        .await?;

    rows.into_iter()
        .map(|r| {
            let pattern_kind = PatternKind::from_str_opt(&r.4)
                .ok_or_else(|| StorageError::Corrupt(format!("pattern kind '{}'", r.4)))?;
            let match_field = MatchField::from_str_opt(&r.5)
                .ok_or_else(|| StorageError::Corrupt(format!("match field '{}'", r.5)))?;
            let target = RuleTarget::decode(&r.6, r.7)
                .ok_or_else(|| StorageError::Corrupt(format!("rule target '{}'", r.6)))?;
            Ok(StoredRule {
                id: r.0,
                rule: CategoryRule {
                    name: r.1,
                    priority: r.2,
                    pattern: r.3,
                    pattern_kind,
                    match_field,
                    target,
                    account_scope: r.8.map(AccountId),
                    is_active: r.9 != 0,
                },
            })
        })
        .collect()
}

pub async fn set_rule_active(pool: &DbPool, rule_id: i64, active: bool) -> Result<(), StorageError> {
    sqlx::query("UPDATE rules SET is_active = ? WHERE id = ?")
        .bind(active as i64)
        .bind(rule_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Loads the full chart and journal for replay. Inactive accounts are
/// included: history must keep resolving.
pub async fn load_ledger(
    pool: &DbPool,
) -> Result<(Vec<ChartAccount>, Vec<JournalEntry>), StorageError> {
    let accounts = get_all_accounts(pool).await?;

    let entry_rows: Vec<(i64, String, String, Option<i64>)> = sqlx::query_as(
        "SELECT id, date, description, source_transaction_id FROM journal_entries ORDER BY date, id",
    )
    .fetch_all(pool)
    .await?;

    let line_rows: Vec<(i64, i64, i64, String)> = sqlx::query_as(
        "SELECT entry_id, account_id, amount_cents, side FROM journal_lines ORDER BY entry_id, id",
    )
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(entry_rows.len());
    for (id, date, description, source) in entry_rows {
        let lines = line_rows
            .iter()
            .filter(|l| l.0 == id)
            .map(|l| {
                let side = Side::from_str_opt(&l.3)
                    .ok_or_else(|| StorageError::Corrupt(format!("side '{}'", l.3)))?;
                Ok(JournalLine {
                    account_id: AccountId(l.1),
                    amount: Money::from_cents(l.2),
                    side,
                })
            })
            .collect::<Result<Vec<_>, StorageError>>()?;
        entries.push(JournalEntry {
            id: Some(id),
            date: parse_date(&date)?,
            description,
            source_transaction_id: source,
            lines,
        });
    }

    Ok((accounts, entries))
}
