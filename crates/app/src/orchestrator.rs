//! Import batch state machine:
//! uploaded → (validated | rejected) → classified → reviewed → committed.
//!
//! Each phase is a type; moving forward consumes the previous phase, so a
//! batch cannot be committed without passing review. All persistence is
//! here and in the store — parsing, classification, and transfer
//! detection stay pure.

use serde::Serialize;
use std::collections::HashMap;

use tally_core::{CategoryState, DraftEntry, JournalEntry, Transaction};
use tally_import::{
    AccountKind, Classification, DetectedTransfer, MatchInput, ParsedStatement, RawTransaction,
    RuleEngine, TransferDetector,
};
use tally_storage::{DbPool, StorageError};

/// One input file: its display name and raw contents.
pub struct BatchFile {
    pub name: String,
    pub contents: String,
}

/// Outcome of parsing plus file-level validation for a single file.
/// Files fail independently; one bad export never blocks the rest.
enum StagedFile {
    Accepted(ParsedStatement),
    Rejected { name: String, reason: String },
}

pub struct StagedBatch {
    files: Vec<StagedFile>,
}

/// A transaction awaiting review, with the state the machine proposes.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub account_id: tally_core::AccountId,
    pub raw: RawTransaction,
    pub proposed: CategoryState,
}

pub struct ReviewBatch {
    pub proposals: Vec<Proposal>,
    pub rejected_files: Vec<(String, String)>,
    pub transfers: Vec<DetectedTransfer>,
    /// Count of transactions no rule matched; surfaced, never an error.
    pub unmatched: usize,
    pub dropped_records: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct CommitReport {
    pub imported: usize,
    pub duplicates: usize,
    pub entries_posted: usize,
    /// Per-transaction failures: `(external_id, reason)`. Earlier durable
    /// writes are never rolled back; the caller retries just these.
    pub failures: Vec<(String, String)>,
}

/// Parses and validates every file in the batch. `uploaded → validated`
/// per file, `uploaded → rejected` for files that fail validation.
pub fn stage(files: Vec<BatchFile>) -> StagedBatch {
    let staged = files
        .into_iter()
        .map(|file| match tally_import::parse(&file.contents) {
            Ok(stmt) => match tally_import::validate(&stmt) {
                Ok(()) => StagedFile::Accepted(stmt),
                Err(e) => {
                    tracing::warn!(file = %file.name, error = %e, "statement rejected");
                    StagedFile::Rejected {
                        name: file.name,
                        reason: e.to_string(),
                    }
                }
            },
            Err(e) => {
                tracing::warn!(file = %file.name, error = %e, "statement unparseable");
                StagedFile::Rejected {
                    name: file.name,
                    reason: e.to_string(),
                }
            }
        })
        .collect();
    StagedBatch { files: staged }
}

impl StagedBatch {
    /// `validated → classified`. Runs transfer detection across the
    /// accepted statements, then the rule engine over every transaction.
    /// Confirmed transfers override whatever the rules said for the two
    /// legs involved.
    pub async fn classify(
        self,
        pool: &DbPool,
        engine: &RuleEngine,
        detector: &TransferDetector,
    ) -> Result<ReviewBatch, StorageError> {
        let mut rejected_files = Vec::new();
        let mut statements = Vec::new();
        for file in self.files {
            match file {
                StagedFile::Accepted(stmt) => statements.push(stmt),
                StagedFile::Rejected { name, reason } => rejected_files.push((name, reason)),
            }
        }

        // Resolve each statement to its ledger account before anything
        // else; transfers need the counter-account ids.
        let mut account_ids = Vec::with_capacity(statements.len());
        for stmt in &statements {
            account_ids.push(resolve_statement_account(pool, stmt).await?);
        }

        let transfers = detector.detect(&statements);

        let dropped_records = statements.iter().map(|s| s.dropped.len()).sum();

        let mut proposals = Vec::new();
        let mut index_of = HashMap::new();
        let mut unmatched = 0;
        for (si, stmt) in statements.iter().enumerate() {
            for (ti, raw) in stmt.transactions.iter().enumerate() {
                let classification = engine.classify(&MatchInput {
                    name: &raw.name,
                    memo: raw.memo.as_deref(),
                    account: Some(account_ids[si]),
                });
                let proposed = match classification {
                    Classification::Category(id) => CategoryState::Category(id),
                    Classification::Transfer(id) => CategoryState::Transfer(id),
                    Classification::Ignored => CategoryState::Ignored,
                    Classification::Unmatched => {
                        unmatched += 1;
                        CategoryState::Uncategorized
                    }
                };
                index_of.insert((si, ti), proposals.len());
                proposals.push(Proposal {
                    account_id: account_ids[si],
                    raw: raw.clone(),
                    proposed,
                });
            }
        }

        for transfer in &transfers {
            let source_counter = account_ids[transfer.target.statement];
            let target_counter = account_ids[transfer.source.statement];
            if let Some(&i) = index_of.get(&(transfer.source.statement, transfer.source.transaction))
            {
                proposals[i].proposed = CategoryState::Transfer(source_counter);
            }
            if let Some(&i) = index_of.get(&(transfer.target.statement, transfer.target.transaction))
            {
                proposals[i].proposed = CategoryState::Transfer(target_counter);
            }
        }

        Ok(ReviewBatch {
            proposals,
            rejected_files,
            transfers,
            unmatched,
            dropped_records,
        })
    }
}

impl ReviewBatch {
    /// Review edit: replace the proposed state for one transaction.
    /// `classified → reviewed` is just the caller being done editing.
    pub fn set_proposed(&mut self, index: usize, state: CategoryState) {
        if let Some(p) = self.proposals.get_mut(index) {
            p.proposed = state;
        }
    }

    /// `reviewed → committed`. Duplicates (same account and external id)
    /// are skipped and counted. A failure on one transaction is recorded
    /// and the loop continues: earlier writes stay durable.
    pub async fn commit(self, pool: &DbPool) -> Result<CommitReport, StorageError> {
        let mut report = CommitReport::default();

        for proposal in self.proposals {
            let existing =
                tally_storage::find_transaction(pool, proposal.account_id, &proposal.raw.external_id)
                    .await?;
            if let Some(existing_id) = existing {
                report.duplicates += 1;
                // A prior run may have stored the row and then failed
                // before its entry landed; retry the posting here instead
                // of skipping it forever.
                if let Some(stored) = tally_storage::get_transaction(pool, existing_id).await? {
                    if stored.state.wants_journal_entry() && stored.journal_entry_id.is_none() {
                        match post_linked_entry(pool, &stored).await {
                            Ok(true) => report.entries_posted += 1,
                            Ok(false) => {}
                            Err(e) => {
                                tracing::warn!(
                                    external_id = %stored.external_id,
                                    error = %e,
                                    "entry still failing for stored transaction"
                                );
                                report
                                    .failures
                                    .push((stored.external_id.clone(), e.to_string()));
                            }
                        }
                    }
                }
                continue;
            }

            let tx = Transaction {
                id: None,
                account_id: proposal.account_id,
                external_id: proposal.raw.external_id.clone(),
                amount: proposal.raw.amount,
                posted: proposal.raw.posted,
                payee: proposal.raw.name.clone(),
                memo: proposal.raw.memo.clone(),
                check_number: proposal.raw.check_number.clone(),
                state: proposal.proposed,
                journal_entry_id: None,
            };

            match commit_one(pool, &tx).await {
                Ok(posted_entry) => {
                    report.imported += 1;
                    if posted_entry {
                        report.entries_posted += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        external_id = %proposal.raw.external_id,
                        error = %e,
                        "transaction failed to commit"
                    );
                    report
                        .failures
                        .push((proposal.raw.external_id.clone(), e.to_string()));
                }
            }
        }

        tracing::info!(
            imported = report.imported,
            duplicates = report.duplicates,
            entries = report.entries_posted,
            failures = report.failures.len(),
            "batch committed"
        );
        Ok(report)
    }
}

/// Persists one transaction and, for a real category, exactly one
/// journal entry. Returns whether an entry was posted.
async fn commit_one(pool: &DbPool, tx: &Transaction) -> Result<bool, StorageError> {
    let tx_id = tally_storage::insert_transaction(pool, tx).await?;
    let mut stored = tx.clone();
    stored.id = Some(tx_id);
    post_linked_entry(pool, &stored).await
}

/// Posts the entry a categorized transaction calls for and links it back.
/// Also the repair path when a duplicate's entry is missing.
async fn post_linked_entry(pool: &DbPool, tx: &Transaction) -> Result<bool, StorageError> {
    let CategoryState::Category(category_id) = tx.state else {
        return Ok(false);
    };

    let bank = tally_storage::get_account(pool, tx.account_id)
        .await?
        .ok_or(tally_core::LedgerError::AccountNotFound(tx.account_id))?;
    let category = tally_storage::get_account(pool, category_id)
        .await?
        .ok_or(tally_core::LedgerError::AccountNotFound(category_id))?;

    let entry = JournalEntry::from_transaction(tx, &bank, &category)?;
    let posted = tally_storage::post_entry(
        pool,
        DraftEntry {
            date: entry.date,
            description: entry.description,
            lines: entry.lines,
            source_transaction_id: entry.source_transaction_id,
        },
    )
    .await?;
    if let (Some(tx_id), Some(entry_id)) = (tx.id, posted.id) {
        tally_storage::link_entry_to_transaction(pool, tx_id, entry_id).await?;
    }
    Ok(true)
}

/// Ledger account backing a statement's bank account. Known identity
/// hashes reuse their link; new ones are bound to the seeded system
/// account for their kind and remembered.
async fn resolve_statement_account(
    pool: &DbPool,
    stmt: &ParsedStatement,
) -> Result<tally_core::AccountId, StorageError> {
    let hash = stmt.account.dedup_hash();
    if let Some(id) = tally_storage::find_statement_account(pool, &hash).await? {
        return Ok(id);
    }

    let code = match stmt.account.kind {
        AccountKind::Checking => "1000",
        AccountKind::Savings => "1010",
        AccountKind::MoneyMarket => "1020",
        AccountKind::CreditCard => "2000",
        AccountKind::CreditLine => "2010",
    };
    let account = tally_storage::get_account_by_code(pool, code)
        .await?
        .ok_or_else(|| StorageError::Corrupt(format!("missing system account {code}")))?;
    let id = account
        .id
        .ok_or_else(|| StorageError::Corrupt(format!("system account {code} has no id")))?;
    tally_storage::link_statement_account(
        pool,
        &hash,
        stmt.account.kind.as_str(),
        &stmt.account.currency,
        id,
    )
    .await?;
    tracing::info!(kind = stmt.account.kind.as_str(), code, "linked new statement account");
    Ok(id)
}

/// Convenience driver for non-interactive use: stage, classify with the
/// supplied rules, and commit without review edits.
pub async fn run_import(
    pool: &DbPool,
    files: Vec<BatchFile>,
    engine: &RuleEngine,
    detector: &TransferDetector,
) -> Result<(CommitReport, Vec<(String, String)>), StorageError> {
    let review = stage(files).classify(pool, engine, detector).await?;
    let rejected = review.rejected_files.clone();
    let report = review.commit(pool).await?;
    Ok((report, rejected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{AccountId, Ledger, Side};
    use tally_import::{CategoryRule, MatchField, PatternKind, RuleTarget};
    use tally_storage::create_memory_db;

    const CHECKING_STATEMENT: &str = r#"
OFXHEADER:100

<OFX>
<BANKACCTFROM>
<BANKID>111000
<ACCTID>CHK-123
<ACCTTYPE>CHECKING
</BANKACCTFROM>
<BANKTRANLIST>
<DTSTART>20240101
<DTEND>20240131
<STMTTRN>
<TRNTYPE>DEBIT
<DTPOSTED>20240115
<TRNAMT>-50.00
<FITID>tx-1
<NAME>Coffee Shop
</BANKTRANLIST>
"#;

    async fn db() -> DbPool {
        let pool = create_memory_db().await.unwrap();
        tally_storage::seed_default_accounts(&pool).await.unwrap();
        pool
    }

    async fn account_id(pool: &DbPool, code: &str) -> AccountId {
        tally_storage::get_account_by_code(pool, code)
            .await
            .unwrap()
            .unwrap()
            .id
            .unwrap()
    }

    fn coffee_rule(category: AccountId) -> RuleEngine {
        RuleEngine::new(vec![CategoryRule {
            name: "coffee".into(),
            priority: 10,
            pattern: "coffee".into(),
            pattern_kind: PatternKind::Contains,
            match_field: MatchField::Name,
            target: RuleTarget::Category(category),
            account_scope: None,
            is_active: true,
        }])
    }

    fn file(name: &str, contents: &str) -> BatchFile {
        BatchFile {
            name: name.into(),
            contents: contents.into(),
        }
    }

    #[tokio::test]
    async fn coffee_shop_end_to_end() {
        let pool = db().await;
        let coffee = account_id(&pool, "5200").await;
        let checking = account_id(&pool, "1000").await;
        let engine = coffee_rule(coffee);

        let (report, rejected) = run_import(
            &pool,
            vec![file("jan.ofx", CHECKING_STATEMENT)],
            &engine,
            &TransferDetector::default(),
        )
        .await
        .unwrap();

        assert!(rejected.is_empty());
        assert_eq!(report.imported, 1);
        assert_eq!(report.entries_posted, 1);
        assert!(report.failures.is_empty());

        let txs = tally_storage::get_transactions_for_account(&pool, checking)
            .await
            .unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].state, CategoryState::Category(coffee));
        assert!(txs[0].journal_entry_id.is_some());

        // Exactly one entry: debit 50.00 to the expense account, credit
        // 50.00 to checking.
        let (accounts, entries) = tally_storage::load_ledger(&pool).await.unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        let debit = entry.lines.iter().find(|l| l.side == Side::Debit).unwrap();
        let credit = entry.lines.iter().find(|l| l.side == Side::Credit).unwrap();
        assert_eq!(debit.account_id, coffee);
        assert_eq!(debit.amount.to_cents(), 5000);
        assert_eq!(credit.account_id, checking);
        assert_eq!(credit.amount.to_cents(), 5000);

        let ledger = Ledger::new(&accounts, &entries);
        assert_eq!(ledger.balance_of(coffee, None).to_cents(), 5000);
    }

    #[tokio::test]
    async fn reimport_is_idempotent() {
        let pool = db().await;
        let coffee = account_id(&pool, "5200").await;
        let engine = coffee_rule(coffee);
        let detector = TransferDetector::default();

        let (first, _) = run_import(&pool, vec![file("jan.ofx", CHECKING_STATEMENT)], &engine, &detector)
            .await
            .unwrap();
        assert_eq!(first.imported, 1);
        assert_eq!(first.duplicates, 0);

        let (second, _) = run_import(&pool, vec![file("jan.ofx", CHECKING_STATEMENT)], &engine, &detector)
            .await
            .unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(second.entries_posted, 0);

        let (_, entries) = tally_storage::load_ledger(&pool).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    /// A run that stores a categorized transaction but dies before its
    /// entry lands leaves `journal_entry_id = NULL`. The next import of
    /// the same file must post the missing entry, not skip the row as a
    /// settled duplicate.
    #[tokio::test]
    async fn reimport_posts_entry_missing_from_earlier_run() {
        use chrono::NaiveDate;
        use tally_core::{Money, Transaction};

        let pool = db().await;
        let coffee = account_id(&pool, "5200").await;
        let checking = account_id(&pool, "1000").await;
        let engine = coffee_rule(coffee);

        // The statement account link and the half-written row an
        // interrupted run would have left behind.
        let stmt = tally_import::parse(CHECKING_STATEMENT).unwrap();
        let hash = stmt.account.dedup_hash();
        tally_storage::link_statement_account(&pool, &hash, "checking", "USD", checking)
            .await
            .unwrap();
        tally_storage::insert_transaction(
            &pool,
            &Transaction {
                id: None,
                account_id: checking,
                external_id: "tx-1".into(),
                amount: Money::from_cents(-5000),
                posted: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                payee: "Coffee Shop".into(),
                memo: None,
                check_number: None,
                state: CategoryState::Category(coffee),
                journal_entry_id: None,
            },
        )
        .await
        .unwrap();

        let (report, _) = run_import(
            &pool,
            vec![file("jan.ofx", CHECKING_STATEMENT)],
            &engine,
            &TransferDetector::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.imported, 0);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.entries_posted, 1);
        assert!(report.failures.is_empty());

        let txs = tally_storage::get_transactions_for_account(&pool, checking)
            .await
            .unwrap();
        assert_eq!(txs.len(), 1);
        assert!(txs[0].journal_entry_id.is_some());

        let (_, entries) = tally_storage::load_ledger(&pool).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    /// When the repair itself cannot post (category deactivated since the
    /// original run), the report must surface the failure instead of
    /// silently counting another duplicate.
    #[tokio::test]
    async fn reimport_reports_entry_still_failing() {
        use chrono::NaiveDate;
        use tally_core::{Money, Transaction};

        let pool = db().await;
        let coffee = account_id(&pool, "5200").await;
        let checking = account_id(&pool, "1000").await;
        let engine = coffee_rule(coffee);

        let stmt = tally_import::parse(CHECKING_STATEMENT).unwrap();
        let hash = stmt.account.dedup_hash();
        tally_storage::link_statement_account(&pool, &hash, "checking", "USD", checking)
            .await
            .unwrap();
        tally_storage::insert_transaction(
            &pool,
            &Transaction {
                id: None,
                account_id: checking,
                external_id: "tx-1".into(),
                amount: Money::from_cents(-5000),
                posted: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                payee: "Coffee Shop".into(),
                memo: None,
                check_number: None,
                state: CategoryState::Category(coffee),
                journal_entry_id: None,
            },
        )
        .await
        .unwrap();
        tally_storage::deactivate_account(&pool, coffee).await.unwrap();

        let (report, _) = run_import(
            &pool,
            vec![file("jan.ofx", CHECKING_STATEMENT)],
            &engine,
            &TransferDetector::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.duplicates, 1);
        assert_eq!(report.entries_posted, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "tx-1");

        let (_, entries) = tally_storage::load_ledger(&pool).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn unmatched_transactions_stay_uncategorized() {
        let pool = db().await;
        let engine = RuleEngine::new(vec![]);
        let review = stage(vec![file("jan.ofx", CHECKING_STATEMENT)])
            .classify(&pool, &engine, &TransferDetector::default())
            .await
            .unwrap();
        assert_eq!(review.unmatched, 1);
        assert_eq!(review.proposals[0].proposed, CategoryState::Uncategorized);

        let report = review.commit(&pool).await.unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.entries_posted, 0);
    }

    #[tokio::test]
    async fn review_edit_overrides_proposal() {
        let pool = db().await;
        let dining = account_id(&pool, "5100").await;
        let engine = RuleEngine::new(vec![]);
        let mut review = stage(vec![file("jan.ofx", CHECKING_STATEMENT)])
            .classify(&pool, &engine, &TransferDetector::default())
            .await
            .unwrap();
        review.set_proposed(0, CategoryState::Category(dining));

        let report = review.commit(&pool).await.unwrap();
        assert_eq!(report.entries_posted, 1);
        let (accounts, entries) = tally_storage::load_ledger(&pool).await.unwrap();
        let ledger = Ledger::new(&accounts, &entries);
        assert_eq!(ledger.balance_of(dining, None).to_cents(), 5000);
    }

    #[tokio::test]
    async fn bad_file_rejected_good_file_proceeds() {
        let pool = db().await;
        let coffee = account_id(&pool, "5200").await;
        let engine = coffee_rule(coffee);

        let (report, rejected) = run_import(
            &pool,
            vec![
                file("empty.ofx", "<OFX>\n<BANKACCTFROM>\n<BANKID>1\n<ACCTID>2\n"),
                file("jan.ofx", CHECKING_STATEMENT),
            ],
            &engine,
            &TransferDetector::default(),
        )
        .await
        .unwrap();

        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, "empty.ofx");
        assert_eq!(report.imported, 1);
    }

    #[tokio::test]
    async fn transfers_override_rules_and_skip_entries() {
        let pool = db().await;
        let checking = account_id(&pool, "1000").await;
        let savings = account_id(&pool, "1010").await;

        let checking_stmt = r#"
<OFX>
<BANKACCTFROM>
<BANKID>111000
<ACCTID>CHK-123
<ACCTTYPE>CHECKING
</BANKACCTFROM>
<BANKTRANLIST>
<STMTTRN>
<DTPOSTED>20240110
<TRNAMT>-500.00
<FITID>chk-9
<NAME>TRANSFER TO SAVINGS
</BANKTRANLIST>
"#;
        let savings_stmt = r#"
<OFX>
<BANKACCTFROM>
<BANKID>111000
<ACCTID>SAV-456
<ACCTTYPE>SAVINGS
</BANKACCTFROM>
<BANKTRANLIST>
<STMTTRN>
<DTPOSTED>20240110
<TRNAMT>500.00
<FITID>sav-3
<NAME>TRANSFER FROM CHECKING
</BANKTRANLIST>
"#;

        // A greedy rule that would otherwise categorize both legs.
        let misc = account_id(&pool, "5900").await;
        let engine = RuleEngine::new(vec![CategoryRule {
            name: "catch-all".into(),
            priority: 1,
            pattern: "transfer".into(),
            pattern_kind: PatternKind::Contains,
            match_field: MatchField::Name,
            target: RuleTarget::Category(misc),
            account_scope: None,
            is_active: true,
        }]);

        let (report, _) = run_import(
            &pool,
            vec![file("chk.ofx", checking_stmt), file("sav.ofx", savings_stmt)],
            &engine,
            &TransferDetector::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.imported, 2);
        assert_eq!(report.entries_posted, 0);

        let chk_txs = tally_storage::get_transactions_for_account(&pool, checking)
            .await
            .unwrap();
        assert_eq!(chk_txs[0].state, CategoryState::Transfer(savings));
        let sav_txs = tally_storage::get_transactions_for_account(&pool, savings)
            .await
            .unwrap();
        assert_eq!(sav_txs[0].state, CategoryState::Transfer(checking));

        let (_, entries) = tally_storage::load_ledger(&pool).await.unwrap();
        assert!(entries.is_empty());
    }
}
