use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::account::{AccountType, ChartAccount, LedgerError, Side};
use super::money::Money;
use super::transaction::Transaction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_id: super::account::AccountId,
    pub amount: Money,
    pub side: Side,
}

impl JournalLine {
    pub fn debit(account_id: super::account::AccountId, amount: Money) -> Self {
        JournalLine {
            account_id,
            amount,
            side: Side::Debit,
        }
    }

    pub fn credit(account_id: super::account::AccountId, amount: Money) -> Self {
        JournalLine {
            account_id,
            amount,
            side: Side::Credit,
        }
    }
}

/// An entry that has not yet passed the balance check. Nothing outside
/// `JournalEntry::validate` may turn one of these into journal lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftEntry {
    pub date: NaiveDate,
    pub description: String,
    pub lines: Vec<JournalLine>,
    pub source_transaction_id: Option<i64>,
}

impl DraftEntry {
    pub fn total_debits(&self) -> Money {
        self.lines
            .iter()
            .filter(|l| l.side == Side::Debit)
            .map(|l| l.amount)
            .sum()
    }

    pub fn total_credits(&self) -> Money {
        self.lines
            .iter()
            .filter(|l| l.side == Side::Credit)
            .map(|l| l.amount)
            .sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Option<i64>,
    pub date: NaiveDate,
    pub description: String,
    pub lines: Vec<JournalLine>,
    pub source_transaction_id: Option<i64>,
}

impl JournalEntry {
    /// The single invariant-enforcement point: at least two lines, no
    /// negative line amounts, and debit and credit totals equal in cents.
    pub fn validate(draft: DraftEntry) -> Result<JournalEntry, LedgerError> {
        if draft.lines.len() < 2 {
            return Err(LedgerError::TooFewLines);
        }
        if draft.lines.iter().any(|l| l.amount.is_negative()) {
            return Err(LedgerError::NegativeLineAmount);
        }

        let debits = draft.total_debits();
        let credits = draft.total_credits();
        if debits.to_cents() != credits.to_cents() {
            return Err(LedgerError::Unbalanced(debits, credits));
        }

        Ok(JournalEntry {
            id: None,
            date: draft.date,
            description: draft.description,
            lines: draft.lines,
            source_transaction_id: draft.source_transaction_id,
        })
    }

    /// Builds the two-line entry for a categorized bank transaction.
    ///
    /// Direction follows standard double-entry semantics: assets increase
    /// on the debit side, liabilities on the credit side.
    ///
    /// | bank account | amount sign          | bank side | category side |
    /// |--------------|----------------------|-----------|---------------|
    /// | asset        | positive (money in)  | debit     | credit        |
    /// | asset        | negative (money out) | credit    | debit         |
    /// | liability    | positive (charge)    | credit    | debit         |
    /// | liability    | negative (payment)   | debit     | credit        |
    pub fn from_transaction(
        tx: &Transaction,
        bank_account: &ChartAccount,
        category_account: &ChartAccount,
    ) -> Result<JournalEntry, LedgerError> {
        let bank_id = bank_account
            .id
            .ok_or_else(|| LedgerError::UnsavedAccount(bank_account.code.clone()))?;
        let category_id = category_account
            .id
            .ok_or_else(|| LedgerError::UnsavedAccount(category_account.code.clone()))?;
        if !bank_account.is_active {
            return Err(LedgerError::InactiveAccount(bank_id));
        }
        if !category_account.is_active {
            return Err(LedgerError::InactiveAccount(category_id));
        }

        let magnitude = tx.amount.abs();
        let money_in = !tx.amount.is_negative();
        let bank_side = match (bank_account.account_type, money_in) {
            (AccountType::Liability, true) => Side::Credit,
            (AccountType::Liability, false) => Side::Debit,
            (_, true) => Side::Debit,
            (_, false) => Side::Credit,
        };

        let bank_line = JournalLine {
            account_id: bank_id,
            amount: magnitude,
            side: bank_side,
        };
        let category_line = JournalLine {
            account_id: category_id,
            amount: magnitude,
            side: bank_side.opposite(),
        };

        JournalEntry::validate(DraftEntry {
            date: tx.posted,
            description: tx.payee.clone(),
            lines: vec![bank_line, category_line],
            source_transaction_id: tx.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountId;
    use crate::transaction::CategoryState;

    fn id(n: i64) -> AccountId {
        AccountId(n)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn account(n: i64, code: &str, account_type: AccountType) -> ChartAccount {
        let mut acct = ChartAccount::new(code, "test", account_type);
        acct.id = Some(id(n));
        acct
    }

    fn tx(cents: i64) -> Transaction {
        Transaction {
            id: Some(42),
            account_id: id(1),
            external_id: "tx-1".into(),
            amount: Money::from_cents(cents),
            posted: date(2024, 1, 15),
            payee: "Coffee Shop".into(),
            memo: None,
            check_number: None,
            state: CategoryState::Uncategorized,
            journal_entry_id: None,
        }
    }

    #[test]
    fn validate_balanced_entry() {
        let entry = JournalEntry::validate(DraftEntry {
            date: date(2024, 1, 15),
            description: "ok".into(),
            lines: vec![
                JournalLine::debit(id(1), Money::from_cents(5000)),
                JournalLine::credit(id(2), Money::from_cents(5000)),
            ],
            source_transaction_id: None,
        })
        .unwrap();
        assert_eq!(entry.lines.len(), 2);
    }

    #[test]
    fn validate_rejects_unbalanced() {
        let result = JournalEntry::validate(DraftEntry {
            date: date(2024, 1, 15),
            description: "bad".into(),
            lines: vec![
                JournalLine::debit(id(1), Money::from_cents(500)),
                JournalLine::credit(id(2), Money::from_cents(400)),
            ],
            source_transaction_id: None,
        });
        assert!(matches!(result, Err(LedgerError::Unbalanced(_, _))));
    }

    #[test]
    fn validate_rejects_single_line_and_empty() {
        let single = DraftEntry {
            date: date(2024, 1, 15),
            description: "one".into(),
            lines: vec![JournalLine::debit(id(1), Money::from_cents(500))],
            source_transaction_id: None,
        };
        assert!(matches!(
            JournalEntry::validate(single),
            Err(LedgerError::TooFewLines)
        ));
        let empty = DraftEntry {
            date: date(2024, 1, 15),
            description: "none".into(),
            lines: vec![],
            source_transaction_id: None,
        };
        assert!(matches!(
            JournalEntry::validate(empty),
            Err(LedgerError::TooFewLines)
        ));
    }

    #[test]
    fn validate_rejects_negative_line() {
        let result = JournalEntry::validate(DraftEntry {
            date: date(2024, 1, 15),
            description: "neg".into(),
            lines: vec![
                JournalLine::debit(id(1), Money::from_cents(-500)),
                JournalLine::credit(id(2), Money::from_cents(-500)),
            ],
            source_transaction_id: None,
        });
        assert!(matches!(result, Err(LedgerError::NegativeLineAmount)));
    }

    #[test]
    fn validate_multi_line_split() {
        let entry = JournalEntry::validate(DraftEntry {
            date: date(2024, 1, 15),
            description: "split".into(),
            lines: vec![
                JournalLine::debit(id(1), Money::from_cents(300)),
                JournalLine::debit(id(2), Money::from_cents(200)),
                JournalLine::credit(id(3), Money::from_cents(500)),
            ],
            source_transaction_id: None,
        })
        .unwrap();
        assert_eq!(entry.lines.len(), 3);
    }

    // Truth-table cases for from_transaction.

    fn sides(entry: &JournalEntry) -> (Side, Side) {
        (entry.lines[0].side, entry.lines[1].side)
    }

    #[test]
    fn asset_money_out_credits_bank() {
        let bank = account(1, "1000", AccountType::Asset);
        let category = account(2, "5200", AccountType::Expense);
        let entry = JournalEntry::from_transaction(&tx(-5000), &bank, &category).unwrap();
        assert_eq!(sides(&entry), (Side::Credit, Side::Debit));
        assert_eq!(entry.lines[0].amount.to_cents(), 5000);
        assert_eq!(entry.lines[1].amount.to_cents(), 5000);
        assert_eq!(entry.source_transaction_id, Some(42));
    }

    #[test]
    fn asset_money_in_debits_bank() {
        let bank = account(1, "1000", AccountType::Asset);
        let category = account(2, "4000", AccountType::Revenue);
        let entry = JournalEntry::from_transaction(&tx(150000), &bank, &category).unwrap();
        assert_eq!(sides(&entry), (Side::Debit, Side::Credit));
    }

    #[test]
    fn credit_card_charge_credits_bank() {
        let bank = account(1, "2000", AccountType::Liability);
        let category = account(2, "5100", AccountType::Expense);
        let entry = JournalEntry::from_transaction(&tx(2500), &bank, &category).unwrap();
        assert_eq!(sides(&entry), (Side::Credit, Side::Debit));
    }

    #[test]
    fn credit_card_payment_debits_bank() {
        let bank = account(1, "2000", AccountType::Liability);
        let category = account(2, "1000", AccountType::Asset);
        let entry = JournalEntry::from_transaction(&tx(-10000), &bank, &category).unwrap();
        assert_eq!(sides(&entry), (Side::Debit, Side::Credit));
    }

    #[test]
    fn from_transaction_rejects_inactive_account() {
        let bank = account(1, "1000", AccountType::Asset);
        let mut category = account(2, "5200", AccountType::Expense);
        category.is_active = false;
        assert!(matches!(
            JournalEntry::from_transaction(&tx(-5000), &bank, &category),
            Err(LedgerError::InactiveAccount(_))
        ));
    }
}
