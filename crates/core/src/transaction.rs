use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::account::AccountId;
use super::money::Money;

/// Categorization state of a stored transaction. Transfers and ignores
/// never generate journal entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategoryState {
    Uncategorized,
    Category(AccountId),
    Transfer(AccountId),
    Ignored,
}

impl CategoryState {
    /// Stable string encoding used by the store: a kind tag plus an
    /// optional account reference column.
    pub fn encode(self) -> (&'static str, Option<i64>) {
        match self {
            CategoryState::Uncategorized => ("uncategorized", None),
            CategoryState::Category(id) => ("category", Some(id.0)),
            CategoryState::Transfer(id) => ("transfer", Some(id.0)),
            CategoryState::Ignored => ("ignored", None),
        }
    }

    pub fn decode(kind: &str, account: Option<i64>) -> Option<CategoryState> {
        match (kind, account) {
            ("uncategorized", _) => Some(CategoryState::Uncategorized),
            ("category", Some(id)) => Some(CategoryState::Category(AccountId(id))),
            ("transfer", Some(id)) => Some(CategoryState::Transfer(AccountId(id))),
            ("ignored", _) => Some(CategoryState::Ignored),
            _ => None,
        }
    }

    /// Only a real category produces a journal entry; uncategorized waits,
    /// transfers and ignores are excluded from revenue/expense entirely.
    pub fn wants_journal_entry(self) -> bool {
        matches!(self, CategoryState::Category(_))
    }
}

/// Ledger-facing transaction, promoted from a parsed statement record.
/// `(account_id, external_id)` is the dedup key across repeated imports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Option<i64>,
    pub account_id: AccountId,
    pub external_id: String,
    pub amount: Money,
    pub posted: NaiveDate,
    pub payee: String,
    pub memo: Option<String>,
    pub check_number: Option<String>,
    pub state: CategoryState,
    pub journal_entry_id: Option<i64>,
}

impl Transaction {
    /// Text the rule engine matches against when a rule asks for both
    /// fields: `"{payee} {memo}"`.
    pub fn combined_text(&self) -> String {
        match &self.memo {
            Some(memo) => format!("{} {}", self.payee, memo),
            None => self.payee.clone(),
        }
    }
}
