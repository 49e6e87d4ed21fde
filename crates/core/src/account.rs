use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

/// Debit/credit side of a journal line, also the side on which an account
/// type naturally increases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Debit,
    Credit,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Debit => Side::Credit,
            Side::Credit => Side::Debit,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Debit => "debit",
            Side::Credit => "credit",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Side> {
        match s {
            "debit" => Some(Side::Debit),
            "credit" => Some(Side::Credit),
            _ => None,
        }
    }
}

impl AccountType {
    pub fn normal_side(self) -> Side {
        match self {
            AccountType::Asset | AccountType::Expense => Side::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Revenue => Side::Credit,
        }
    }

    /// The account type encoded by the leading digit of a chart code:
    /// 1xxx asset, 2xxx liability, 3xxx equity, 4xxx revenue, 5xxx expense.
    pub fn for_code(code: &str) -> Option<AccountType> {
        match code.chars().next()? {
            '1' => Some(AccountType::Asset),
            '2' => Some(AccountType::Liability),
            '3' => Some(AccountType::Equity),
            '4' => Some(AccountType::Revenue),
            '5' => Some(AccountType::Expense),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccountType::Asset => "Asset",
            AccountType::Liability => "Liability",
            AccountType::Equity => "Equity",
            AccountType::Revenue => "Revenue",
            AccountType::Expense => "Expense",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<AccountType> {
        match s {
            "Asset" => Some(AccountType::Asset),
            "Liability" => Some(AccountType::Liability),
            "Equity" => Some(AccountType::Equity),
            "Revenue" => Some(AccountType::Revenue),
            "Expense" => Some(AccountType::Expense),
            _ => None,
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartAccount {
    pub id: Option<AccountId>,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub parent_id: Option<AccountId>,
    pub is_system: bool,
    pub is_active: bool,
}

impl ChartAccount {
    pub fn new(code: &str, name: &str, account_type: AccountType) -> Self {
        ChartAccount {
            id: None,
            code: code.to_string(),
            name: name.to_string(),
            account_type,
            parent_id: None,
            is_system: false,
            is_active: true,
        }
    }

    /// Structural checks applied before an account is created or re-coded.
    /// The code prefix must agree with the declared type, and a child must
    /// share its parent's type.
    pub fn validate(&self, parent: Option<&ChartAccount>) -> Result<(), LedgerError> {
        match AccountType::for_code(&self.code) {
            Some(t) if t == self.account_type => {}
            _ => {
                return Err(LedgerError::CodeTypeMismatch {
                    code: self.code.clone(),
                    account_type: self.account_type,
                })
            }
        }
        if let Some(parent) = parent {
            if parent.account_type != self.account_type {
                return Err(LedgerError::ParentTypeMismatch {
                    child: self.account_type,
                    parent: parent.account_type,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("unbalanced entry: debits={0}, credits={1}")]
    Unbalanced(Money, Money),
    #[error("journal entry must have at least two lines")]
    TooFewLines,
    #[error("journal line amounts must be non-negative")]
    NegativeLineAmount,
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),
    #[error("account {0} has not been saved")]
    UnsavedAccount(String),
    #[error("account {0} is inactive")]
    InactiveAccount(AccountId),
    #[error("account code {code} does not encode type {account_type}")]
    CodeTypeMismatch { code: String, account_type: AccountType },
    #[error("child type {child} differs from parent type {parent}")]
    ParentTypeMismatch { child: AccountType, parent: AccountType },
    #[error("account code already in use: {0}")]
    CodeTaken(String),
    #[error("account {0} has child accounts")]
    HasChildren(AccountId),
    #[error("account {0} is referenced by journal lines")]
    HasJournalLines(AccountId),
}

/// Seed chart of accounts. System accounts back bank links and opening
/// balances; the rest is a starter set the user edits freely.
pub const DEFAULT_ACCOUNTS: &[(&str, &str, AccountType, bool)] = &[
    ("1000", "Checking", AccountType::Asset, true),
    ("1010", "Savings", AccountType::Asset, true),
    ("1020", "Money Market", AccountType::Asset, true),
    ("2000", "Credit Card", AccountType::Liability, true),
    ("2010", "Line of Credit", AccountType::Liability, true),
    ("3000", "Opening Balances", AccountType::Equity, true),
    ("4000", "Salary", AccountType::Revenue, false),
    ("4100", "Interest Income", AccountType::Revenue, false),
    ("4900", "Other Income", AccountType::Revenue, false),
    ("5000", "Groceries", AccountType::Expense, false),
    ("5100", "Dining Out", AccountType::Expense, false),
    ("5200", "Coffee & Snacks", AccountType::Expense, false),
    ("5300", "Utilities", AccountType::Expense, false),
    ("5400", "Rent & Mortgage", AccountType::Expense, false),
    ("5500", "Transportation", AccountType::Expense, false),
    ("5600", "Subscriptions", AccountType::Expense, false),
    ("5700", "Insurance", AccountType::Expense, false),
    ("5800", "Bank Fees", AccountType::Expense, false),
    ("5900", "Miscellaneous", AccountType::Expense, false),
];
