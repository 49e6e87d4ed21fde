use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tally_core::{AccountType, DateRange, Money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountKind {
    Checking,
    Savings,
    CreditLine,
    MoneyMarket,
    CreditCard,
}

impl AccountKind {
    pub fn from_ofx_type(s: &str) -> Option<AccountKind> {
        match s.trim().to_uppercase().as_str() {
            "CHECKING" => Some(AccountKind::Checking),
            "SAVINGS" => Some(AccountKind::Savings),
            "CREDITLINE" => Some(AccountKind::CreditLine),
            "MONEYMRKT" => Some(AccountKind::MoneyMarket),
            _ => None,
        }
    }

    pub fn is_credit_card(self) -> bool {
        matches!(self, AccountKind::CreditCard)
    }

    /// Ledger type of the bank-side chart account for this kind.
    pub fn ledger_type(self) -> AccountType {
        if self.is_credit_card() {
            AccountType::Liability
        } else {
            AccountType::Asset
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccountKind::Checking => "checking",
            AccountKind::Savings => "savings",
            AccountKind::CreditLine => "creditline",
            AccountKind::MoneyMarket => "moneymarket",
            AccountKind::CreditCard => "creditcard",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<AccountKind> {
        match s {
            "checking" => Some(AccountKind::Checking),
            "savings" => Some(AccountKind::Savings),
            "creditline" => Some(AccountKind::CreditLine),
            "moneymarket" => Some(AccountKind::MoneyMarket),
            "creditcard" => Some(AccountKind::CreditCard),
            _ => None,
        }
    }
}

/// Identity of the statement's account as declared by the bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub bank_id: String,
    pub account_number: String,
    pub kind: AccountKind,
    pub currency: String,
}

impl AccountIdentity {
    /// One-way hash of `(bank_id, account_number)`. The hash is the stored
    /// dedup key so the raw account number never needs to be persisted.
    pub fn dedup_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.bank_id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.account_number.as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// A transaction exactly as the statement declared it. Produced once by
/// the parser and immutable afterward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub external_id: String,
    pub trn_type: Option<String>,
    pub amount: Money,
    pub posted: NaiveDate,
    pub name: String,
    pub memo: Option<String>,
    pub check_number: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub amount: Money,
    pub as_of: Option<NaiveDate>,
}

/// Why a single record was dropped during parsing. Dropped records never
/// abort the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    MissingExternalId,
    MissingDate,
    BadAmount(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedRecord {
    /// Zero-based position of the record in the statement's list.
    pub index: usize,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedStatement {
    pub account: AccountIdentity,
    pub balance: Option<BalanceSnapshot>,
    /// Range the statement declares for itself; preferred over the
    /// min/max of transaction dates, which it may exceed.
    pub declared_range: Option<DateRange>,
    pub transactions: Vec<RawTransaction>,
    pub dropped: Vec<DroppedRecord>,
}

impl ParsedStatement {
    /// Declared range when present, otherwise the span of parsed
    /// transaction dates.
    pub fn period(&self) -> Option<DateRange> {
        if let Some(range) = self.declared_range {
            return Some(range);
        }
        let min = self.transactions.iter().map(|t| t.posted).min()?;
        let max = self.transactions.iter().map(|t| t.posted).max()?;
        Some(DateRange::new(min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> AccountIdentity {
        AccountIdentity {
            bank_id: "123456789".into(),
            account_number: "000112345".into(),
            kind: AccountKind::Checking,
            currency: "USD".into(),
        }
    }

    #[test]
    fn dedup_hash_is_stable_and_hex() {
        let a = identity().dedup_hash();
        let b = identity().dedup_hash();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn dedup_hash_differs_per_account() {
        let mut other = identity();
        other.account_number = "999999999".into();
        assert_ne!(identity().dedup_hash(), other.dedup_hash());
    }

    #[test]
    fn dedup_hash_separates_fields() {
        // ("12", "345") and ("123", "45") must not collide.
        let a = AccountIdentity {
            bank_id: "12".into(),
            account_number: "345".into(),
            kind: AccountKind::Checking,
            currency: "USD".into(),
        };
        let b = AccountIdentity {
            bank_id: "123".into(),
            account_number: "45".into(),
            kind: AccountKind::Checking,
            currency: "USD".into(),
        };
        assert_ne!(a.dedup_hash(), b.dedup_hash());
    }

    #[test]
    fn account_kind_from_ofx_type() {
        assert_eq!(AccountKind::from_ofx_type("CHECKING"), Some(AccountKind::Checking));
        assert_eq!(AccountKind::from_ofx_type("savings"), Some(AccountKind::Savings));
        assert_eq!(AccountKind::from_ofx_type("MONEYMRKT"), Some(AccountKind::MoneyMarket));
        assert_eq!(AccountKind::from_ofx_type("XYZ"), None);
    }

    #[test]
    fn credit_card_maps_to_liability() {
        assert_eq!(AccountKind::CreditCard.ledger_type(), AccountType::Liability);
        assert_eq!(AccountKind::Checking.ledger_type(), AccountType::Asset);
        assert!(AccountKind::CreditCard.is_credit_card());
        assert!(!AccountKind::Savings.is_credit_card());
    }

    #[test]
    fn period_prefers_declared_range() {
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        let stmt = ParsedStatement {
            account: identity(),
            balance: None,
            declared_range: Some(DateRange::new(d(1, 1), d(1, 31))),
            transactions: vec![RawTransaction {
                external_id: "t1".into(),
                trn_type: None,
                amount: Money::from_cents(-100),
                posted: d(1, 15),
                name: "X".into(),
                memo: None,
                check_number: None,
            }],
            dropped: vec![],
        };
        assert_eq!(stmt.period(), Some(DateRange::new(d(1, 1), d(1, 31))));
    }

    #[test]
    fn period_falls_back_to_transaction_span() {
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        let tx = |day| RawTransaction {
            external_id: format!("t{day}"),
            trn_type: None,
            amount: Money::from_cents(-100),
            posted: d(1, day),
            name: "X".into(),
            memo: None,
            check_number: None,
        };
        let stmt = ParsedStatement {
            account: identity(),
            balance: None,
            declared_range: None,
            transactions: vec![tx(20), tx(5)],
            dropped: vec![],
        };
        assert_eq!(stmt.period(), Some(DateRange::new(d(1, 5), d(1, 20))));
    }
}
