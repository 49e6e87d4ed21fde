pub mod account;
pub mod journal;
pub mod ledger;
pub mod money;
pub mod period;
pub mod transaction;

pub use account::{AccountId, AccountType, ChartAccount, LedgerError, Side, DEFAULT_ACCOUNTS};
pub use journal::{DraftEntry, JournalEntry, JournalLine};
pub use ledger::{AccountTotal, BalanceSheet, CashFlow, Ledger, ProfitAndLoss};
pub use money::Money;
pub use period::DateRange;
pub use transaction::{CategoryState, Transaction};
