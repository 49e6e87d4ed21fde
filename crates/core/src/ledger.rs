use chrono::NaiveDate;
use serde::Serialize;

use super::account::{AccountId, AccountType, ChartAccount, Side};
use super::journal::JournalEntry;
use super::money::Money;
use super::period::DateRange;

/// Read-only view over the chart and the full journal. Every balance and
/// report is a fold over entry history, so it can never drift from the
/// journal itself.
pub struct Ledger<'a> {
    accounts: &'a [ChartAccount],
    entries: &'a [JournalEntry],
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountTotal {
    pub account_id: AccountId,
    pub code: String,
    pub name: String,
    pub total: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfitAndLoss {
    pub revenue: Money,
    pub expenses: Money,
    pub net_income: Money,
    pub by_account: Vec<AccountTotal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceSheet {
    pub assets: Money,
    pub liabilities: Money,
    pub equity: Money,
    pub by_account: Vec<AccountTotal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CashFlow {
    pub inflows: Money,
    pub outflows: Money,
    pub net: Money,
}

impl<'a> Ledger<'a> {
    pub fn new(accounts: &'a [ChartAccount], entries: &'a [JournalEntry]) -> Self {
        Ledger { accounts, entries }
    }

    fn account(&self, id: AccountId) -> Option<&ChartAccount> {
        self.accounts.iter().find(|a| a.id == Some(id))
    }

    /// Replays every journal line touching the account: same-side amounts
    /// count positive, opposite-side negative, relative to the account's
    /// normal balance side.
    pub fn balance_of(&self, id: AccountId, as_of: Option<NaiveDate>) -> Money {
        let Some(account) = self.account(id) else {
            return Money::zero();
        };
        let normal = account.account_type.normal_side();
        self.fold_lines(id, normal, |date| as_of.map_or(true, |d| date <= d))
    }

    fn fold_lines<F: Fn(NaiveDate) -> bool>(
        &self,
        id: AccountId,
        normal: Side,
        include: F,
    ) -> Money {
        self.entries
            .iter()
            .filter(|e| include(e.date))
            .flat_map(|e| e.lines.iter().filter(|l| l.account_id == id))
            .map(|l| {
                if l.side == normal {
                    l.amount
                } else {
                    -l.amount
                }
            })
            .sum()
    }

    /// Activity of an account within a period, signed by its normal side.
    fn activity(&self, account: &ChartAccount, period: DateRange) -> Money {
        let Some(id) = account.id else {
            return Money::zero();
        };
        let normal = account.account_type.normal_side();
        self.fold_lines(id, normal, |date| period.contains(date))
    }

    fn totals_for(&self, account_type: AccountType, period: Option<DateRange>) -> Vec<AccountTotal> {
        self.accounts
            .iter()
            .filter(|a| a.account_type == account_type && a.id.is_some())
            .map(|a| {
                let total = match period {
                    Some(p) => self.activity(a, p),
                    None => self.balance_of(a.id.unwrap_or(AccountId(0)), None),
                };
                AccountTotal {
                    account_id: a.id.unwrap_or(AccountId(0)),
                    code: a.code.clone(),
                    name: a.name.clone(),
                    total,
                }
            })
            .filter(|t| !t.total.is_zero())
            .collect()
    }

    pub fn profit_and_loss(&self, period: DateRange) -> ProfitAndLoss {
        let mut by_account = self.totals_for(AccountType::Revenue, Some(period));
        by_account.extend(self.totals_for(AccountType::Expense, Some(period)));

        let revenue: Money = by_account
            .iter()
            .filter(|t| AccountType::for_code(&t.code) == Some(AccountType::Revenue))
            .map(|t| t.total)
            .sum();
        let expenses: Money = by_account
            .iter()
            .filter(|t| AccountType::for_code(&t.code) == Some(AccountType::Expense))
            .map(|t| t.total)
            .sum();

        ProfitAndLoss {
            revenue,
            expenses,
            net_income: revenue - expenses,
            by_account,
        }
    }

    pub fn balance_sheet(&self, as_of: Option<NaiveDate>) -> BalanceSheet {
        let mut by_account = Vec::new();
        let mut assets = Money::zero();
        let mut liabilities = Money::zero();
        let mut equity = Money::zero();

        for account in self.accounts {
            let Some(id) = account.id else { continue };
            let kind = account.account_type;
            if !matches!(
                kind,
                AccountType::Asset | AccountType::Liability | AccountType::Equity
            ) {
                continue;
            }
            let total = self.balance_of(id, as_of);
            match kind {
                AccountType::Asset => assets = assets + total,
                AccountType::Liability => liabilities = liabilities + total,
                AccountType::Equity => equity = equity + total,
                _ => {}
            }
            if !total.is_zero() {
                by_account.push(AccountTotal {
                    account_id: id,
                    code: account.code.clone(),
                    name: account.name.clone(),
                    total,
                });
            }
        }

        BalanceSheet {
            assets,
            liabilities,
            equity,
            by_account,
        }
    }

    /// Cash movement over asset accounts in the period: debits to assets
    /// are inflows, credits outflows.
    pub fn cash_flow(&self, period: DateRange) -> CashFlow {
        let asset_ids: Vec<AccountId> = self
            .accounts
            .iter()
            .filter(|a| a.account_type == AccountType::Asset)
            .filter_map(|a| a.id)
            .collect();

        let mut inflows = Money::zero();
        let mut outflows = Money::zero();
        for entry in self.entries.iter().filter(|e| period.contains(e.date)) {
            for line in entry
                .lines
                .iter()
                .filter(|l| asset_ids.contains(&l.account_id))
            {
                match line.side {
                    Side::Debit => inflows = inflows + line.amount,
                    Side::Credit => outflows = outflows + line.amount,
                }
            }
        }

        CashFlow {
            inflows,
            outflows,
            net: inflows - outflows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{DraftEntry, JournalLine};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn account(n: i64, code: &str, account_type: AccountType) -> ChartAccount {
        let mut acct = ChartAccount::new(code, code, account_type);
        acct.id = Some(AccountId(n));
        acct
    }

    fn entry(d: NaiveDate, debit: (i64, i64), credit: (i64, i64)) -> JournalEntry {
        JournalEntry::validate(DraftEntry {
            date: d,
            description: "test".into(),
            lines: vec![
                JournalLine::debit(AccountId(debit.0), Money::from_cents(debit.1)),
                JournalLine::credit(AccountId(credit.0), Money::from_cents(credit.1)),
            ],
            source_transaction_id: None,
        })
        .unwrap()
    }

    fn chart() -> Vec<ChartAccount> {
        vec![
            account(1, "1000", AccountType::Asset),
            account(2, "2000", AccountType::Liability),
            account(3, "3000", AccountType::Equity),
            account(4, "4000", AccountType::Revenue),
            account(5, "5200", AccountType::Expense),
        ]
    }

    #[test]
    fn balance_of_folds_both_sides() {
        let accounts = chart();
        let entries = vec![
            // Salary 1500 into checking.
            entry(date(2024, 1, 2), (1, 150000), (4, 150000)),
            // 50 coffee out of checking.
            entry(date(2024, 1, 15), (5, 5000), (1, 5000)),
        ];
        let ledger = Ledger::new(&accounts, &entries);
        assert_eq!(ledger.balance_of(AccountId(1), None).to_cents(), 145000);
        assert_eq!(ledger.balance_of(AccountId(4), None).to_cents(), 150000);
        assert_eq!(ledger.balance_of(AccountId(5), None).to_cents(), 5000);
    }

    #[test]
    fn balance_of_respects_as_of_date() {
        let accounts = chart();
        let entries = vec![
            entry(date(2024, 1, 2), (1, 150000), (4, 150000)),
            entry(date(2024, 2, 1), (5, 5000), (1, 5000)),
        ];
        let ledger = Ledger::new(&accounts, &entries);
        let jan = ledger.balance_of(AccountId(1), Some(date(2024, 1, 31)));
        assert_eq!(jan.to_cents(), 150000);
    }

    #[test]
    fn replay_matches_incremental_computation() {
        let accounts = chart();
        let all = vec![
            entry(date(2024, 1, 2), (1, 150000), (4, 150000)),
            entry(date(2024, 1, 10), (5, 2000), (1, 2000)),
            entry(date(2024, 1, 20), (5, 3000), (1, 3000)),
        ];

        // Incremental: recompute after each entry and track by hand.
        let mut running = 0i64;
        for i in 0..all.len() {
            let slice = &all[..=i];
            let ledger = Ledger::new(&accounts, slice);
            let from_scratch = ledger.balance_of(AccountId(1), None).to_cents();
            let delta: i64 = all[i]
                .lines
                .iter()
                .filter(|l| l.account_id == AccountId(1))
                .map(|l| match l.side {
                    Side::Debit => l.amount.to_cents(),
                    Side::Credit => -l.amount.to_cents(),
                })
                .sum();
            running += delta;
            assert_eq!(from_scratch, running);
        }
    }

    #[test]
    fn profit_and_loss_over_period() {
        let accounts = chart();
        let entries = vec![
            entry(date(2024, 1, 2), (1, 150000), (4, 150000)),
            entry(date(2024, 1, 15), (5, 5000), (1, 5000)),
            // Outside the period.
            entry(date(2024, 3, 1), (5, 99900), (1, 99900)),
        ];
        let ledger = Ledger::new(&accounts, &entries);
        let period = DateRange::new(date(2024, 1, 1), date(2024, 1, 31));
        let pnl = ledger.profit_and_loss(period);
        assert_eq!(pnl.revenue.to_cents(), 150000);
        assert_eq!(pnl.expenses.to_cents(), 5000);
        assert_eq!(pnl.net_income.to_cents(), 145000);
        assert_eq!(pnl.by_account.len(), 2);
    }

    #[test]
    fn balance_sheet_totals() {
        let accounts = chart();
        let entries = vec![
            // Opening balance 1000 into checking.
            entry(date(2024, 1, 1), (1, 100000), (3, 100000)),
            // 25 charge on the credit card.
            entry(date(2024, 1, 5), (5, 2500), (2, 2500)),
        ];
        let ledger = Ledger::new(&accounts, &entries);
        let sheet = ledger.balance_sheet(None);
        assert_eq!(sheet.assets.to_cents(), 100000);
        assert_eq!(sheet.liabilities.to_cents(), 2500);
        assert_eq!(sheet.equity.to_cents(), 100000);
    }

    #[test]
    fn cash_flow_over_assets_only() {
        let accounts = chart();
        let entries = vec![
            entry(date(2024, 1, 2), (1, 150000), (4, 150000)),
            entry(date(2024, 1, 15), (5, 5000), (1, 5000)),
            // Credit card charge touches no asset account.
            entry(date(2024, 1, 20), (5, 2500), (2, 2500)),
        ];
        let ledger = Ledger::new(&accounts, &entries);
        let period = DateRange::new(date(2024, 1, 1), date(2024, 1, 31));
        let flow = ledger.cash_flow(period);
        assert_eq!(flow.inflows.to_cents(), 150000);
        assert_eq!(flow.outflows.to_cents(), 5000);
        assert_eq!(flow.net.to_cents(), 145000);
    }

    #[test]
    fn unknown_account_balance_is_zero() {
        let accounts = chart();
        let entries = vec![];
        let ledger = Ledger::new(&accounts, &entries);
        assert!(ledger.balance_of(AccountId(99), None).is_zero());
    }
}
