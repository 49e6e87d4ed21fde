use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::statement::ParsedStatement;

/// Ordered weakest-to-strongest so the derived `Ord` sorts naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Confidence {
    /// Cross-currency match requiring an inferred exchange rate.
    Low,
    /// Amounts match exactly, dates within the posting-lag window.
    Medium,
    /// Amounts match exactly on the same day.
    High,
}

/// Position of one side of a transfer in the detector's input:
/// `(statement index, transaction index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferLeg {
    pub statement: usize,
    pub transaction: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedTransfer {
    /// The outflow (negative-amount) side.
    pub source: TransferLeg,
    /// The inflow side.
    pub target: TransferLeg,
    pub confidence: Confidence,
    /// Set only for cross-currency pairs.
    pub inferred_rate: Option<Decimal>,
}

pub struct TransferDetector {
    /// Bank posting lag tolerated between the two legs.
    pub date_window_days: i64,
    /// Inferred cross-currency rates outside `[1/rate_cap, rate_cap]` are
    /// discarded as noise.
    pub rate_cap: Decimal,
}

impl Default for TransferDetector {
    fn default() -> Self {
        Self {
            date_window_days: 3,
            rate_cap: Decimal::from(10),
        }
    }
}

struct Candidate {
    source: TransferLeg,
    target: TransferLeg,
    confidence: Confidence,
    inferred_rate: Option<Decimal>,
    /// Enumeration order, the tie-breaker within a confidence level.
    order: usize,
}

impl TransferDetector {
    pub fn new(date_window_days: i64) -> Self {
        Self {
            date_window_days,
            ..Self::default()
        }
    }

    /// Finds pairs of transactions that represent money moving between
    /// the user's own accounts. Only meaningful with at least two
    /// statements; assignment is greedy in confidence order and each
    /// transaction is consumed by at most one pair.
    pub fn detect(&self, statements: &[ParsedStatement]) -> Vec<DetectedTransfer> {
        if statements.len() < 2 {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        let mut order = 0;
        for (si, source_stmt) in statements.iter().enumerate() {
            for (ti, target_stmt) in statements.iter().enumerate() {
                if si == ti || source_stmt.account.dedup_hash() == target_stmt.account.dedup_hash()
                {
                    continue;
                }
                for (sx, out) in source_stmt.transactions.iter().enumerate() {
                    if !out.amount.is_negative() {
                        continue;
                    }
                    for (tx, inc) in target_stmt.transactions.iter().enumerate() {
                        if inc.amount.is_negative() || inc.amount.is_zero() {
                            continue;
                        }
                        let days = (inc.posted - out.posted).num_days().abs();
                        if days > self.date_window_days {
                            continue;
                        }

                        let same_currency =
                            source_stmt.account.currency == target_stmt.account.currency;
                        let confidence = if same_currency {
                            if out.amount.to_cents() + inc.amount.to_cents() != 0 {
                                continue;
                            }
                            if days == 0 {
                                Confidence::High
                            } else {
                                Confidence::Medium
                            }
                        } else {
                            Confidence::Low
                        };

                        let inferred_rate = if same_currency {
                            None
                        } else {
                            match self.infer_rate(out.amount.to_cents(), inc.amount.to_cents()) {
                                Some(rate) => Some(rate),
                                None => continue,
                            }
                        };

                        candidates.push(Candidate {
                            source: TransferLeg {
                                statement: si,
                                transaction: sx,
                            },
                            target: TransferLeg {
                                statement: ti,
                                transaction: tx,
                            },
                            confidence,
                            inferred_rate,
                            order,
                        });
                        order += 1;
                    }
                }
            }
        }

        // Strongest signal first; input order breaks ties. Greedy, not
        // globally optimal.
        candidates.sort_by(|a, b| b.confidence.cmp(&a.confidence).then(a.order.cmp(&b.order)));

        let mut consumed: HashSet<TransferLeg> = HashSet::new();
        let mut transfers = Vec::new();
        for c in candidates {
            if consumed.contains(&c.source) || consumed.contains(&c.target) {
                continue;
            }
            consumed.insert(c.source);
            consumed.insert(c.target);
            transfers.push(DetectedTransfer {
                source: c.source,
                target: c.target,
                confidence: c.confidence,
                inferred_rate: c.inferred_rate,
            });
        }
        transfers
    }

    fn infer_rate(&self, out_cents: i64, in_cents: i64) -> Option<Decimal> {
        if out_cents == 0 || in_cents == 0 {
            return None;
        }
        let rate = Decimal::from(in_cents.abs()) / Decimal::from(out_cents.abs());
        let floor = Decimal::ONE / self.rate_cap;
        if rate < floor || rate > self.rate_cap {
            return None;
        }
        Some(rate)
    }
}
