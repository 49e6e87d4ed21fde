//! Tolerant parser for OFX-family statement exports.
//!
//! Two dialects exist in the wild: the SGML "tag soup" form, where values
//! run to the next tag and aggregates may never close, and the later
//! well-formed XML form with matching close tags. The dialect is sniffed
//! once per file; extraction afterward goes through a single
//! [`FieldExtractor`] so nothing else branches on dialect. Misdetection
//! degrades to missing fields, never a crash.

use chrono::NaiveDate;
use thiserror::Error;

use tally_core::{DateRange, Money};

use crate::statement::{
    AccountIdentity, AccountKind, BalanceSnapshot, DropReason, DroppedRecord, ParsedStatement,
    RawTransaction,
};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("empty statement file")]
    Empty,
    #[error("no account block found (BANKACCTFROM or CCACCTFROM)")]
    NoAccountBlock,
}

/// File-level validation, kept separate from parsing so partially-bad
/// files can still be previewed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("statement declares no account id")]
    MissingAccountId,
    #[error("statement contains no parseable transactions")]
    NoTransactions,
    #[error("{dropped} of {total} records missing required fields")]
    TooManyDropped { dropped: usize, total: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sgml,
    Xml,
}

/// Sniffs the dialect from the first non-whitespace bytes. A `<?xml`
/// prolog marks the well-formed form; everything else (an `OFXHEADER:`
/// preamble, a bare `<OFX>`) is treated as tag soup.
pub fn sniff_dialect(data: &str) -> Dialect {
    if data.trim_start().starts_with("<?xml") {
        Dialect::Xml
    } else {
        Dialect::Sgml
    }
}

/// Scalar field extraction, one implementation per dialect.
trait FieldExtractor {
    fn field(&self, block: &str, tag: &str) -> Option<String>;
}

/// Tag soup: the value runs until the next `<` or end of line.
struct SgmlFields;

/// Well-formed: the value is strictly bounded by the matching close tag.
struct XmlFields;

impl FieldExtractor for SgmlFields {
    fn field(&self, block: &str, tag: &str) -> Option<String> {
        let start = value_start(block, tag)?;
        let rest = &block[start..];
        let end = rest
            .find(|c| c == '<' || c == '\n' || c == '\r')
            .unwrap_or(rest.len());
        non_empty(rest[..end].trim())
    }
}

impl FieldExtractor for XmlFields {
    fn field(&self, block: &str, tag: &str) -> Option<String> {
        let start = value_start(block, tag)?;
        let rest = &block[start..];
        let close = format!("</{tag}>");
        let end = find_ci(rest, &close, 0)?;
        non_empty(rest[..end].trim())
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Byte offset just past `<TAG>`, matched case-insensitively.
fn value_start(block: &str, tag: &str) -> Option<usize> {
    let open = format!("<{tag}>");
    let pos = find_ci(block, &open, 0)?;
    Some(pos + open.len())
}

/// Case-insensitive substring search from `from`.
fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() || from > h.len() - n.len() {
        return None;
    }
    (from..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

/// Slice of `text` spanning an aggregate: from just past `<TAG>` to the
/// matching `</TAG>` when one exists, else to the end of `text`. The
/// fallback is what keeps tag-soup files parseable.
fn aggregate<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let start = value_start(text, tag)?;
    let close = format!("</{tag}>");
    match find_ci(text, &close, start) {
        Some(end) => Some(&text[start..end]),
        None => Some(&text[start..]),
    }
}

/// Splits the transaction list into per-record blocks. Tag soup has no
/// reliable closing delimiter, so each block ends at the start of the
/// next `<STMTTRN>` (or the end of the list).
fn transaction_blocks(list: &str) -> Vec<&str> {
    let mut starts = Vec::new();
    let mut from = 0;
    while let Some(pos) = find_ci(list, "<STMTTRN>", from) {
        starts.push(pos);
        from = pos + "<STMTTRN>".len();
    }

    let mut blocks = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let begin = start + "<STMTTRN>".len();
        let end = starts.get(i + 1).copied().unwrap_or(list.len());
        blocks.push(&list[begin..end]);
    }
    blocks
}

/// Normalizes `YYYYMMDD[HHMMSS][.fff][tz-suffix]` to a calendar date.
/// Timezone suffixes are stripped, not converted: banking dates are local
/// dates, not instants.
fn parse_ofx_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 8 {
        return None;
    }
    let y: i32 = digits[0..4].parse().ok()?;
    let m: u32 = digits[4..6].parse().ok()?;
    let d: u32 = digits[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(y, m, d)
}

/// Parses a statement export in either dialect.
///
/// Field-level problems drop individual records into
/// [`ParsedStatement::dropped`]; only a file with no recognizable account
/// block at all fails outright.
pub fn parse(raw: &str) -> Result<ParsedStatement, ParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ParseError::Empty);
    }

    let extractor: &dyn FieldExtractor = match sniff_dialect(raw) {
        Dialect::Sgml => &SgmlFields,
        Dialect::Xml => &XmlFields,
    };

    // Checking/savings block first, then the credit-card block. Whichever
    // matches decides the account kind and, later, sign interpretation.
    let (account_block, kind) = if let Some(block) = aggregate(raw, "BANKACCTFROM") {
        let kind = extractor
            .field(block, "ACCTTYPE")
            .and_then(|t| AccountKind::from_ofx_type(&t))
            .unwrap_or(AccountKind::Checking);
        (block, kind)
    } else if let Some(block) = aggregate(raw, "CCACCTFROM") {
        (block, AccountKind::CreditCard)
    } else {
        return Err(ParseError::NoAccountBlock);
    };

    let account = AccountIdentity {
        bank_id: extractor.field(account_block, "BANKID").unwrap_or_default(),
        account_number: extractor.field(account_block, "ACCTID").unwrap_or_default(),
        kind,
        currency: extractor.field(raw, "CURDEF").unwrap_or_else(|| "USD".to_string()),
    };

    let list = aggregate(raw, "BANKTRANLIST").unwrap_or(raw);

    let declared_range = match (
        extractor.field(list, "DTSTART").as_deref().and_then(parse_ofx_date),
        extractor.field(list, "DTEND").as_deref().and_then(parse_ofx_date),
    ) {
        (Some(start), Some(end)) => Some(DateRange::new(start, end)),
        _ => None,
    };

    let balance = aggregate(raw, "LEDGERBAL").and_then(|block| {
        let amount = Money::parse(&extractor.field(block, "BALAMT")?)?;
        let as_of = extractor.field(block, "DTASOF").as_deref().and_then(parse_ofx_date);
        Some(BalanceSnapshot { amount, as_of })
    });

    let mut transactions = Vec::new();
    let mut dropped = Vec::new();
    for (index, block) in transaction_blocks(list).into_iter().enumerate() {
        match parse_record(extractor, block) {
            Ok(tx) => transactions.push(tx),
            Err(reason) => dropped.push(DroppedRecord { index, reason }),
        }
    }

    Ok(ParsedStatement {
        account,
        balance,
        declared_range,
        transactions,
        dropped,
    })
}

/// `FITID`, `TRNAMT` (finite decimal), and `DTPOSTED` are required; a
/// record missing any of them is dropped, never the whole file.
fn parse_record(extractor: &dyn FieldExtractor, block: &str) -> Result<RawTransaction, DropReason> {
    let external_id = extractor
        .field(block, "FITID")
        .ok_or(DropReason::MissingExternalId)?;
    let posted = extractor
        .field(block, "DTPOSTED")
        .as_deref()
        .and_then(parse_ofx_date)
        .ok_or(DropReason::MissingDate)?;
    let amount_text = extractor
        .field(block, "TRNAMT")
        .ok_or_else(|| DropReason::BadAmount(String::new()))?;
    let amount = Money::parse(&amount_text).ok_or(DropReason::BadAmount(amount_text))?;

    Ok(RawTransaction {
        external_id,
        trn_type: extractor.field(block, "TRNTYPE"),
        amount,
        posted,
        name: extractor.field(block, "NAME").unwrap_or_default(),
        memo: extractor.field(block, "MEMO"),
        check_number: extractor.field(block, "CHECKNUM"),
    })
}

/// Fraction of dropped records above which a file is rejected outright.
const MAX_DROPPED_FRACTION_PCT: usize = 20;

pub fn validate(stmt: &ParsedStatement) -> Result<(), ValidationError> {
    if stmt.account.account_number.is_empty() {
        return Err(ValidationError::MissingAccountId);
    }
    if stmt.transactions.is_empty() {
        return Err(ValidationError::NoTransactions);
    }
    let total = stmt.transactions.len() + stmt.dropped.len();
    if stmt.dropped.len() * 100 > total * MAX_DROPPED_FRACTION_PCT {
        return Err(ValidationError::TooManyDropped {
            dropped: stmt.dropped.len(),
            total,
        });
    }
    Ok(())
}
