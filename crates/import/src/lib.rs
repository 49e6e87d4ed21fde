pub mod ofx;
pub mod rules;
pub mod statement;
pub mod transfer;

pub use ofx::{parse, sniff_dialect, validate, Dialect, ParseError, ValidationError};
pub use rules::{
    CategoryRule, Classification, MatchField, MatchInput, PatternKind, RuleEngine, RuleError,
    RuleTarget,
};
pub use statement::{
    AccountIdentity, AccountKind, BalanceSnapshot, DropReason, DroppedRecord, ParsedStatement,
    RawTransaction,
};
pub use transfer::{Confidence, DetectedTransfer, TransferDetector, TransferLeg};
