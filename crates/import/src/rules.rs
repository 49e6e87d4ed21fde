use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tally_core::AccountId;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("failed to parse rule file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Which transaction text a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchField {
    #[default]
    Name,
    Memo,
    Both,
}

impl MatchField {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchField::Name => "name",
            MatchField::Memo => "memo",
            MatchField::Both => "both",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<MatchField> {
        match s {
            "name" => Some(MatchField::Name),
            "memo" => Some(MatchField::Memo),
            "both" => Some(MatchField::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Exact,
    #[default]
    Contains,
    Regex,
}

impl PatternKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternKind::Exact => "exact",
            PatternKind::Contains => "contains",
            PatternKind::Regex => "regex",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<PatternKind> {
        match s {
            "exact" => Some(PatternKind::Exact),
            "contains" => Some(PatternKind::Contains),
            "regex" => Some(PatternKind::Regex),
            _ => None,
        }
    }
}

/// What a matching rule does to the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "account", rename_all = "lowercase")]
pub enum RuleTarget {
    Category(AccountId),
    Transfer(AccountId),
    Ignore,
}

impl RuleTarget {
    /// `(kind, account)` pair used by the store.
    pub fn encode(self) -> (&'static str, Option<i64>) {
        match self {
            RuleTarget::Category(id) => ("category", Some(id.0)),
            RuleTarget::Transfer(id) => ("transfer", Some(id.0)),
            RuleTarget::Ignore => ("ignore", None),
        }
    }

    pub fn decode(kind: &str, account: Option<i64>) -> Option<RuleTarget> {
        match (kind, account) {
            ("category", Some(id)) => Some(RuleTarget::Category(AccountId(id))),
            ("transfer", Some(id)) => Some(RuleTarget::Transfer(AccountId(id))),
            ("ignore", _) => Some(RuleTarget::Ignore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    pub priority: i32,
    pub pattern: String,
    #[serde(default)]
    pub pattern_kind: PatternKind,
    #[serde(default)]
    pub match_field: MatchField,
    pub target: RuleTarget,
    /// When set, the rule only applies to transactions of this bank
    /// account.
    #[serde(default)]
    pub account_scope: Option<AccountId>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// The rule engine's verdict for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Unmatched,
    Category(AccountId),
    Transfer(AccountId),
    Ignored,
}

impl Classification {
    pub fn is_unmatched(self) -> bool {
        matches!(self, Classification::Unmatched)
    }
}

/// The text fields a rule can look at; the caller supplies whatever
/// shape its transactions take.
#[derive(Debug, Clone)]
pub struct MatchInput<'a> {
    pub name: &'a str,
    pub memo: Option<&'a str>,
    pub account: Option<AccountId>,
}

struct CompiledRule {
    rule: CategoryRule,
    /// `None` for non-regex rules, and for regex patterns that failed to
    /// compile. A failed compile degrades the rule to case-insensitive
    /// substring matching: saved user patterns may rely on that fallback.
    compiled: Option<Regex>,
}

pub struct RuleEngine {
    rules: Vec<CompiledRule>,
}

impl RuleEngine {
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        let mut compiled: Vec<CompiledRule> = rules
            .into_iter()
            .map(|rule| {
                let compiled = if rule.pattern_kind == PatternKind::Regex {
                    RegexBuilder::new(&rule.pattern)
                        .case_insensitive(true)
                        .build()
                        .ok()
                } else {
                    None
                };
                CompiledRule { rule, compiled }
            })
            .collect();
        // Highest priority first; the sort is stable, so equal priorities
        // keep insertion order.
        compiled.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));
        Self { rules: compiled }
    }

    pub fn from_toml(content: &str) -> Result<Self, RuleError> {
        #[derive(Deserialize)]
        struct RuleFile {
            #[serde(default)]
            rules: Vec<CategoryRule>,
        }
        let file: RuleFile = toml::from_str(content)?;
        Ok(Self::new(file.rules))
    }

    /// Rules in evaluation order (highest priority first).
    pub fn rules(&self) -> impl Iterator<Item = &CategoryRule> {
        self.rules.iter().map(|cr| &cr.rule)
    }

    /// First active, in-scope rule wins; no further rules are evaluated.
    pub fn classify(&self, input: &MatchInput<'_>) -> Classification {
        self.rules
            .iter()
            .filter(|cr| cr.rule.is_active)
            .filter(|cr| match cr.rule.account_scope {
                Some(scope) => input.account == Some(scope),
                None => true,
            })
            .find(|cr| rule_matches(cr, input))
            .map(|cr| match cr.rule.target {
                RuleTarget::Category(id) => Classification::Category(id),
                RuleTarget::Transfer(id) => Classification::Transfer(id),
                RuleTarget::Ignore => Classification::Ignored,
            })
            .unwrap_or(Classification::Unmatched)
    }
}

fn rule_matches(cr: &CompiledRule, input: &MatchInput<'_>) -> bool {
    let text = match cr.rule.match_field {
        MatchField::Name => input.name.to_string(),
        MatchField::Memo => match input.memo {
            Some(memo) => memo.to_string(),
            None => return false,
        },
        MatchField::Both => match input.memo {
            Some(memo) => format!("{} {}", input.name, memo),
            None => input.name.to_string(),
        },
    };

    match cr.rule.pattern_kind {
        PatternKind::Exact => text.eq_ignore_ascii_case(&cr.rule.pattern),
        PatternKind::Contains => contains_ci(&text, &cr.rule.pattern),
        PatternKind::Regex => match &cr.compiled {
            Some(re) => re.is_match(&text),
            None => contains_ci(&text, &cr.rule.pattern),
        },
    }
}

fn contains_ci(text: &str, pattern: &str) -> bool {
    text.to_lowercase().contains(&pattern.to_lowercase())
}
