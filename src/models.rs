use chrono::{DateTime, NaiveDate, SubsecRound, Utc};

use crate::error::{FinError, Result};
use crate::matcher::normalize;

/// A learned mapping from a description pattern to a ledger account.
///
/// `pattern` and `keywords` are private: the pattern is validated once at
/// construction, and keywords are only ever handed out as owned copies so a
/// caller can't reach into a rule through its accessor.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationRule {
    pub id: Option<i64>,
    pattern: String,
    keywords: Vec<String>,
    pub account_code: String,
    pub account_name: String,
    pub usage_count: u32,
}

impl ClassificationRule {
    /// Build a rule. When `keywords` is empty (or all blank), they are
    /// derived from the words of the pattern.
    pub fn new<K: AsRef<str>>(
        pattern: &str,
        keywords: &[K],
        account_code: &str,
        account_name: &str,
    ) -> Result<Self> {
        let pattern = normalize(pattern);
        if pattern.is_empty() {
            return Err(FinError::invalid("rule pattern must not be empty"));
        }
        let account_code = account_code.trim();
        if account_code.is_empty() {
            return Err(FinError::invalid(format!(
                "rule '{pattern}' has no account code"
            )));
        }
        let keywords = clean_keywords(&pattern, keywords);
        Ok(Self {
            id: None,
            pattern,
            keywords,
            account_code: account_code.to_string(),
            account_name: account_name.trim().to_string(),
            usage_count: 0,
        })
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_usage_count(mut self, usage_count: u32) -> Self {
        self.usage_count = usage_count;
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// An independent copy of the keywords.
    pub fn keywords(&self) -> Vec<String> {
        self.keywords.clone()
    }

    pub fn set_keywords<K: AsRef<str>>(&mut self, keywords: &[K]) {
        self.keywords = clean_keywords(&self.pattern, keywords);
    }

    pub(crate) fn keyword_slice(&self) -> &[String] {
        &self.keywords
    }

    /// Point the rule at a different account (operator supersede).
    pub fn retarget(&mut self, account_code: &str, account_name: &str) {
        self.account_code = account_code.trim().to_string();
        self.account_name = account_name.trim().to_string();
    }

    pub fn record_use(&mut self) {
        self.usage_count = self.usage_count.saturating_add(1);
    }
}

fn clean_keywords<K: AsRef<str>>(pattern: &str, keywords: &[K]) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for kw in keywords {
        let kw = normalize(kw.as_ref());
        if !kw.is_empty() && !cleaned.contains(&kw) {
            cleaned.push(kw);
        }
    }
    if cleaned.is_empty() {
        for word in pattern.split(' ') {
            let word = word.to_string();
            if !cleaned.contains(&word) {
                cleaned.push(word);
            }
        }
    }
    cleaned
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: i64,
    pub company_id: i64,
    pub fiscal_period_id: i64,
    pub date: NaiveDate,
    pub description: String,
    pub amount: f64,
    pub account_code: Option<String>,
}

impl Transaction {
    pub fn is_classified(&self) -> bool {
        self.account_code.is_some()
    }

    pub fn state(&self) -> ClassificationState {
        if self.is_classified() {
            ClassificationState::Classified
        } else {
            ClassificationState::Unclassified
        }
    }
}

/// Lifecycle of a single transaction's classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationState {
    Unclassified,
    Suggested,
    Classified,
}

impl ClassificationState {
    pub fn can_transition_to(self, next: ClassificationState) -> bool {
        use ClassificationState::*;
        matches!(
            (self, next),
            (Unclassified, Suggested)
                | (Unclassified, Classified)
                | (Suggested, Classified)
                | (Suggested, Unclassified)
                | (Classified, Classified)
        )
    }

    pub fn transition(self, next: ClassificationState) -> Result<ClassificationState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(FinError::invalid(format!(
                "illegal classification transition {self:?} -> {next:?}"
            )))
        }
    }
}

/// A scored candidate account for one transaction. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationSuggestion {
    pub account_code: String,
    pub account_name: String,
    pub confidence: f64,
    pub matched_rule: ClassificationRule,
}

/// Audit entry written whenever a transaction's account changes.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionRecord {
    pub id: Option<i64>,
    pub transaction_id: i64,
    pub previous_account_code: Option<String>,
    pub new_account_code: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
}

impl CorrectionRecord {
    pub fn new(
        transaction_id: i64,
        previous_account_code: Option<String>,
        new_account_code: &str,
        reason: &str,
        actor: &str,
    ) -> Self {
        Self {
            id: None,
            transaction_id,
            previous_account_code,
            new_account_code: new_account_code.to_string(),
            reason: reason.to_string(),
            // stored with microsecond precision
            timestamp: Utc::now().trunc_subsecs(6),
            actor: actor.to_string(),
        }
    }
}
