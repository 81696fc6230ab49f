use std::sync::OnceLock;

use regex::Regex;

use crate::models::{ClassificationRule, ClassificationSuggestion};
use crate::ranker::compare_suggestions;

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Case-fold, trim and collapse whitespace runs to a single space.
pub fn normalize(text: &str) -> String {
    whitespace()
        .replace_all(text.trim(), " ")
        .to_uppercase()
}

/// Scores how well a normalised description fits a rule, in `[0, 1]`.
pub trait Scorer {
    fn score(&self, description: &str, rule: &ClassificationRule) -> f64;
}

/// Fraction of the rule's keywords found as substrings of the description.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordOverlap;

impl Scorer for KeywordOverlap {
    fn score(&self, description: &str, rule: &ClassificationRule) -> f64 {
        let keywords = rule.keyword_slice();
        if keywords.is_empty() {
            return 0.0;
        }
        let hits = keywords
            .iter()
            .filter(|kw| description.contains(kw.as_str()))
            .count();
        hits as f64 / keywords.len() as f64
    }
}

/// A rule that could not be scored. Skipped, never fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct DataQualityWarning {
    pub rule_id: Option<i64>,
    pub pattern: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct MatchScan {
    pub suggestions: Vec<ClassificationSuggestion>,
    pub warnings: Vec<DataQualityWarning>,
}

pub struct Matcher {
    scorer: Box<dyn Scorer>,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(Box::new(KeywordOverlap))
    }
}

impl Matcher {
    pub fn new(scorer: Box<dyn Scorer>) -> Self {
        Self { scorer }
    }

    /// Score every rule against `description`. Non-matching rules are left
    /// out; the result is in ranking order.
    pub fn scan(&self, description: &str, rules: &[ClassificationRule]) -> MatchScan {
        let mut scan = MatchScan::default();
        let desc = normalize(description);
        if desc.is_empty() {
            return scan;
        }

        for rule in rules {
            // the whole pattern appearing in the description is a full match
            let confidence = if desc.contains(rule.pattern()) {
                1.0
            } else {
                self.scorer.score(&desc, rule)
            };

            if !confidence.is_finite() {
                let warning = DataQualityWarning {
                    rule_id: rule.id,
                    pattern: rule.pattern().to_string(),
                    message: format!("scorer returned {confidence}"),
                };
                log::warn!("skipping rule '{}': {}", warning.pattern, warning.message);
                scan.warnings.push(warning);
                continue;
            }

            let confidence = confidence.clamp(0.0, 1.0);
            if confidence > 0.0 {
                scan.suggestions.push(ClassificationSuggestion {
                    account_code: rule.account_code.clone(),
                    account_name: rule.account_name.clone(),
                    confidence,
                    matched_rule: rule.clone(),
                });
            }
        }

        scan.suggestions.sort_by(compare_suggestions);
        scan
    }

    pub fn find_candidates(
        &self,
        description: &str,
        rules: &[ClassificationRule],
    ) -> Vec<ClassificationSuggestion> {
        self.scan(description, rules).suggestions
    }
}

/// Candidates for `description` using keyword-overlap scoring.
pub fn find_candidates(
    description: &str,
    rules: &[ClassificationRule],
) -> Vec<ClassificationSuggestion> {
    Matcher::default().find_candidates(description, rules)
}
