use std::cmp::Ordering;

use crate::error::{FinError, Result};
use crate::models::ClassificationSuggestion;

/// Confidence descending, then usage count descending, then pattern ascending.
pub fn compare_suggestions(a: &ClassificationSuggestion, b: &ClassificationSuggestion) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.matched_rule.usage_count.cmp(&a.matched_rule.usage_count))
        .then_with(|| a.matched_rule.pattern().cmp(b.matched_rule.pattern()))
}

pub fn rank(
    mut suggestions: Vec<ClassificationSuggestion>,
    max_results: usize,
) -> Result<Vec<ClassificationSuggestion>> {
    if max_results == 0 {
        return Err(FinError::invalid("max_results must be greater than zero"));
    }
    suggestions.sort_by(compare_suggestions);
    suggestions.truncate(max_results);
    Ok(suggestions)
}
