use colored::Colorize;

use fin::classifier::Classifier;
use fin::error::{FinError, Result};
use fin::store::{ClassificationStore, SqliteStore};

use super::open_db;
use super::rules::account_name;

/// First two words of a description, the default pattern for a learned rule.
pub(crate) fn suggested_pattern(description: &str) -> String {
    description
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn run(transaction: i64, code: &str, name: Option<&str>, pattern: Option<&str>, reason: &str) -> Result<()> {
    let (settings, conn) = open_db()?;
    let store = SqliteStore::new(&conn);
    let txn = store
        .load_transaction(transaction)?
        .ok_or(FinError::UnknownTransaction(transaction))?;
    let name = account_name(&store, code, name)?;
    let pattern = pattern
        .map(str::to_string)
        .unwrap_or_else(|| suggested_pattern(&txn.description));

    let outcome = Classifier::new(&store, settings.classify_options())
        .record_manual_classification(transaction, code, &name, &pattern, reason)?;

    println!("{}", format!("\u{2192} {} classified as {code} {name}", txn.description).green());
    println!(
        "  Rule '{}' {} (used {} times)",
        outcome.rule.pattern(),
        if outcome.rule_created { "created" } else { "updated" },
        outcome.rule.usage_count
    );
    if let Some(c) = outcome.correction {
        println!(
            "  Correction recorded: {} \u{2192} {}",
            c.previous_account_code.unwrap_or_default(),
            c.new_account_code
        );
    }
    Ok(())
}
