use comfy_table::{Cell, Table};

use fin::classifier::Classifier;
use fin::error::{FinError, Result};
use fin::fmt::percent;
use fin::store::{ClassificationStore, SqliteStore};

use super::open_db;

pub fn run(transaction: i64, max: Option<usize>) -> Result<()> {
    let (settings, conn) = open_db()?;
    let store = SqliteStore::new(&conn);
    let txn = store
        .load_transaction(transaction)?
        .ok_or(FinError::UnknownTransaction(transaction))?;

    let mut options = settings.classify_options();
    if let Some(max) = max {
        options.max_suggestions = max;
    }
    let suggestions = Classifier::new(&store, options).suggest_for(transaction)?;

    println!("{} {}", txn.date, txn.description);
    if suggestions.is_empty() {
        println!("No matching rules.");
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["#", "Code", "Account", "Confidence", "Rule", "Uses"]);
    for (i, s) in suggestions.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(&s.account_code),
            Cell::new(&s.account_name),
            Cell::new(percent(s.confidence)),
            Cell::new(s.matched_rule.pattern()),
            Cell::new(s.matched_rule.usage_count),
        ]);
    }
    println!("Suggestions\n{table}");
    Ok(())
}
