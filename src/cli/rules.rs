use comfy_table::{Cell, Table};

use fin::error::{FinError, Result};
use fin::models::ClassificationRule;
use fin::store::{ClassificationStore, SqliteStore};

use super::open_db;

/// Resolve an account name, falling back to the chart of accounts.
pub(crate) fn account_name(store: &SqliteStore, code: &str, name: Option<&str>) -> Result<String> {
    if let Some(name) = name {
        return Ok(name.to_string());
    }
    store
        .ledger_account_name(code)?
        .ok_or_else(|| FinError::invalid(format!("unknown account code {code}; pass --name")))
}

pub fn add(pattern: &str, company: i64, code: &str, name: Option<&str>, keywords: &[String]) -> Result<()> {
    let (_, conn) = open_db()?;
    let store = SqliteStore::new(&conn);
    let name = account_name(&store, code, name)?;

    let mut rule = ClassificationRule::new(pattern, keywords, code, &name)?;
    // An explicit add supersedes whatever the rule pointed at, keeping its history.
    if let Some(existing) = store.find_rule_by_pattern(company, rule.pattern())? {
        rule = rule.with_usage_count(existing.usage_count);
        if let Some(id) = existing.id {
            rule = rule.with_id(id);
        }
    }
    store.save_rule(company, &mut rule)?;
    println!(
        "Saved rule: '{}' [{}] \u{2192} {} {}",
        rule.pattern(),
        rule.keywords().join(", "),
        rule.account_code,
        rule.account_name
    );
    Ok(())
}

pub fn list(company: i64) -> Result<()> {
    let (_, conn) = open_db()?;
    let mut rules = SqliteStore::new(&conn).load_rules_for_company(company)?;
    rules.sort_by(|a, b| b.usage_count.cmp(&a.usage_count).then_with(|| a.pattern().cmp(b.pattern())));

    let mut table = Table::new();
    table.set_header(vec!["ID", "Pattern", "Keywords", "Code", "Account", "Uses"]);
    for rule in &rules {
        table.add_row(vec![
            Cell::new(rule.id.map(|id| id.to_string()).unwrap_or_default()),
            Cell::new(rule.pattern()),
            Cell::new(rule.keywords().join(", ")),
            Cell::new(&rule.account_code),
            Cell::new(&rule.account_name),
            Cell::new(rule.usage_count),
        ]);
    }
    println!("Rules\n{table}");
    Ok(())
}
