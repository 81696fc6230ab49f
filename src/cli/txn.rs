use colored::Colorize;
use comfy_table::{Cell, Table};

use fin::error::Result;
use fin::fmt::money;
use fin::store::{ClassificationStore, SqliteStore};

use super::{open_db, parse_date};

pub fn add(description: &str, company: i64, period: i64, date: &str, amount: f64) -> Result<()> {
    let (_, conn) = open_db()?;
    let id = SqliteStore::new(&conn).insert_transaction(company, period, parse_date(date)?, description, amount)?;
    println!("Added transaction {id}: {description} {}", money(amount));
    Ok(())
}

pub fn list(company: i64, period: i64, unclassified: bool) -> Result<()> {
    let (_, conn) = open_db()?;
    let store = SqliteStore::new(&conn);
    let txns = if unclassified {
        store.load_unclassified_transactions(company, period)?
    } else {
        store.load_transactions(company, period)?
    };

    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Description", "Amount", "Account"]);
    for t in &txns {
        let account = match &t.account_code {
            Some(code) => code.clone(),
            None => "\u{2014}".yellow().to_string(),
        };
        table.add_row(vec![
            Cell::new(t.id),
            Cell::new(t.date),
            Cell::new(&t.description),
            Cell::new(money(t.amount)),
            Cell::new(account),
        ]);
    }
    println!("Transactions\n{table}");
    let open = txns.iter().filter(|t| !t.is_classified()).count();
    println!("{} transactions, {open} unclassified", txns.len());
    Ok(())
}
