use comfy_table::{Cell, Table};

use fin::audit::AuditLog;
use fin::error::Result;
use fin::store::SqliteStore;

use super::open_db;

pub fn run(transaction: i64) -> Result<()> {
    let (_, conn) = open_db()?;
    let store = SqliteStore::new(&conn);
    let audit = AuditLog::new(&store);

    let mut table = Table::new();
    table.set_header(vec!["When", "From", "To", "Reason", "By"]);
    let mut count = 0usize;
    for record in &audit.history(transaction) {
        let record = record?;
        table.add_row(vec![
            Cell::new(record.timestamp.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(record.previous_account_code.unwrap_or_default()),
            Cell::new(record.new_account_code),
            Cell::new(record.reason),
            Cell::new(record.actor),
        ]);
        count += 1;
    }
    if count == 0 {
        println!("No corrections recorded for transaction {transaction}.");
    } else {
        println!("Corrections for transaction {transaction}\n{table}");
    }
    Ok(())
}
