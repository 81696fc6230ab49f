use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS companies (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS fiscal_periods (
    id INTEGER PRIMARY KEY,
    company_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    FOREIGN KEY (company_id) REFERENCES companies(id)
);

CREATE TABLE IF NOT EXISTS ledger_accounts (
    code TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    account_type TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    company_id INTEGER NOT NULL,
    fiscal_period_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    description TEXT NOT NULL,
    amount REAL NOT NULL,
    account_code TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (company_id) REFERENCES companies(id),
    FOREIGN KEY (fiscal_period_id) REFERENCES fiscal_periods(id)
);

CREATE TABLE IF NOT EXISTS classification_rules (
    id INTEGER PRIMARY KEY,
    company_id INTEGER NOT NULL,
    pattern TEXT NOT NULL,
    keywords TEXT NOT NULL DEFAULT '[]',
    account_code TEXT NOT NULL,
    account_name TEXT NOT NULL,
    usage_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now')),
    UNIQUE (company_id, pattern),
    FOREIGN KEY (company_id) REFERENCES companies(id)
);

CREATE TABLE IF NOT EXISTS corrections (
    id INTEGER PRIMARY KEY,
    transaction_id INTEGER NOT NULL,
    previous_account_code TEXT,
    new_account_code TEXT NOT NULL,
    reason TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    actor TEXT NOT NULL,
    FOREIGN KEY (transaction_id) REFERENCES transactions(id)
);

CREATE INDEX IF NOT EXISTS idx_transactions_scope
    ON transactions (company_id, fiscal_period_id);
CREATE INDEX IF NOT EXISTS idx_corrections_txn
    ON corrections (transaction_id, timestamp);
";

// (code, name, account_type)
const DEFAULT_ACCOUNTS: &[(&str, &str, &str)] = &[
    ("1000", "Cash", "asset"),
    ("1200", "Accounts Receivable", "asset"),
    ("1500", "Equipment", "asset"),
    ("2000", "Accounts Payable", "liability"),
    ("2100", "Loans", "liability"),
    ("2200", "VAT Payable", "liability"),
    ("3000", "Owner's Equity", "equity"),
    ("3100", "Owner Draw", "equity"),
    ("4000", "Sales Revenue", "income"),
    ("4100", "Interest Income", "income"),
    ("4900", "Other Income", "income"),
    ("6100", "Rent", "expense"),
    ("6200", "Software & Subscriptions", "expense"),
    ("6300", "Hosting & Infrastructure", "expense"),
    ("6400", "Office Supplies", "expense"),
    ("6500", "Travel", "expense"),
    ("6600", "Meals", "expense"),
    ("6700", "Utilities", "expense"),
    ("6800", "Bank Charges", "expense"),
    ("6900", "Insurance", "expense"),
    ("7000", "Professional Fees", "expense"),
    ("8100", "Employee Costs", "expense"),
    ("8200", "Payroll Taxes", "expense"),
    ("8500", "Depreciation", "expense"),
    ("9999", "Suspense", "expense"),
];

pub fn get_connection(db_path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let count: i64 = conn.query_row("SELECT count(*) FROM ledger_accounts", [], |row| row.get(0))?;
    if count == 0 {
        for (code, name, account_type) in DEFAULT_ACCOUNTS {
            conn.execute(
                "INSERT INTO ledger_accounts (code, name, account_type) VALUES (?1, ?2, ?3)",
                rusqlite::params![code, name, account_type],
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_db() -> (tempfile::TempDir, Connection) {
    let dir = tempfile::tempdir().unwrap();
    let conn = get_connection(&dir.path().join("test.db"), Duration::from_millis(500)).unwrap();
    init_db(&conn).unwrap();
    (dir, conn)
}
