use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::error::{FinError, Result};
use crate::models::{ClassificationRule, CorrectionRecord, Transaction};

/// Persistence collaborator used by the classifier and the audit log.
pub trait ClassificationStore {
    fn load_rules_for_company(&self, company_id: i64) -> Result<Vec<ClassificationRule>>;
    fn find_rule_by_pattern(&self, company_id: i64, pattern: &str) -> Result<Option<ClassificationRule>>;
    /// Insert or update, keyed by `(company_id, pattern)`. Sets `rule.id` on insert.
    fn save_rule(&self, company_id: i64, rule: &mut ClassificationRule) -> Result<()>;
    fn increment_rule_usage(&self, rule_id: i64) -> Result<()>;

    fn load_unclassified_transactions(&self, company_id: i64, fiscal_period_id: i64) -> Result<Vec<Transaction>>;
    fn load_transactions(&self, company_id: i64, fiscal_period_id: i64) -> Result<Vec<Transaction>>;
    fn load_transaction(&self, transaction_id: i64) -> Result<Option<Transaction>>;
    fn update_transaction_account(&self, transaction_id: i64, account_code: Option<&str>) -> Result<()>;

    fn append_correction(&self, record: &CorrectionRecord) -> Result<i64>;
    /// Oldest first.
    fn load_corrections(&self, transaction_id: i64) -> Result<Vec<CorrectionRecord>>;
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

type RuleRow = (i64, String, String, String, String, i64);
type TxnRow = (i64, i64, i64, String, String, f64, Option<String>);

const RULE_COLUMNS: &str = "id, pattern, keywords, account_code, account_name, usage_count";
const TXN_COLUMNS: &str = "id, company_id, fiscal_period_id, date, description, amount, account_code";

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn conn(&self) -> &Connection {
        self.conn
    }

    pub fn create_company(&self, name: &str) -> Result<i64> {
        self.conn.execute("INSERT INTO companies (name) VALUES (?1)", [name])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn create_fiscal_period(
        &self,
        company_id: i64,
        name: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<i64> {
        if end < start {
            return Err(FinError::invalid(format!(
                "fiscal period '{name}' ends before it starts"
            )));
        }
        self.conn.execute(
            "INSERT INTO fiscal_periods (company_id, name, start_date, end_date) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![company_id, name, start.to_string(), end.to_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_transaction(
        &self,
        company_id: i64,
        fiscal_period_id: i64,
        date: NaiveDate,
        description: &str,
        amount: f64,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO transactions (company_id, fiscal_period_id, date, description, amount) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![company_id, fiscal_period_id, date.to_string(), description, amount],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Chart of accounts as (code, name, type).
    pub fn ledger_accounts(&self) -> Result<Vec<(String, String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT code, name, account_type FROM ledger_accounts ORDER BY code")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn ledger_account_name(&self, code: &str) -> Result<Option<String>> {
        let name = self
            .conn
            .query_row("SELECT name FROM ledger_accounts WHERE code = ?1", [code], |r| r.get(0))
            .optional()?;
        Ok(name)
    }

    /// Rows that fail to decode are logged and left out, so one bad row
    /// cannot hold up a whole batch.
    fn query_transactions(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Transaction>> {
        let rows = self.query_transaction_rows(sql, params)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match transaction_from_row(row) {
                Ok(txn) => Some(txn),
                Err(e) => {
                    log::warn!("{e}, skipped");
                    None
                }
            })
            .collect())
    }

    fn query_transaction_rows(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<TxnRow>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows: Vec<TxnRow> = stmt
            .query_map(params, |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn transaction_from_row(row: TxnRow) -> Result<Transaction> {
    let (id, company_id, fiscal_period_id, date, description, amount, account_code) = row;
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| {
        FinError::PersistenceFailure(format!("transaction {id} has bad date '{date}': {e}"))
    })?;
    Ok(Transaction {
        id,
        company_id,
        fiscal_period_id,
        date,
        description,
        amount,
        account_code,
    })
}

/// Validate a stored rule row. Malformed rows are logged and dropped.
fn rule_from_row(row: RuleRow) -> Option<ClassificationRule> {
    let (id, pattern, keywords, account_code, account_name, usage_count) = row;
    let keywords: Vec<String> = match serde_json::from_str(&keywords) {
        Ok(k) => k,
        Err(e) => {
            log::warn!("rule {id} '{pattern}': unreadable keywords ({e}), skipped");
            return None;
        }
    };
    let usage_count = match u32::try_from(usage_count) {
        Ok(n) => n,
        Err(_) => {
            log::warn!("rule {id} '{pattern}': usage count {usage_count} out of range, skipped");
            return None;
        }
    };
    match ClassificationRule::new(&pattern, keywords.as_slice(), &account_code, &account_name) {
        Ok(rule) => Some(rule.with_id(id).with_usage_count(usage_count)),
        Err(e) => {
            log::warn!("rule {id}: {e}, skipped");
            None
        }
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FinError::PersistenceFailure(format!("bad correction timestamp '{raw}': {e}")))
}

impl ClassificationStore for SqliteStore<'_> {
    fn load_rules_for_company(&self, company_id: i64) -> Result<Vec<ClassificationRule>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RULE_COLUMNS} FROM classification_rules WHERE company_id = ?1 ORDER BY id"
        ))?;
        let rows: Vec<RuleRow> = stmt
            .query_map([company_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().filter_map(rule_from_row).collect())
    }

    fn find_rule_by_pattern(&self, company_id: i64, pattern: &str) -> Result<Option<ClassificationRule>> {
        let pattern = crate::matcher::normalize(pattern);
        let row: Option<RuleRow> = self
            .conn
            .query_row(
                &format!(
                    "SELECT {RULE_COLUMNS} FROM classification_rules WHERE company_id = ?1 AND pattern = ?2"
                ),
                rusqlite::params![company_id, pattern],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.and_then(rule_from_row))
    }

    fn save_rule(&self, company_id: i64, rule: &mut ClassificationRule) -> Result<()> {
        let keywords = serde_json::to_string(&rule.keywords())?;
        match rule.id {
            Some(id) => {
                let changed = self.conn.execute(
                    "UPDATE classification_rules SET pattern = ?1, keywords = ?2, account_code = ?3, \
                     account_name = ?4, usage_count = ?5, updated_at = datetime('now') WHERE id = ?6",
                    rusqlite::params![
                        rule.pattern(),
                        keywords,
                        rule.account_code,
                        rule.account_name,
                        rule.usage_count,
                        id
                    ],
                )?;
                if changed == 0 {
                    return Err(FinError::PersistenceFailure(format!("no rule with id {id}")));
                }
            }
            None => {
                let id: i64 = self.conn.query_row(
                    "INSERT INTO classification_rules \
                     (company_id, pattern, keywords, account_code, account_name, usage_count) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                     ON CONFLICT (company_id, pattern) DO UPDATE SET \
                     keywords = excluded.keywords, account_code = excluded.account_code, \
                     account_name = excluded.account_name, usage_count = excluded.usage_count, \
                     updated_at = datetime('now') \
                     RETURNING id",
                    rusqlite::params![
                        company_id,
                        rule.pattern(),
                        keywords,
                        rule.account_code,
                        rule.account_name,
                        rule.usage_count
                    ],
                    |r| r.get(0),
                )?;
                rule.id = Some(id);
            }
        }
        Ok(())
    }

    fn increment_rule_usage(&self, rule_id: i64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE classification_rules SET usage_count = usage_count + 1, updated_at = datetime('now') \
             WHERE id = ?1",
            [rule_id],
        )?;
        if changed == 0 {
            return Err(FinError::PersistenceFailure(format!("no rule with id {rule_id}")));
        }
        Ok(())
    }

    fn load_unclassified_transactions(&self, company_id: i64, fiscal_period_id: i64) -> Result<Vec<Transaction>> {
        self.query_transactions(
            &format!(
                "SELECT {TXN_COLUMNS} FROM transactions \
                 WHERE company_id = ?1 AND fiscal_period_id = ?2 AND account_code IS NULL \
                 ORDER BY date, id"
            ),
            rusqlite::params![company_id, fiscal_period_id],
        )
    }

    fn load_transactions(&self, company_id: i64, fiscal_period_id: i64) -> Result<Vec<Transaction>> {
        self.query_transactions(
            &format!(
                "SELECT {TXN_COLUMNS} FROM transactions \
                 WHERE company_id = ?1 AND fiscal_period_id = ?2 ORDER BY date, id"
            ),
            rusqlite::params![company_id, fiscal_period_id],
        )
    }

    fn load_transaction(&self, transaction_id: i64) -> Result<Option<Transaction>> {
        let mut found = self.query_transaction_rows(
            &format!("SELECT {TXN_COLUMNS} FROM transactions WHERE id = ?1"),
            [transaction_id],
        )?;
        found.pop().map(transaction_from_row).transpose()
    }

    fn update_transaction_account(&self, transaction_id: i64, account_code: Option<&str>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE transactions SET account_code = ?1 WHERE id = ?2",
            rusqlite::params![account_code, transaction_id],
        )?;
        if changed == 0 {
            return Err(FinError::UnknownTransaction(transaction_id));
        }
        Ok(())
    }

    fn append_correction(&self, record: &CorrectionRecord) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO corrections \
             (transaction_id, previous_account_code, new_account_code, reason, timestamp, actor) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                record.transaction_id,
                record.previous_account_code,
                record.new_account_code,
                record.reason,
                format_timestamp(&record.timestamp),
                record.actor
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn load_corrections(&self, transaction_id: i64) -> Result<Vec<CorrectionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, transaction_id, previous_account_code, new_account_code, reason, timestamp, actor \
             FROM corrections WHERE transaction_id = ?1 ORDER BY timestamp, id",
        )?;
        let rows: Vec<(i64, i64, Option<String>, String, String, String, String)> = stmt
            .query_map([transaction_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, transaction_id, previous, new, reason, ts, actor)| {
                Ok(CorrectionRecord {
                    id: Some(id),
                    transaction_id,
                    previous_account_code: previous,
                    new_account_code: new,
                    reason,
                    timestamp: parse_timestamp(&ts)?,
                    actor,
                })
            })
            .collect()
    }
}

/// Snapshot of one company's rules, loaded once per batch and dropped
/// afterwards. `version` moves on every local change.
#[derive(Debug, Clone)]
pub struct RuleBook {
    company_id: i64,
    rules: Vec<ClassificationRule>,
    version: u64,
}

impl RuleBook {
    pub fn load<S: ClassificationStore + ?Sized>(store: &S, company_id: i64) -> Result<Self> {
        let rules = store.load_rules_for_company(company_id)?;
        log::debug!("loaded {} rules for company {company_id}", rules.len());
        Ok(Self::from_rules(company_id, rules))
    }

    pub fn from_rules(company_id: i64, rules: Vec<ClassificationRule>) -> Self {
        Self {
            company_id,
            rules,
            version: 0,
        }
    }

    pub fn company_id(&self) -> i64 {
        self.company_id
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn find(&self, pattern: &str) -> Option<&ClassificationRule> {
        let pattern = crate::matcher::normalize(pattern);
        self.rules.iter().find(|r| r.pattern() == pattern)
    }

    /// Bump the usage count of the rule with `pattern`.
    pub fn record_use(&mut self, pattern: &str) {
        if let Some(rule) = self.rules.iter_mut().find(|r| r.pattern() == pattern) {
            rule.record_use();
            self.version += 1;
        }
    }

    pub fn upsert(&mut self, rule: ClassificationRule) {
        match self.rules.iter_mut().find(|r| r.pattern() == rule.pattern()) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
        self.version += 1;
    }
}
