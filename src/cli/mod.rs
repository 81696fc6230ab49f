pub mod assign;
pub mod classify;
pub mod demo;
pub mod history;
pub mod init;
pub mod review;
pub mod rules;
pub mod scope;
pub mod suggest;
pub mod txn;

use clap::{Parser, Subcommand};
use rusqlite::Connection;

use fin::db::{get_connection, init_db};
use fin::error::{FinError, Result};
use fin::settings::{load_settings, Settings};

/// Load settings and open (creating if needed) the database they point at.
pub(crate) fn open_db() -> Result<(Settings, Connection)> {
    let settings = load_settings();
    settings.validate()?;
    let conn = get_connection(&settings.db_path(), settings.busy_timeout())?;
    init_db(&conn)?;
    Ok((settings, conn))
}

pub(crate) fn parse_date(raw: &str) -> Result<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| FinError::invalid(format!("bad date '{raw}', expected YYYY-MM-DD")))
}

#[derive(Parser)]
#[command(name = "fin", about = "Rule-based bank transaction classification.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up fin: choose a data directory and initialize the database.
    Init {
        /// Path for fin data (default: ~/Documents/fin)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        /// Name written to the audit trail
        #[arg(long)]
        user: Option<String>,
    },
    /// Load a sample company, fiscal period, rules and transactions.
    Demo,
    /// Add a company.
    Company {
        name: String,
    },
    /// Manage fiscal periods.
    Period {
        #[command(subcommand)]
        command: PeriodCommands,
    },
    /// Manage bank transactions.
    Txn {
        #[command(subcommand)]
        command: TxnCommands,
    },
    /// Manage classification rules.
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
    /// Show ranked account suggestions for one transaction.
    Suggest {
        /// Transaction ID
        transaction: i64,
        /// Maximum number of suggestions (default from settings)
        #[arg(long)]
        max: Option<usize>,
    },
    /// Auto-classify unclassified transactions of a fiscal period.
    Classify {
        #[arg(long)]
        company: i64,
        #[arg(long)]
        period: i64,
        /// Minimum confidence, 0-1 (default from settings)
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Clear and re-run classification for a whole fiscal period.
    Reclassify {
        #[arg(long)]
        company: i64,
        #[arg(long)]
        period: i64,
        /// Minimum confidence, 0-1 (required)
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Classify one transaction by hand and learn a rule from it.
    Assign {
        /// Transaction ID
        transaction: i64,
        /// Ledger account code
        #[arg(long)]
        code: String,
        /// Ledger account name (default: chart of accounts)
        #[arg(long)]
        name: Option<String>,
        /// Pattern for the learned rule (default: first two words)
        #[arg(long)]
        pattern: Option<String>,
        /// Reason recorded when an existing account is replaced
        #[arg(long, default_value = "manual correction")]
        reason: String,
    },
    /// Interactively classify what auto-classification left behind.
    Review {
        #[arg(long)]
        company: i64,
        #[arg(long)]
        period: i64,
    },
    /// Show the correction history of a transaction.
    History {
        /// Transaction ID
        transaction: i64,
    },
}

#[derive(Subcommand)]
pub enum PeriodCommands {
    /// Add a fiscal period.
    Add {
        #[arg(long)]
        company: i64,
        /// Period name, e.g. 'FY2025'
        name: String,
        /// Start date: YYYY-MM-DD
        #[arg(long)]
        start: String,
        /// End date: YYYY-MM-DD
        #[arg(long)]
        end: String,
    },
    /// List fiscal periods of a company.
    List {
        #[arg(long)]
        company: i64,
    },
}

#[derive(Subcommand)]
pub enum TxnCommands {
    /// Add a bank transaction.
    Add {
        /// Bank description text
        description: String,
        #[arg(long)]
        company: i64,
        #[arg(long)]
        period: i64,
        /// Date: YYYY-MM-DD
        #[arg(long)]
        date: String,
        /// Signed amount (negative = money out)
        #[arg(long, allow_hyphen_values = true)]
        amount: f64,
    },
    /// List transactions of a fiscal period.
    List {
        #[arg(long)]
        company: i64,
        #[arg(long)]
        period: i64,
        /// Only transactions without an account
        #[arg(long)]
        unclassified: bool,
    },
}

#[derive(Subcommand)]
pub enum RulesCommands {
    /// Add or replace a classification rule.
    Add {
        /// Pattern to match against transaction descriptions
        pattern: String,
        #[arg(long)]
        company: i64,
        /// Ledger account code to assign
        #[arg(long)]
        code: String,
        /// Ledger account name (default: chart of accounts)
        #[arg(long)]
        name: Option<String>,
        /// Comma-separated keywords (default: words of the pattern)
        #[arg(long, value_delimiter = ',')]
        keywords: Vec<String>,
    },
    /// List classification rules of a company.
    List {
        #[arg(long)]
        company: i64,
    },
}
