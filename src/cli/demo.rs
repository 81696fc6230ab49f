use chrono::{Datelike, Local, NaiveDate};

use fin::classifier::{CancelFlag, Classifier};
use fin::error::{FinError, Result};
use fin::models::ClassificationRule;
use fin::store::{ClassificationStore, SqliteStore};

use super::open_db;

const COMPANY_NAME: &str = "Demo Consulting Ltd";

struct DemoTxn {
    day: u32,
    description: &'static str,
    amount: f64,
}

/// One month of bank lines, repeated for each month of the demo year.
const MONTHLY: &[DemoTxn] = &[
    DemoTxn { day: 1, description: "OFFICE RENT MAIN ST", amount: -1800.00 },
    DemoTxn { day: 3, description: "STRIPE PAYOUT", amount: 9400.00 },
    DemoTxn { day: 5, description: "ADOBE CREATIVE CLOUD", amount: -54.99 },
    DemoTxn { day: 5, description: "GITHUB INC", amount: -21.00 },
    DemoTxn { day: 8, description: "AMAZON WEB SERVICES", amount: -189.00 },
    DemoTxn { day: 12, description: "UBER EATS ORDER", amount: -32.18 },
    DemoTxn { day: 25, description: "MONTHLY SALARY PAYMENT REF", amount: -4200.00 },
    DemoTxn { day: 25, description: "PAYROLL TAX REMITTANCE", amount: -980.00 },
    DemoTxn { day: 28, description: "BANK SERVICE CHARGE", amount: -12.50 },
    DemoTxn { day: 28, description: "INTEREST CREDIT", amount: 1.75 },
];

/// Lines no rule covers, left for review.
const ONE_OFFS: &[DemoTxn] = &[
    DemoTxn { day: 14, description: "STAPLES OFFICE SUPPLY", amount: -67.23 },
    DemoTxn { day: 19, description: "DELTA AIR 0062", amount: -412.80 },
    DemoTxn { day: 22, description: "KPMG ADVISORY INV 1187", amount: -950.00 },
];

// (pattern, keywords, account code, usage)
const RULES: &[(&str, &[&str], &str, u32)] = &[
    ("SALARY PAYMENT", &["SALARY", "PAYMENT"], "8100", 5),
    ("OFFICE RENT", &["RENT"], "6100", 3),
    ("STRIPE PAYOUT", &["STRIPE"], "4000", 8),
    ("ADOBE", &["ADOBE"], "6200", 2),
    ("GITHUB", &["GITHUB"], "6200", 2),
    ("AMAZON WEB SERVICES", &["AMAZON", "WEB", "SERVICES", "AWS"], "6300", 4),
    ("UBER EATS", &["UBER", "EATS"], "6600", 1),
    ("PAYROLL TAX", &["PAYROLL", "TAX"], "8200", 2),
    ("BANK CHARGE", &["BANK", "CHARGE"], "6800", 0),
    ("INTEREST", &["INTEREST"], "4100", 0),
];

fn seed(store: &SqliteStore, year: i32) -> Result<(i64, i64, usize)> {
    let company = store.create_company(COMPANY_NAME)?;
    let start = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(|| FinError::Other("bad demo year".into()))?;
    let end = NaiveDate::from_ymd_opt(year, 12, 31).ok_or_else(|| FinError::Other("bad demo year".into()))?;
    let period = store.create_fiscal_period(company, &format!("FY{year}"), start, end)?;

    let accounts = store.ledger_accounts()?;
    for (pattern, keywords, code, usage) in RULES {
        let name = accounts
            .iter()
            .find(|(c, _, _)| c.as_str() == *code)
            .map(|(_, n, _)| n.clone())
            .unwrap_or_default();
        let mut rule = ClassificationRule::new(pattern, *keywords, code, &name)?.with_usage_count(*usage);
        store.save_rule(company, &mut rule)?;
    }

    let mut count = 0;
    for month in 1..=12u32 {
        for t in MONTHLY {
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, t.day) {
                store.insert_transaction(company, period, date, t.description, t.amount)?;
                count += 1;
            }
        }
        let extra = &ONE_OFFS[(month as usize) % ONE_OFFS.len()];
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, extra.day) {
            store.insert_transaction(company, period, date, extra.description, extra.amount)?;
            count += 1;
        }
    }
    Ok((company, period, count))
}

pub fn run() -> Result<()> {
    let (settings, conn) = open_db()?;
    let exists: bool = conn
        .prepare("SELECT 1 FROM companies WHERE name = ?1")?
        .exists([COMPANY_NAME])?;
    if exists {
        return Err(FinError::Other(format!(
            "'{COMPANY_NAME}' already exists; demo data was loaded before"
        )));
    }

    let year = Local::now().year();
    let (company, period, count) = seed(&SqliteStore::new(&conn), year)?;

    let store = SqliteStore::new(&conn);
    let report = Classifier::new(&store, settings.classify_options()).auto_classify(
        company,
        period,
        settings.confidence_threshold,
        &CancelFlag::new(),
    )?;

    println!("Demo loaded: company {company}, fiscal period {period}");
    println!("  {count} transactions, {} rules", store.load_rules_for_company(company)?.len());
    println!(
        "  {} classified, {} left for review",
        report.classified(),
        report.skipped()
    );
    println!();
    println!("Next: fin review --company {company} --period {period}");
    Ok(())
}
