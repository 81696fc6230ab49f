use colored::Colorize;
use comfy_table::{Cell, Table};

use fin::classifier::{BatchReport, CancelFlag, Classifier, ItemOutcome};
use fin::error::Result;
use fin::fmt::percent;
use fin::store::SqliteStore;

use super::open_db;

pub fn auto(company: i64, period: i64, threshold: Option<f64>) -> Result<()> {
    let (settings, conn) = open_db()?;
    let store = SqliteStore::new(&conn);
    let threshold = threshold.unwrap_or(settings.confidence_threshold);
    let report = Classifier::new(&store, settings.classify_options())
        .auto_classify(company, period, threshold, &CancelFlag::new())?;
    print_report(&report, false);
    Ok(())
}

pub fn reclassify(company: i64, period: i64, threshold: Option<f64>) -> Result<()> {
    let (settings, conn) = open_db()?;
    let store = SqliteStore::new(&conn);
    let report = Classifier::new(&store, settings.classify_options())
        .reclassify_all(company, period, threshold, &CancelFlag::new())?;
    print_report(&report, true);
    Ok(())
}

fn print_report(report: &BatchReport, show_previous: bool) {
    let needs_attention: Vec<_> = report
        .items
        .iter()
        .filter(|i| !i.outcome.is_classified() && i.outcome != ItemOutcome::AlreadyClassified)
        .collect();

    if !needs_attention.is_empty() {
        let mut table = Table::new();
        let mut header = vec!["ID", "Description", "Outcome", "Detail"];
        if show_previous {
            header.push("Was");
        }
        table.set_header(header);
        for item in needs_attention {
            let detail = match &item.outcome {
                ItemOutcome::LowConfidence { account_code, confidence } => {
                    format!("best {account_code} at {}", percent(*confidence))
                }
                ItemOutcome::Failed { error } => error.clone(),
                _ => String::new(),
            };
            let mut row = vec![
                Cell::new(item.transaction_id),
                Cell::new(&item.description),
                Cell::new(item.outcome.label()),
                Cell::new(detail),
            ];
            if show_previous {
                row.push(Cell::new(item.previous_account_code.clone().unwrap_or_default()));
            }
            table.add_row(row);
        }
        println!("Needs attention\n{table}");
    }

    println!(
        "{} classified, {} skipped, {} failed",
        report.classified().to_string().green(),
        report.skipped().to_string().yellow(),
        report.failed().to_string().red()
    );
    if report.cancelled {
        println!("{}", "Cancelled before all transactions were processed.".yellow());
    }
}
