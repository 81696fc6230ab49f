use colored::Colorize;
use comfy_table::{Cell, Table};
use dialoguer::Input;

use fin::classifier::Classifier;
use fin::error::Result;
use fin::fmt::{money, percent};
use fin::store::{ClassificationStore, RuleBook, SqliteStore};

use super::assign::suggested_pattern;
use super::open_db;

pub fn run(company: i64, period: i64) -> Result<()> {
    let (settings, conn) = open_db()?;
    let store = SqliteStore::new(&conn);
    let pending = store.load_unclassified_transactions(company, period)?;

    if pending.is_empty() {
        println!("{}", "No unclassified transactions to review.".green());
        return Ok(());
    }

    let accounts = store.ledger_accounts()?;
    let classifier = Classifier::new(&store, settings.classify_options());
    let mut book = RuleBook::load(&store, company)?;
    println!("\n{} transactions to review\n", pending.len());

    for txn in &pending {
        let suggestions = classifier.suggest(&txn.description, book.rules())?;

        println!("{}", "\u{2500}".repeat(60));
        println!("  Date:        {}", txn.date);
        println!("  Description: {}", txn.description);
        let amt_str = if txn.amount < 0.0 {
            money(txn.amount).red().to_string()
        } else {
            money(txn.amount).green().to_string()
        };
        println!("  Amount:      {amt_str}");
        println!();

        if !suggestions.is_empty() {
            let mut table = Table::new();
            table.set_header(vec!["#", "Code", "Account", "Confidence"]);
            for (i, s) in suggestions.iter().enumerate() {
                table.add_row(vec![
                    Cell::new(i + 1),
                    Cell::new(&s.account_code),
                    Cell::new(&s.account_name),
                    Cell::new(percent(s.confidence)),
                ]);
            }
            println!("Suggestions\n{table}\n");
        }

        let choice: String = Input::new()
            .with_prompt("Suggestion #, account code, s=skip, q=quit")
            .interact_text()
            .unwrap_or_else(|_| "s".to_string());
        let choice = choice.trim().to_string();

        if choice.eq_ignore_ascii_case("q") {
            println!("{}", "Review paused.".yellow());
            return Ok(());
        }
        if choice.eq_ignore_ascii_case("s") || choice.is_empty() {
            continue;
        }

        let picked = choice
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= 1 && *n <= suggestions.len())
            .map(|n| &suggestions[n - 1]);

        let (code, name, pattern) = match picked {
            Some(s) => (
                s.account_code.clone(),
                s.account_name.clone(),
                s.matched_rule.pattern().to_string(),
            ),
            None => {
                let Some((code, name, _)) = accounts.iter().find(|(code, _, _)| *code == choice) else {
                    println!("{}", "Unknown account code, skipping.".red());
                    continue;
                };
                let pattern: String = Input::new()
                    .with_prompt("Rule pattern")
                    .default(suggested_pattern(&txn.description))
                    .interact_text()
                    .unwrap_or_default();
                (code.clone(), name.clone(), pattern)
            }
        };

        match classifier.record_manual_classification(txn.id, &code, &name, &pattern, "review") {
            Ok(outcome) => {
                println!("{}", format!("\u{2192} Classified as {code} {name}").green());
                // later transactions in this session see the learned rule
                book.upsert(outcome.rule);
            }
            Err(e) => println!("{}", format!("Not saved: {e}").red()),
        }
        println!();
    }

    println!("{}", "Review complete!".green());
    Ok(())
}
