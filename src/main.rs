mod cli;

use clap::Parser;

use cli::{Cli, Commands, PeriodCommands, RulesCommands, TxnCommands};

fn main() {
    fin::logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { data_dir, user } => cli::init::run(data_dir, user),
        Commands::Demo => cli::demo::run(),
        Commands::Company { name } => cli::scope::add_company(&name),
        Commands::Period { command } => match command {
            PeriodCommands::Add {
                company,
                name,
                start,
                end,
            } => cli::scope::add_period(company, &name, &start, &end),
            PeriodCommands::List { company } => cli::scope::list_periods(company),
        },
        Commands::Txn { command } => match command {
            TxnCommands::Add {
                description,
                company,
                period,
                date,
                amount,
            } => cli::txn::add(&description, company, period, &date, amount),
            TxnCommands::List {
                company,
                period,
                unclassified,
            } => cli::txn::list(company, period, unclassified),
        },
        Commands::Rules { command } => match command {
            RulesCommands::Add {
                pattern,
                company,
                code,
                name,
                keywords,
            } => cli::rules::add(&pattern, company, &code, name.as_deref(), &keywords),
            RulesCommands::List { company } => cli::rules::list(company),
        },
        Commands::Suggest { transaction, max } => cli::suggest::run(transaction, max),
        Commands::Classify {
            company,
            period,
            threshold,
        } => cli::classify::auto(company, period, threshold),
        Commands::Reclassify {
            company,
            period,
            threshold,
        } => cli::classify::reclassify(company, period, threshold),
        Commands::Assign {
            transaction,
            code,
            name,
            pattern,
            reason,
        } => cli::assign::run(transaction, &code, name.as_deref(), pattern.as_deref(), &reason),
        Commands::Review { company, period } => cli::review::run(company, period),
        Commands::History { transaction } => cli::history::run(transaction),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
