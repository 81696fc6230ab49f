use comfy_table::{Cell, Table};

use fin::error::Result;
use fin::store::SqliteStore;

use super::{open_db, parse_date};

pub fn add_company(name: &str) -> Result<()> {
    let (_, conn) = open_db()?;
    let id = SqliteStore::new(&conn).create_company(name)?;
    println!("Added company {id}: {name}");
    Ok(())
}

pub fn add_period(company: i64, name: &str, start: &str, end: &str) -> Result<()> {
    let (_, conn) = open_db()?;
    let id = SqliteStore::new(&conn).create_fiscal_period(company, name, parse_date(start)?, parse_date(end)?)?;
    println!("Added fiscal period {id}: {name} ({start} \u{2192} {end})");
    Ok(())
}

pub fn list_periods(company: i64) -> Result<()> {
    let (_, conn) = open_db()?;
    let mut stmt = conn.prepare(
        "SELECT id, name, start_date, end_date FROM fiscal_periods WHERE company_id = ?1 ORDER BY start_date",
    )?;
    let rows: Vec<(i64, String, String, String)> = stmt
        .query_map([company], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Start", "End"]);
    for (id, name, start, end) in rows {
        table.add_row(vec![Cell::new(id), Cell::new(name), Cell::new(start), Cell::new(end)]);
    }
    println!("Fiscal periods\n{table}");
    Ok(())
}
