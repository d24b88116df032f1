use anyhow::Result;
use chrono::Local;
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use fitlog_core::db::Database;
use fitlog_core::migrate::{MigrationReport, RESET_ORDER, SCHEMA_VERSION};
use fitlog_core::service::FitlogService;

use super::helpers::{confirm, print_json};

fn print_report(report: &MigrationReport) {
    if report.version_before == report.version_after {
        println!("Schema up to date (version {})", report.version_after);
    } else {
        println!(
            "Schema migrated from version {} to {}",
            report.version_before, report.version_after
        );
    }
    for step in &report.applied {
        println!("  applied: {step}");
    }

    let backfilled = report.total_backfilled();
    if backfilled > 0 {
        println!("Assigned {backfilled} unowned rows to the current user");
    }
    let removed = report.total_orphans_removed();
    if removed > 0 {
        println!("Removed {removed} rows without an owner");
    }

    for failure in &report.failed {
        eprintln!("  warning: {} failed: {}", failure.step, failure.error);
    }
}

pub(crate) fn cmd_init(report: &MigrationReport, json: bool) -> Result<()> {
    if json {
        print_json(report)
    } else {
        print_report(report);
        Ok(())
    }
}

#[derive(Serialize, Tabled)]
struct TableStatus {
    #[tabled(rename = "Table")]
    table: &'static str,
    #[tabled(rename = "Rows")]
    rows: i64,
}

#[derive(Serialize)]
struct DbStatus {
    schema_version: i64,
    latest_version: i64,
    current_user: Option<String>,
    tables: Vec<TableStatus>,
}

pub(crate) fn cmd_db_status(service: &FitlogService, json: bool) -> Result<()> {
    let db = service.database();
    let mut tables = Vec::new();
    for table in RESET_ORDER.iter().rev().copied() {
        if db.table_exists(table)? {
            tables.push(TableStatus {
                table,
                rows: db.count_rows(table)?,
            });
        }
    }
    let status = DbStatus {
        schema_version: db.schema_version()?,
        latest_version: SCHEMA_VERSION,
        current_user: db.current_user()?.map(|u| u.user_id),
        tables,
    };

    if json {
        return print_json(&status);
    }

    println!(
        "Schema version: {} (latest {})",
        status.schema_version, status.latest_version
    );
    println!(
        "Current user:   {}",
        status.current_user.as_deref().unwrap_or("none")
    );
    let table = Table::new(&status.tables)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

/// Works on a connection that skipped init, so a broken schema can be reset.
pub(crate) fn cmd_db_reset(db: &Database, yes: bool, json: bool) -> Result<()> {
    confirm("Drop every table and delete all fitlog data?", yes)?;
    let report = db.reset()?;

    if json {
        print_json(&report)
    } else {
        println!("Database reset.");
        print_report(&report);
        Ok(())
    }
}

pub(crate) fn cmd_seed(service: &FitlogService, json: bool) -> Result<()> {
    let summary = service.seed_demo_data(Local::now().date_naive())?;

    if json {
        return print_json(&serde_json::json!({
            "user": summary.user,
            "days": summary.days,
            "meals": summary.meals,
            "weights": summary.weights,
            "steps": summary.steps,
        }));
    }

    println!(
        "Seeded {} days of demo data: {} meals, {} weigh-ins, {} step logs",
        summary.days, summary.meals, summary.weights, summary.steps
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_then_status() {
        let service = FitlogService::new_in_memory().unwrap();
        cmd_seed(&service, false).unwrap();
        assert!(service.has_user().unwrap());
        assert!(cmd_seed(&service, true).is_err());

        cmd_db_status(&service, false).unwrap();
        cmd_db_status(&service, true).unwrap();
    }

    #[test]
    fn test_reset_clears_seeded_data() {
        let service = FitlogService::new_in_memory().unwrap();
        service.seed_demo_data(Local::now().date_naive()).unwrap();

        cmd_db_reset(service.database(), true, true).unwrap();
        assert!(!service.has_user().unwrap());
        assert_eq!(service.database().count_rows("meal_entries").unwrap(), 0);
    }

    #[test]
    fn test_init_report_output() {
        let db = Database::open_in_memory().unwrap();
        let report = db.init().unwrap();
        assert!(report.is_clean());
        cmd_init(&report, false).unwrap();
        cmd_init(&report, true).unwrap();
    }
}
