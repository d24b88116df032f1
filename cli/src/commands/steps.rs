use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use fitlog_core::service::FitlogService;

use super::helpers::{parse_date, print_json, session};

pub(crate) fn cmd_steps_log(
    service: &FitlogService,
    steps: i64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let session = session(service)?;
    let date = parse_date(date)?;
    let entry = service.log_steps(&session, date, steps)?;

    if json {
        print_json(&entry)?;
    } else {
        let total = service.get_daily_summary(&session, date)?.steps;
        println!("Logged {steps} steps for {date} ({total} total)");
    }
    Ok(())
}

pub(crate) fn cmd_steps_history(
    service: &FitlogService,
    days: Option<u32>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct StepsRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Steps")]
        steps: i64,
    }

    let session = session(service)?;
    let entries = service.get_steps_history(&session, days.map(i64::from))?;

    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        eprintln!("No steps logged. Use `fitlog steps log` to add some.");
        return Ok(());
    }

    let rows: Vec<StepsRow> = entries
        .iter()
        .map(|e| StepsRow {
            id: e.id,
            date: e.date.format("%Y-%m-%d").to_string(),
            steps: e.steps,
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_steps_delete(service: &FitlogService, id: i64, json: bool) -> Result<()> {
    let session = session(service)?;
    service.delete_steps(&session, id)?;

    if json {
        print_json(&serde_json::json!({ "deleted": id }))?;
    } else {
        println!("Deleted steps entry {id}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitlog_core::models::{Gender, Goal, UserProfile};

    #[test]
    fn test_steps_log_history_delete() {
        let service = FitlogService::new_in_memory().unwrap();
        service
            .complete_onboarding(&UserProfile {
                goal: Goal::Maintain,
                sport_activity: "none".to_string(),
                height_cm: 170.0,
                weight_kg: 70.0,
                gender: Gender::Other,
            })
            .unwrap();

        cmd_steps_log(&service, 4000, None, false).unwrap();
        assert!(cmd_steps_log(&service, -1, None, true).is_err());
        cmd_steps_history(&service, Some(7), false).unwrap();

        let session = service.require_session().unwrap();
        let entries = service.get_steps_history(&session, None).unwrap();
        assert_eq!(entries.len(), 1);

        cmd_steps_delete(&service, entries[0].id, true).unwrap();
        assert!(cmd_steps_delete(&service, entries[0].id, true).is_err());
    }
}
