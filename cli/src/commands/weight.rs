use anyhow::{Result, bail};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use fitlog_core::models::NewWeightEntry;
use fitlog_core::service::FitlogService;

use super::helpers::{no_neg_zero, parse_date, print_json, session};

const LBS_PER_KG: f64 = 2.20462;
const KG_PER_LB: f64 = 0.453_592;

fn to_kg(value: f64, unit: &str) -> Result<f64> {
    if value <= 0.0 {
        bail!("Weight must be greater than 0");
    }
    match unit.to_lowercase().as_str() {
        "kg" => Ok(value),
        "lbs" | "lb" => Ok(no_neg_zero(value * KG_PER_LB)),
        _ => bail!("Invalid unit '{unit}'. Use 'kg' or 'lbs'"),
    }
}

pub(crate) fn cmd_weight_log(
    service: &FitlogService,
    value: f64,
    unit: &str,
    date: Option<String>,
    note: Option<String>,
    json: bool,
) -> Result<()> {
    let session = session(service)?;
    let weight_kg = to_kg(value, unit)?;
    if !unit.eq_ignore_ascii_case("kg") {
        eprintln!("Converting {value:.1} lbs to {weight_kg:.2} kg");
    }

    let entry = service.log_weight(
        &session,
        &NewWeightEntry {
            weight_kg,
            image_uri: None,
            note,
            date: parse_date(date)?,
        },
    )?;

    if json {
        print_json(&entry)?;
    } else {
        println!(
            "Logged {:.1} kg ({:.1} lbs) for {}",
            entry.weight_kg,
            entry.weight_kg * LBS_PER_KG,
            entry.date.format("%Y-%m-%d")
        );
        if let Some(ref n) = entry.note {
            println!("  Note: {n}");
        }
    }
    Ok(())
}

pub(crate) fn cmd_weight_history(
    service: &FitlogService,
    days: Option<u32>,
    json: bool,
) -> Result<()> {
    let session = session(service)?;
    let entries = service.get_weight_history(&session, days.map(i64::from))?;

    if json {
        print_json(&entries)?;
    } else if entries.is_empty() {
        eprintln!("No weight entries found. Use `fitlog weight log` to record your weight.");
    } else {
        #[derive(Tabled)]
        struct WeightRow {
            #[tabled(rename = "ID")]
            id: i64,
            #[tabled(rename = "Date")]
            date: String,
            #[tabled(rename = "Weight (kg)")]
            kg: String,
            #[tabled(rename = "Weight (lbs)")]
            lbs: String,
            #[tabled(rename = "Note")]
            note: String,
        }

        let rows: Vec<WeightRow> = entries
            .iter()
            .map(|e| WeightRow {
                id: e.id,
                date: e.date.format("%Y-%m-%d").to_string(),
                kg: format!("{:.1}", e.weight_kg),
                lbs: format!("{:.1}", e.weight_kg * LBS_PER_KG),
                note: e.note.clone().unwrap_or_default(),
            })
            .collect();

        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(2..4)).with(Alignment::right()))
            .to_string();
        println!("{table}");
    }
    Ok(())
}

pub(crate) fn cmd_weight_delete(service: &FitlogService, id: i64, json: bool) -> Result<()> {
    let session = session(service)?;
    service.delete_weight(&session, id)?;

    if json {
        print_json(&serde_json::json!({ "deleted": id }))?;
    } else {
        println!("Deleted weight entry {id}");
    }
    Ok(())
}
