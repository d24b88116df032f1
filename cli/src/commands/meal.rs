use anyhow::{Context, Result, bail};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use fitlog_core::models::{MealEntry, NewMealEntry};
use fitlog_core::service::FitlogService;

use super::helpers::{parse_date, print_json, session, truncate};

/// Arguments of `fitlog log`. Either `food_id` or `name` plus `calories`.
pub(crate) struct LogArgs {
    pub name: Option<String>,
    pub food_id: Option<i64>,
    pub meal: String,
    pub calories: Option<f64>,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub date: Option<String>,
}

pub(crate) fn cmd_log(service: &FitlogService, args: LogArgs, json: bool) -> Result<()> {
    let session = session(service)?;
    let date = parse_date(args.date)?;

    let entry = match (args.food_id, args.name) {
        (Some(food_id), None) => service.log_food(&session, food_id, &args.meal, date)?,
        (Some(_), Some(_)) => bail!("Pass either --food-id or a food name, not both"),
        (None, Some(name)) => {
            let calories = args
                .calories
                .context("--calories is required when logging by name")?;
            service.log_meal(
                &session,
                &NewMealEntry {
                    food_id: None,
                    food_name: name,
                    calories,
                    protein: args.protein,
                    carbs: args.carbs,
                    fat: args.fat,
                    meal_type: args.meal,
                    date,
                },
            )?
        }
        (None, None) => bail!("Nothing to log. Give a food name or --food-id"),
    };

    if json {
        print_json(&entry)?;
    } else {
        println!(
            "Logged {} for {} on {}: {:.0} kcal (entry {})",
            entry.food_name, entry.meal_type, entry.date, entry.calories, entry.id
        );
    }
    Ok(())
}

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Meal")]
    meal: String,
    #[tabled(rename = "Food")]
    food: String,
    #[tabled(rename = "kcal")]
    calories: String,
    #[tabled(rename = "P")]
    protein: String,
    #[tabled(rename = "C")]
    carbs: String,
    #[tabled(rename = "F")]
    fat: String,
}

fn entry_rows(entries: &[MealEntry]) -> Vec<EntryRow> {
    entries
        .iter()
        .map(|e| EntryRow {
            id: e.id,
            meal: e.meal_type.clone(),
            food: truncate(&e.food_name, 32),
            calories: format!("{:.0}", e.calories),
            protein: format!("{:.0}g", e.protein),
            carbs: format!("{:.0}g", e.carbs),
            fat: format!("{:.0}g", e.fat),
        })
        .collect()
}

pub(crate) fn cmd_today(service: &FitlogService, json: bool) -> Result<()> {
    let session = session(service)?;
    let entries = service.get_todays_meal_entries(&session)?;

    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        eprintln!("Nothing logged today. Use `fitlog log` to add a meal.");
        return Ok(());
    }

    let table = Table::new(entry_rows(&entries))
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    let total: f64 = entries.iter().map(|e| e.calories).sum();
    println!("Total: {total:.0} kcal");
    Ok(())
}

pub(crate) fn cmd_meal_delete(service: &FitlogService, entry_id: i64, json: bool) -> Result<()> {
    let session = session(service)?;
    if !service.delete_meal(&session, entry_id)? {
        bail!("Entry {entry_id} not found");
    }

    if json {
        print_json(&serde_json::json!({ "deleted": entry_id }))?;
    } else {
        println!("Deleted entry {entry_id}");
    }
    Ok(())
}
