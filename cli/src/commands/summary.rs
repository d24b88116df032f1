use anyhow::{Result, bail};
use chrono::Local;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use fitlog_core::analysis::estimate_daily_calories;
use fitlog_core::models::DailyCalories;
use fitlog_core::service::FitlogService;

use super::helpers::{no_neg_zero, parse_date, print_json, session};

pub(crate) fn cmd_summary(service: &FitlogService, date: Option<String>, json: bool) -> Result<()> {
    let session = session(service)?;
    let date = parse_date(date)?;
    let summary = service.get_daily_summary(&session, date)?;

    if json {
        return print_json(&summary);
    }

    let date = &summary.date;
    println!("=== {date} ===\n");

    if summary.meals.is_empty() {
        println!("  No meals logged\n");
    }
    for meal in &summary.meals {
        let meal_label = meal.meal_type.to_uppercase();
        let sub_cal = meal.subtotal_calories;
        println!("  {meal_label} ({sub_cal:.0} kcal)");
        for e in &meal.entries {
            println!(
                "    [{}] {} - {:.0} kcal | P:{:.0}g C:{:.0}g F:{:.0}g",
                e.id, e.food_name, e.calories, e.protein, e.carbs, e.fat
            );
        }
        println!();
    }

    let total_cal = no_neg_zero(summary.total_calories);
    let total_p = no_neg_zero(summary.total_protein);
    let total_c = no_neg_zero(summary.total_carbs);
    let total_f = no_neg_zero(summary.total_fat);
    println!("  TOTAL: {total_cal:.0} kcal | P:{total_p:.0}g C:{total_c:.0}g F:{total_f:.0}g");

    let user = service.current_user(&session)?;
    let target = estimate_daily_calories(&user.profile());
    println!("  TARGET: {target:.0} kcal");
    println!("  REMAINING: {:.0} kcal", target - total_cal);

    println!("  STEPS: {}", summary.steps);
    if let Some(kg) = summary.weight_kg {
        println!("  WEIGHT: {kg:.1} kg");
    }

    Ok(())
}

pub(crate) fn cmd_history(service: &FitlogService, days: u32, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct HistoryRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Calories")]
        calories: String,
    }

    if days == 0 {
        bail!("--days must be at least 1");
    }

    let session = session(service)?;
    let today = Local::now().date_naive();
    let from = today - chrono::Duration::days(i64::from(days) - 1);
    let totals = service.get_calorie_totals(&session, from, today)?;

    if json {
        return print_json(&totals);
    }

    if totals.is_empty() {
        eprintln!("No entries in the last {days} days");
        return Ok(());
    }

    let rows: Vec<HistoryRow> = totals
        .iter()
        .rev()
        .map(|t: &DailyCalories| HistoryRow {
            date: t.date.format("%Y-%m-%d").to_string(),
            calories: format!("{:.0}", no_neg_zero(t.calories)),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    #[allow(clippy::cast_precision_loss)]
    let average = totals.iter().map(|t| t.calories).sum::<f64>() / totals.len() as f64;
    println!("Average over {} logged days: {average:.0} kcal", totals.len());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitlog_core::models::{Gender, Goal, NewMealEntry, UserProfile};

    fn onboarded() -> FitlogService {
        let service = FitlogService::new_in_memory().unwrap();
        service
            .complete_onboarding(&UserProfile {
                goal: Goal::Maintain,
                sport_activity: "light".to_string(),
                height_cm: 168.0,
                weight_kg: 64.0,
                gender: Gender::Female,
            })
            .unwrap();
        service
    }

    #[test]
    fn test_summary_and_history_run() {
        let service = onboarded();
        let session = service.require_session().unwrap();
        service
            .log_meal(
                &session,
                &NewMealEntry {
                    food_id: None,
                    food_name: "Toast".to_string(),
                    calories: 240.0,
                    protein: 8.0,
                    carbs: 40.0,
                    fat: 4.0,
                    meal_type: "breakfast".to_string(),
                    date: Local::now().date_naive(),
                },
            )
            .unwrap();

        cmd_summary(&service, None, false).unwrap();
        cmd_summary(&service, Some("2020-01-01".to_string()), true).unwrap();
        cmd_history(&service, 7, false).unwrap();
    }

    #[test]
    fn test_history_rejects_zero_days() {
        let service = onboarded();
        assert!(cmd_history(&service, 0, true).is_err());
    }
}
