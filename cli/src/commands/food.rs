use anyhow::{Result, bail};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use fitlog_core::models::{NewPersonalFood, PersonalFood};
use fitlog_core::service::FitlogService;

use super::helpers::{print_json, session, truncate};

#[derive(Tabled)]
struct FoodRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "kcal")]
    calories: String,
    #[tabled(rename = "Protein")]
    protein: String,
    #[tabled(rename = "Carbs")]
    carbs: String,
    #[tabled(rename = "Fat")]
    fat: String,
}

fn food_row(f: &PersonalFood) -> FoodRow {
    let mut name = truncate(&f.name, 32);
    if f.from_photo {
        name.push_str(" *");
    }
    FoodRow {
        id: f.id,
        name,
        category: f.category.clone(),
        calories: format!("{:.0}", f.calories),
        protein: format!("{:.1}g", f.protein),
        carbs: format!("{:.1}g", f.carbs),
        fat: format!("{:.1}g", f.fat),
    }
}

fn print_food_table(foods: &[PersonalFood]) {
    let rows: Vec<FoodRow> = foods.iter().map(food_row).collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn cmd_food_add(
    service: &FitlogService,
    food: NewPersonalFood,
    json: bool,
) -> Result<()> {
    let session = session(service)?;
    let saved = service.save_food(&session, &food)?;

    if json {
        print_json(&saved)?;
    } else {
        println!(
            "Saved food {}: {} ({:.0} kcal | P:{:.0}g C:{:.0}g F:{:.0}g)",
            saved.id, saved.name, saved.calories, saved.protein, saved.carbs, saved.fat
        );
    }
    Ok(())
}

pub(crate) fn cmd_food_list(
    service: &FitlogService,
    search: Option<&str>,
    json: bool,
) -> Result<()> {
    let session = session(service)?;
    let foods = service.list_foods(&session, search)?;

    if json {
        print_json(&foods)?;
    } else if foods.is_empty() {
        match search {
            Some(q) => eprintln!("No saved foods match '{q}'"),
            None => eprintln!("No saved foods yet. Use `fitlog food add` to create one."),
        }
    } else {
        print_food_table(&foods);
        if foods.iter().any(|f| f.from_photo) {
            println!("* estimated from a photo");
        }
    }
    Ok(())
}

pub(crate) fn cmd_food_delete(service: &FitlogService, id: i64, json: bool) -> Result<()> {
    let session = session(service)?;
    if !service.delete_food(&session, id)? {
        bail!("Food {id} not found");
    }

    if json {
        print_json(&serde_json::json!({ "deleted": id }))?;
    } else {
        println!("Deleted food {id}");
    }
    Ok(())
}
