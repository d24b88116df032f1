use anyhow::{Result, bail};
use chrono::{Days, NaiveDate};
use rand::Rng;
use rand::seq::IndexedRandom;
use tracing::info;

use crate::db::Database;
use crate::models::{Gender, Goal, NewMealEntry, NewWeightEntry, User, UserProfile};

pub const SEED_DAYS: u64 = 30;

/// (name, calories, protein, carbs, fat)
type SeedFood = (&'static str, f64, f64, f64, f64);

const BREAKFASTS: &[SeedFood] = &[
    ("Oatmeal with banana", 350.0, 10.0, 62.0, 6.0),
    ("Scrambled eggs", 300.0, 20.0, 4.0, 22.0),
    ("Greek yogurt", 180.0, 17.0, 9.0, 8.0),
];

const LUNCHES: &[SeedFood] = &[
    ("Chicken salad", 420.0, 35.0, 18.0, 22.0),
    ("Tuna sandwich", 460.0, 27.0, 45.0, 16.0),
    ("Lentil soup", 380.0, 22.0, 55.0, 6.0),
];

const DINNERS: &[SeedFood] = &[
    ("Salmon with rice", 600.0, 40.0, 55.0, 22.0),
    ("Beef stir fry", 650.0, 38.0, 60.0, 24.0),
    ("Vegetable curry", 540.0, 14.0, 70.0, 20.0),
];

#[derive(Debug, Clone)]
pub struct SeedSummary {
    pub user: User,
    pub days: u64,
    pub meals: usize,
    pub weights: usize,
    pub steps: usize,
}

fn demo_profile() -> UserProfile {
    UserProfile {
        goal: Goal::Maintain,
        sport_activity: "moderate".to_string(),
        height_cm: 175.0,
        weight_kg: 75.0,
        gender: Gender::Other,
    }
}

/// Creates a placeholder user with [`SEED_DAYS`] days of history ending the
/// day before `today`. Fails when any user already exists.
pub fn seed_demo_user(db: &Database, today: NaiveDate) -> Result<SeedSummary> {
    if db.has_user()? {
        bail!("A user already exists; reset the database before seeding demo data");
    }

    let profile = demo_profile();
    let user = db.create_user(&profile)?;
    let uid = user.user_id.as_str();
    let mut rng = rand::rng();
    let mut weight = profile.weight_kg;
    let (mut meals, mut weights, mut steps) = (0, 0, 0);

    for offset in (1..=SEED_DAYS).rev() {
        let Some(date) = today.checked_sub_days(Days::new(offset)) else {
            continue;
        };

        weight = (weight + rng.random_range(-0.3..=0.3)).clamp(
            profile.weight_kg - 3.0,
            profile.weight_kg + 3.0,
        );
        db.insert_weight(
            uid,
            &NewWeightEntry {
                weight_kg: (weight * 10.0).round() / 10.0,
                image_uri: None,
                note: None,
                date,
            },
        )?;
        weights += 1;

        db.insert_steps(uid, date, rng.random_range(3000..=12_000))?;
        steps += 1;

        for (meal_type, catalog) in [
            ("breakfast", BREAKFASTS),
            ("lunch", LUNCHES),
            ("dinner", DINNERS),
        ] {
            let Some(&(name, calories, protein, carbs, fat)) = catalog.choose(&mut rng) else {
                continue;
            };
            db.insert_meal_entry(
                uid,
                &NewMealEntry {
                    food_id: None,
                    food_name: name.to_string(),
                    calories,
                    protein,
                    carbs,
                    fat,
                    meal_type: meal_type.to_string(),
                    date,
                },
            )?;
            meals += 1;
        }
    }

    info!(user_id = uid, meals, weights, steps, "seeded demo data");
    Ok(SeedSummary {
        user,
        days: SEED_DAYS,
        meals,
        weights,
        steps,
    })
}
