use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// --- User profile ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    Increase,
    Decrease,
    Maintain,
}

impl Goal {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Increase => "increase",
            Self::Decrease => "decrease",
            Self::Maintain => "maintain",
        }
    }
}

impl FromStr for Goal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "increase" | "gain" => Ok(Self::Increase),
            "decrease" | "lose" => Ok(Self::Decrease),
            "maintain" => Ok(Self::Maintain),
            _ => bail!("Invalid goal '{s}'. Must be one of: increase, decrease, maintain"),
        }
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
        }
    }
}

impl FromStr for Gender {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "male" | "m" => Ok(Self::Male),
            "female" | "f" => Ok(Self::Female),
            "other" => Ok(Self::Other),
            _ => bail!("Invalid gender '{s}'. Must be one of: male, female, other"),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value stored in `users.sport_activity` when nothing was chosen.
pub const NO_ACTIVITY: &str = "none";

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub user_id: String,
    pub goal: Goal,
    pub sport_activity: String,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub gender: Gender,
    pub created_at: String,
}

impl User {
    #[must_use]
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            goal: self.goal,
            sport_activity: self.sport_activity.clone(),
            height_cm: self.height_cm,
            weight_kg: self.weight_kg,
            gender: self.gender,
        }
    }
}

/// Attributes collected by onboarding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub goal: Goal,
    #[serde(default = "default_activity")]
    pub sport_activity: String,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub gender: Gender,
}

fn default_activity() -> String {
    NO_ACTIVITY.to_string()
}

pub fn validate_profile(profile: &UserProfile) -> Result<()> {
    if !(50.0..=272.0).contains(&profile.height_cm) {
        bail!("Height must be between 50 and 272 cm");
    }
    if !(20.0..=500.0).contains(&profile.weight_kg) {
        bail!("Weight must be between 20 and 500 kg");
    }
    if profile.sport_activity.trim().is_empty() {
        bail!("Sport activity must not be empty");
    }
    Ok(())
}

// --- Foods and meals ---

#[derive(Debug, Clone, Serialize)]
pub struct PersonalFood {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
    pub from_photo: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPersonalFood {
    pub name: String,
    pub calories: f64,
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub carbs: f64,
    #[serde(default)]
    pub fat: f64,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub image_uri: Option<String>,
    #[serde(default)]
    pub from_photo: bool,
}

fn default_category() -> String {
    "other".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct MealEntry {
    pub id: i64,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub food_id: Option<i64>,
    pub food_name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub meal_type: String,
    pub date: String,
    pub created_at: String,
}

/// A meal to log. Name and macros are copied into the row as given; they are
/// not re-joined from the food later.
#[derive(Debug, Clone)]
pub struct NewMealEntry {
    pub food_id: Option<i64>,
    pub food_name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub meal_type: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct MealGroup {
    pub meal_type: String,
    pub entries: Vec<MealEntry>,
    pub subtotal_calories: f64,
    pub subtotal_protein: f64,
    pub subtotal_carbs: f64,
    pub subtotal_fat: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailySummary {
    pub date: String,
    pub meals: Vec<MealGroup>,
    pub total_calories: f64,
    pub total_protein: f64,
    pub total_carbs: f64,
    pub total_fat: f64,
    pub steps: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailyCalories {
    pub date: NaiveDate,
    pub calories: f64,
}

// --- Body tracking ---

#[derive(Debug, Clone, Serialize)]
pub struct WeightEntry {
    pub id: i64,
    pub user_id: String,
    pub weight_kg: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub date: NaiveDate,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewWeightEntry {
    pub weight_kg: f64,
    pub image_uri: Option<String>,
    pub note: Option<String>,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepsEntry {
    pub id: i64,
    pub user_id: String,
    pub steps: i64,
    pub date: NaiveDate,
    pub created_at: String,
}

// --- Preferences ---

pub const CHART_TYPES: &[&str] = &["line", "bar"];
pub const TIME_RANGES: &[&str] = &["week", "month", "year"];
pub const METRICS: &[&str] = &["weight", "calories", "steps"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub hide_photos: bool,
    pub chart_type: String,
    pub time_range: String,
    pub metric: String,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            hide_photos: false,
            chart_type: "line".to_string(),
            time_range: "week".to_string(),
            metric: "weight".to_string(),
        }
    }
}

pub fn validate_preferences(prefs: &UserPreferences) -> Result<()> {
    validate_choice("chart type", &prefs.chart_type, CHART_TYPES)?;
    validate_choice("time range", &prefs.time_range, TIME_RANGES)?;
    validate_choice("metric", &prefs.metric, METRICS)?;
    Ok(())
}

fn validate_choice(label: &str, value: &str, allowed: &[&str]) -> Result<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        bail!("Invalid {label} '{value}'. Must be one of: {}", allowed.join(", "))
    }
}

// --- Chat ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: String,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Local::now().to_rfc3339(),
        }
    }
}

// --- Validation ---

pub const MEAL_TYPES: &[&str] = &["breakfast", "lunch", "dinner", "snack"];

pub fn validate_meal_type(meal: &str) -> Result<String> {
    let lower = meal.to_lowercase();
    if MEAL_TYPES.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        bail!(
            "Invalid meal type '{meal}'. Must be one of: {}",
            MEAL_TYPES.join(", ")
        )
    }
}

/// Calories must be non-negative and finite, macros likewise.
pub fn validate_macros(calories: f64, protein: f64, carbs: f64, fat: f64) -> Result<()> {
    for (label, value) in [
        ("calories", calories),
        ("protein", protein),
        ("carbs", carbs),
        ("fat", fat),
    ] {
        if !value.is_finite() || value < 0.0 {
            bail!("{label} must be a non-negative number");
        }
    }
    Ok(())
}

pub fn validate_new_meal(entry: &NewMealEntry) -> Result<()> {
    validate_meal_type(&entry.meal_type)?;
    if entry.food_name.trim().is_empty() {
        bail!("Food name must not be empty");
    }
    validate_macros(entry.calories, entry.protein, entry.carbs, entry.fat)
}

pub fn validate_new_food(food: &NewPersonalFood) -> Result<()> {
    if food.name.trim().is_empty() {
        bail!("Food name must not be empty");
    }
    validate_macros(food.calories, food.protein, food.carbs, food.fat)
}

pub fn validate_weight(weight_kg: f64) -> Result<()> {
    if !weight_kg.is_finite() || weight_kg <= 0.0 {
        bail!("Weight must be greater than 0");
    }
    Ok(())
}
