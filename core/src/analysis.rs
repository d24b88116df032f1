use std::fmt::Write as _;

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate, Timelike};
use rand::seq::IndexedRandom;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::models::{
    ChatMessage, DailySummary, Gender, Goal, MealEntry, NewPersonalFood, UserProfile,
};

/// Platform-native assistant backend.
///
/// The CLI implements this against an OpenAI-compatible HTTP API with
/// reqwest, and falls back to [`MockAnalyzer`] when no key is configured.
/// Called synchronously; async callers must invoke it off the runtime thread.
pub trait AnalysisProvider: Send + Sync {
    fn analyze_food_photo(&self, image: &FoodImage, hint: Option<&str>) -> Result<FoodAnalysis>;
    fn analyze_day(&self, ctx: &DayContext) -> Result<DailyAnalysis>;
    fn chat(&self, ctx: &ChatContext) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct FoodImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Nutrition estimate for a single photographed food.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodAnalysis {
    pub name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub category: String,
    pub confidence: f64,
}

impl FoodAnalysis {
    #[must_use]
    pub fn to_new_food(&self, image_uri: Option<String>) -> NewPersonalFood {
        NewPersonalFood {
            name: self.name.clone(),
            calories: self.calories,
            protein: self.protein,
            carbs: self.carbs,
            fat: self.fat,
            category: self.category.clone(),
            image_uri,
            from_photo: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAnalysis {
    pub date: String,
    pub calories_consumed: f64,
    pub calorie_target: f64,
    pub calories_remaining: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub steps: i64,
    /// 0 to 100.
    pub score: u8,
    pub insights: Vec<String>,
    pub recommendation: String,
}

/// Uniform envelope handed to UIs: failures become `success = false` with a
/// message instead of an error.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> AnalysisOutcome<T> {
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(e) => Self {
                success: false,
                data: None,
                error: Some(format!("{e:#}")),
            },
        }
    }
}

/// Everything a provider needs to review one day.
#[derive(Debug, Clone, Serialize)]
pub struct DayContext {
    pub profile: UserProfile,
    pub date: NaiveDate,
    pub meals: Vec<MealEntry>,
    pub total_calories: f64,
    pub total_protein: f64,
    pub total_carbs: f64,
    pub total_fat: f64,
    pub steps: i64,
    pub weight_kg: Option<f64>,
    pub calorie_target: f64,
}

impl DayContext {
    #[must_use]
    pub fn new(profile: UserProfile, date: NaiveDate, summary: &DailySummary) -> Self {
        let calorie_target = estimate_daily_calories(&profile);
        Self {
            meals: summary
                .meals
                .iter()
                .flat_map(|m| m.entries.iter().cloned())
                .collect(),
            total_calories: summary.total_calories,
            total_protein: summary.total_protein,
            total_carbs: summary.total_carbs,
            total_fat: summary.total_fat,
            steps: summary.steps,
            weight_kg: summary.weight_kg,
            calorie_target,
            profile,
            date,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatContext {
    pub day: DayContext,
    /// Prior turns, oldest first. Does not include `message`.
    pub history: Vec<ChatMessage>,
    pub message: String,
}

// --- Calorie target ---

const REFERENCE_AGE: f64 = 30.0;

fn activity_multiplier(activity: &str) -> f64 {
    match activity {
        "light" => 1.375,
        "moderate" => 1.55,
        "active" => 1.725,
        "very_active" => 1.9,
        _ => 1.2,
    }
}

/// Daily calorie target from the Mifflin-St Jeor equation, rounded to whole
/// kcal and never below 1200.
#[must_use]
pub fn estimate_daily_calories(profile: &UserProfile) -> f64 {
    let base = 10.0 * profile.weight_kg + 6.25 * profile.height_cm - 5.0 * REFERENCE_AGE;
    let bmr = match profile.gender {
        Gender::Male => base + 5.0,
        Gender::Female => base - 161.0,
        Gender::Other => base - 78.0,
    };
    let maintenance = bmr * activity_multiplier(&profile.sport_activity);
    let target = match profile.goal {
        Goal::Decrease => maintenance - 500.0,
        Goal::Increase => maintenance + 300.0,
        Goal::Maintain => maintenance,
    };
    target.round().max(1200.0)
}

// --- Prompts ---

const FOOD_CATEGORIES: &[&str] = &[
    "breakfast",
    "lunch",
    "dinner",
    "snack",
    "drink",
    "other",
];

#[must_use]
pub fn build_food_prompt(hint: Option<&str>) -> String {
    let mut prompt = String::from(
        "You are a nutrition assistant. Identify the main food in the photo and estimate \
         its nutrition for the visible portion. Respond with a single JSON object and \
         nothing else, using these keys: \"name\" (string), \"calories\" (kcal), \
         \"protein\", \"carbs\", \"fat\" (grams), \"confidence\" (0 to 1), and \
         \"category\" (one of ",
    );
    prompt.push_str(&FOOD_CATEGORIES.join(", "));
    prompt.push_str(").");
    if let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) {
        let _ = write!(prompt, " The user describes it as: \"{hint}\".");
    }
    prompt
}

fn describe_profile(out: &mut String, profile: &UserProfile, target: f64) {
    let _ = writeln!(
        out,
        "User: {} cm, {} kg, gender {}, goal {}, activity {}. Daily target about {target:.0} kcal.",
        profile.height_cm, profile.weight_kg, profile.gender, profile.goal, profile.sport_activity
    );
}

fn describe_day(out: &mut String, ctx: &DayContext) {
    let _ = writeln!(out, "Date: {}", ctx.date);
    if ctx.meals.is_empty() {
        out.push_str("No meals logged.\n");
    }
    for meal in &ctx.meals {
        let _ = writeln!(
            out,
            "- {}: {} ({:.0} kcal, P {:.0}g, C {:.0}g, F {:.0}g)",
            meal.meal_type, meal.food_name, meal.calories, meal.protein, meal.carbs, meal.fat
        );
    }
    let _ = writeln!(
        out,
        "Totals: {:.0} kcal, P {:.0}g, C {:.0}g, F {:.0}g. Steps: {}.",
        ctx.total_calories, ctx.total_protein, ctx.total_carbs, ctx.total_fat, ctx.steps
    );
    if let Some(kg) = ctx.weight_kg {
        let _ = writeln!(out, "Weighed in at {kg:.1} kg.");
    }
}

#[must_use]
pub fn build_day_prompt(ctx: &DayContext) -> String {
    let mut prompt = String::from(
        "You are a friendly nutrition coach. Review the user's day below. Respond with a \
         single JSON object and nothing else, using these keys: \"score\" (0 to 100), \
         \"insights\" (array of short strings), \"recommendation\" (one sentence).\n\n",
    );
    describe_profile(&mut prompt, &ctx.profile, ctx.calorie_target);
    describe_day(&mut prompt, ctx);
    prompt
}

/// System prompt for a chat turn. History and the new message are sent as
/// separate chat messages.
#[must_use]
pub fn build_chat_prompt(ctx: &ChatContext) -> String {
    let mut prompt = String::from(
        "You are a friendly nutrition and fitness coach inside a food tracking app. \
         Keep answers short and practical. Do not give medical advice.\n\n",
    );
    describe_profile(&mut prompt, &ctx.day.profile, ctx.day.calorie_target);
    describe_day(&mut prompt, &ctx.day);
    prompt
}

// --- Response parsing ---

/// Returns the outermost `{...}` in `text`, which also drops markdown fences
/// and any chatter around the object.
#[must_use]
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn leading_number(s: &str) -> Option<f64> {
    let s = s.trim();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && c == '-')))
        .map_or(s.len(), |(i, _)| i);
    s[..end].parse().ok()
}

/// Accepts a number, a numeric string such as `"250 kcal"`, or null.
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
        Some(Value::String(s)) => leading_number(&s).unwrap_or_default(),
        _ => 0.0,
    })
}

fn lenient_strings<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(Value::String(s)) => vec![s],
        _ => Vec::new(),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFoodAnalysis {
    name: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    calories: f64,
    #[serde(deserialize_with = "lenient_f64")]
    protein: f64,
    #[serde(deserialize_with = "lenient_f64")]
    carbs: f64,
    #[serde(deserialize_with = "lenient_f64")]
    fat: f64,
    category: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    confidence: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDailyAnalysis {
    #[serde(deserialize_with = "lenient_f64")]
    score: f64,
    #[serde(deserialize_with = "lenient_strings")]
    insights: Vec<String>,
    recommendation: Option<String>,
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

pub fn parse_food_analysis(text: &str) -> Result<FoodAnalysis> {
    let json = extract_json_object(text).context("Response did not contain a JSON object")?;
    let raw: RawFoodAnalysis =
        serde_json::from_str(json).context("Response JSON could not be parsed")?;

    let category = raw
        .category
        .map(|c| c.trim().to_lowercase())
        .filter(|c| FOOD_CATEGORIES.contains(&c.as_str()))
        .unwrap_or_else(|| "other".to_string());

    Ok(FoodAnalysis {
        name: raw
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Unknown food".to_string()),
        calories: non_negative(raw.calories).round(),
        protein: non_negative(raw.protein),
        carbs: non_negative(raw.carbs),
        fat: non_negative(raw.fat),
        category,
        confidence: non_negative(raw.confidence).min(1.0),
    })
}

/// Merges the provider's judgement with the numbers from `ctx`, which are
/// never taken from the response.
pub fn parse_daily_analysis(text: &str, ctx: &DayContext) -> Result<DailyAnalysis> {
    let json = extract_json_object(text).context("Response did not contain a JSON object")?;
    let raw: RawDailyAnalysis =
        serde_json::from_str(json).context("Response JSON could not be parsed")?;

    let mut analysis = computed_analysis(ctx);
    analysis.score = non_negative(raw.score).min(100.0).round() as u8;
    if !raw.insights.is_empty() {
        analysis.insights = raw.insights;
    }
    if let Some(recommendation) = raw.recommendation.filter(|r| !r.trim().is_empty()) {
        analysis.recommendation = recommendation;
    }
    Ok(analysis)
}

// --- Offline analyzer ---

struct CatalogFood {
    name: &'static str,
    keywords: &'static [&'static str],
    slot: &'static str,
    calories: f64,
    protein: f64,
    carbs: f64,
    fat: f64,
}

#[rustfmt::skip]
const CATALOG: &[CatalogFood] = &[
    CatalogFood { name: "Oatmeal with berries", keywords: &["oat", "porridge", "berry"], slot: "breakfast", calories: 320.0, protein: 10.0, carbs: 54.0, fat: 7.0 },
    CatalogFood { name: "Scrambled eggs on toast", keywords: &["egg", "toast"], slot: "breakfast", calories: 380.0, protein: 21.0, carbs: 28.0, fat: 20.0 },
    CatalogFood { name: "Greek yogurt with granola", keywords: &["yogurt", "yoghurt", "granola"], slot: "breakfast", calories: 290.0, protein: 17.0, carbs: 36.0, fat: 8.0 },
    CatalogFood { name: "Chicken salad", keywords: &["salad", "chicken"], slot: "lunch", calories: 420.0, protein: 35.0, carbs: 18.0, fat: 22.0 },
    CatalogFood { name: "Turkey sandwich", keywords: &["sandwich", "turkey", "wrap"], slot: "lunch", calories: 450.0, protein: 28.0, carbs: 48.0, fat: 14.0 },
    CatalogFood { name: "Sushi rolls", keywords: &["sushi", "maki"], slot: "lunch", calories: 480.0, protein: 20.0, carbs: 80.0, fat: 8.0 },
    CatalogFood { name: "Spaghetti bolognese", keywords: &["pasta", "spaghetti", "bolognese"], slot: "dinner", calories: 650.0, protein: 30.0, carbs: 80.0, fat: 20.0 },
    CatalogFood { name: "Grilled salmon with rice", keywords: &["salmon", "fish", "rice"], slot: "dinner", calories: 600.0, protein: 40.0, carbs: 55.0, fat: 22.0 },
    CatalogFood { name: "Margherita pizza", keywords: &["pizza"], slot: "dinner", calories: 800.0, protein: 32.0, carbs: 95.0, fat: 30.0 },
    CatalogFood { name: "Apple", keywords: &["apple", "fruit"], slot: "snack", calories: 95.0, protein: 0.5, carbs: 25.0, fat: 0.3 },
    CatalogFood { name: "Protein bar", keywords: &["bar", "protein"], slot: "snack", calories: 210.0, protein: 20.0, carbs: 22.0, fat: 7.0 },
    CatalogFood { name: "Mixed nuts", keywords: &["nut", "almond", "cashew"], slot: "snack", calories: 180.0, protein: 6.0, carbs: 7.0, fat: 16.0 },
];

fn slot_for_hour(hour: u32) -> &'static str {
    match hour {
        5..=10 => "breakfast",
        11..=15 => "lunch",
        16..=21 => "dinner",
        _ => "snack",
    }
}

fn catalog_analysis(food: &CatalogFood, confidence: f64) -> FoodAnalysis {
    FoodAnalysis {
        name: food.name.to_string(),
        calories: food.calories,
        protein: food.protein,
        carbs: food.carbs,
        fat: food.fat,
        category: food.slot.to_string(),
        confidence,
    }
}

fn computed_analysis(ctx: &DayContext) -> DailyAnalysis {
    let remaining = ctx.calorie_target - ctx.total_calories;
    let deviation = if ctx.calorie_target > 0.0 {
        (remaining.abs() / ctx.calorie_target).min(1.0)
    } else {
        1.0
    };
    let mut score = 100.0 - deviation * 60.0;
    if ctx.steps >= 8000 {
        score += 10.0;
    }
    if ctx.meals.is_empty() {
        score = 0.0;
    }

    let mut insights = Vec::new();
    if ctx.meals.is_empty() {
        insights.push("No meals logged yet for this day.".to_string());
    } else if remaining >= 0.0 {
        insights.push(format!(
            "You have about {remaining:.0} kcal left of your {:.0} kcal target.",
            ctx.calorie_target
        ));
    } else {
        insights.push(format!(
            "You are {:.0} kcal over your {:.0} kcal target.",
            -remaining, ctx.calorie_target
        ));
    }
    let protein_goal = ctx.profile.weight_kg * 1.2;
    if !ctx.meals.is_empty() && ctx.total_protein < protein_goal {
        insights.push(format!(
            "Protein is at {:.0} g; aim for around {protein_goal:.0} g.",
            ctx.total_protein
        ));
    }
    if ctx.steps >= 10_000 {
        insights.push(format!("Great job reaching {} steps.", ctx.steps));
    } else if ctx.steps < 5000 {
        insights.push("A short walk would help your step count.".to_string());
    }

    let recommendation = match ctx.profile.goal {
        Goal::Decrease => "Favour lean protein and vegetables to stay full within your target.",
        Goal::Increase => "Add a protein-rich snack to reach your surplus.",
        Goal::Maintain => "Keep your meals balanced and consistent.",
    };

    DailyAnalysis {
        date: ctx.date.format("%Y-%m-%d").to_string(),
        calories_consumed: ctx.total_calories,
        calorie_target: ctx.calorie_target,
        calories_remaining: remaining,
        protein: ctx.total_protein,
        carbs: ctx.total_carbs,
        fat: ctx.total_fat,
        steps: ctx.steps,
        score: score.clamp(0.0, 100.0).round() as u8,
        insights,
        recommendation: recommendation.to_string(),
    }
}

/// Offline provider used when no assistant API is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockAnalyzer {
    hour: Option<u32>,
}

impl MockAnalyzer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the time of day used to pick a meal slot.
    #[must_use]
    pub fn at_hour(hour: u32) -> Self {
        Self { hour: Some(hour) }
    }

    fn hour(self) -> u32 {
        self.hour.unwrap_or_else(|| Local::now().hour())
    }
}

impl AnalysisProvider for MockAnalyzer {
    fn analyze_food_photo(&self, image: &FoodImage, hint: Option<&str>) -> Result<FoodAnalysis> {
        if image.data.is_empty() {
            bail!("Image is empty");
        }

        if let Some(hint) = hint.map(str::to_lowercase) {
            if let Some(food) = CATALOG
                .iter()
                .find(|f| f.keywords.iter().any(|k| hint.contains(k)))
            {
                return Ok(catalog_analysis(food, 0.9));
            }
        }

        let slot = slot_for_hour(self.hour());
        let candidates: Vec<&CatalogFood> = CATALOG.iter().filter(|f| f.slot == slot).collect();
        let food = candidates
            .choose(&mut rand::rng())
            .context("No catalog food for meal slot")?;
        Ok(catalog_analysis(food, 0.6))
    }

    fn analyze_day(&self, ctx: &DayContext) -> Result<DailyAnalysis> {
        Ok(computed_analysis(ctx))
    }

    fn chat(&self, ctx: &ChatContext) -> Result<String> {
        let message = ctx.message.to_lowercase();
        let day = &ctx.day;
        let remaining = day.calorie_target - day.total_calories;

        let reply = if message.contains("calorie") || message.contains("kcal") {
            if remaining >= 0.0 {
                format!(
                    "You've had {:.0} kcal today, which leaves about {remaining:.0} kcal \
                     of your {:.0} kcal target.",
                    day.total_calories, day.calorie_target
                )
            } else {
                format!(
                    "You're about {:.0} kcal over your {:.0} kcal target today. \
                     A lighter dinner and a walk will help.",
                    -remaining, day.calorie_target
                )
            }
        } else if message.contains("protein") {
            format!(
                "You've logged {:.0} g of protein today. Around {:.0} g suits your weight; \
                 eggs, yogurt and lean meat are easy wins.",
                day.total_protein,
                day.profile.weight_kg * 1.2
            )
        } else if message.contains("step") || message.contains("walk") {
            format!(
                "You're at {} steps today. Aiming for 8,000 to 10,000 is a good everyday target.",
                day.steps
            )
        } else if message.contains("weight") {
            match day.weight_kg {
                Some(kg) => format!(
                    "You weighed in at {kg:.1} kg today. \
                     Focus on the weekly trend, not single days."
                ),
                None => "You haven't logged a weight today. \
                         Weighing at the same time each morning keeps the trend honest."
                    .to_string(),
            }
        } else if ["hi", "hello", "hey"]
            .iter()
            .any(|g| message.split_whitespace().next() == Some(*g))
        {
            "Hi! Ask me about your calories, protein, steps, or weight.".to_string()
        } else {
            "I can help with calories, protein, steps, and weight. What would you like to know?"
                .to_string()
        };
        Ok(reply)
    }
}
