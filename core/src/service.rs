use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use tracing::{info, warn};

use crate::analysis::{
    AnalysisOutcome, AnalysisProvider, ChatContext, DailyAnalysis, DayContext, FoodAnalysis,
    FoodImage,
};
use crate::db::Database;
use crate::models::{
    ChatMessage, ChatRole, DailyCalories, DailySummary, MealEntry, NewMealEntry, NewPersonalFood,
    NewWeightEntry, PersonalFood, StepsEntry, User, UserPreferences, UserProfile, WeightEntry,
    validate_meal_type, validate_new_food, validate_new_meal, validate_preferences,
    validate_profile, validate_weight,
};
use crate::seed::{self, SeedSummary};

/// Stored transcripts keep at most this many messages.
pub const MAX_CHAT_MESSAGES: usize = 100;

/// Identifies the signed-in user. Obtained from [`FitlogService::session`] or
/// [`FitlogService::complete_onboarding`] and passed to every user-scoped call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user_id: String,
}

pub struct FitlogService {
    db: Database,
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

impl FitlogService {
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Database::open(Path::new(db_path))?;
        Ok(Self { db })
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db })
    }

    #[must_use]
    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    // --- Session ---

    /// Session for the most recently onboarded user, if any.
    pub fn session(&self) -> Result<Option<Session>> {
        Ok(self
            .db
            .current_user()?
            .map(|u| Session { user_id: u.user_id }))
    }

    pub fn require_session(&self) -> Result<Session> {
        self.session()?
            .context("No user has completed onboarding yet")
    }

    pub fn has_user(&self) -> Result<bool> {
        self.db.has_user()
    }

    pub fn current_user(&self, session: &Session) -> Result<User> {
        self.db
            .get_user(&session.user_id)?
            .context("User not found")
    }

    /// Creates the user, or updates the current one when onboarding is
    /// repeated.
    pub fn complete_onboarding(&self, profile: &UserProfile) -> Result<Session> {
        validate_profile(profile)?;
        let user = match self.db.current_user()? {
            Some(existing) => self.db.update_user(&existing.user_id, profile)?,
            None => {
                let user = self.db.create_user(profile)?;
                info!(user_id = %user.user_id, "onboarding completed");
                user
            }
        };
        Ok(Session {
            user_id: user.user_id,
        })
    }

    pub fn update_profile(&self, session: &Session, profile: &UserProfile) -> Result<User> {
        validate_profile(profile)?;
        self.db.update_user(&session.user_id, profile)
    }

    /// Removes the user and all of their data.
    pub fn logout(&self, session: &Session) -> Result<bool> {
        let removed = self.db.delete_user(&session.user_id)?;
        if removed {
            info!(user_id = %session.user_id, "user logged out and data removed");
        }
        Ok(removed)
    }

    // --- Meals and foods ---

    pub fn get_todays_meal_entries(&self, session: &Session) -> Result<Vec<MealEntry>> {
        self.get_meal_entries(session, today())
    }

    pub fn get_meal_entries(&self, session: &Session, date: NaiveDate) -> Result<Vec<MealEntry>> {
        self.db.get_meal_entries_for_date(&session.user_id, date)
    }

    pub fn log_meal(&self, session: &Session, entry: &NewMealEntry) -> Result<MealEntry> {
        validate_new_meal(entry)?;
        if let Some(food_id) = entry.food_id {
            self.db.get_personal_food(&session.user_id, food_id)?;
        }
        let entry = NewMealEntry {
            meal_type: validate_meal_type(&entry.meal_type)?,
            food_name: entry.food_name.trim().to_string(),
            ..entry.clone()
        };
        self.db.insert_meal_entry(&session.user_id, &entry)
    }

    /// Logs one of the user's saved foods, copying its name and macros.
    pub fn log_food(
        &self,
        session: &Session,
        food_id: i64,
        meal_type: &str,
        date: NaiveDate,
    ) -> Result<MealEntry> {
        let meal_type = validate_meal_type(meal_type)?;
        let food = self.db.get_personal_food(&session.user_id, food_id)?;
        self.db.insert_meal_entry(
            &session.user_id,
            &NewMealEntry {
                food_id: Some(food.id),
                food_name: food.name,
                calories: food.calories,
                protein: food.protein,
                carbs: food.carbs,
                fat: food.fat,
                meal_type,
                date,
            },
        )
    }

    pub fn delete_meal(&self, session: &Session, id: i64) -> Result<bool> {
        self.db.delete_meal_entry(&session.user_id, id)
    }

    pub fn save_food(&self, session: &Session, food: &NewPersonalFood) -> Result<PersonalFood> {
        validate_new_food(food)?;
        let food = NewPersonalFood {
            name: food.name.trim().to_string(),
            ..food.clone()
        };
        self.db.insert_personal_food(&session.user_id, &food)
    }

    pub fn list_foods(&self, session: &Session, search: Option<&str>) -> Result<Vec<PersonalFood>> {
        self.db.list_personal_foods(&session.user_id, search)
    }

    pub fn delete_food(&self, session: &Session, id: i64) -> Result<bool> {
        self.db.delete_personal_food(&session.user_id, id)
    }

    // --- Weight and steps ---

    pub fn log_weight(&self, session: &Session, entry: &NewWeightEntry) -> Result<WeightEntry> {
        validate_weight(entry.weight_kg)?;
        self.db.insert_weight(&session.user_id, entry)
    }

    pub fn get_weight_history(
        &self,
        session: &Session,
        days: Option<i64>,
    ) -> Result<Vec<WeightEntry>> {
        self.db.get_weight_history(&session.user_id, days)
    }

    pub fn delete_weight(&self, session: &Session, id: i64) -> Result<()> {
        self.db.delete_weight(&session.user_id, id)
    }

    pub fn log_steps(&self, session: &Session, date: NaiveDate, steps: i64) -> Result<StepsEntry> {
        self.db.insert_steps(&session.user_id, date, steps)
    }

    pub fn get_steps_history(
        &self,
        session: &Session,
        days: Option<i64>,
    ) -> Result<Vec<StepsEntry>> {
        self.db.get_steps_history(&session.user_id, days)
    }

    pub fn delete_steps(&self, session: &Session, id: i64) -> Result<()> {
        self.db.delete_steps(&session.user_id, id)
    }

    pub fn get_daily_summary(&self, session: &Session, date: NaiveDate) -> Result<DailySummary> {
        self.db.build_daily_summary(&session.user_id, date)
    }

    pub fn get_calorie_totals(
        &self,
        session: &Session,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyCalories>> {
        if from > to {
            bail!("Start date {from} is after end date {to}");
        }
        self.db.get_calorie_totals(&session.user_id, from, to)
    }

    // --- Preferences ---

    pub fn get_preferences(&self, session: &Session) -> Result<UserPreferences> {
        self.db.get_preferences(&session.user_id)
    }

    pub fn save_preferences(
        &self,
        session: &Session,
        prefs: &UserPreferences,
    ) -> Result<UserPreferences> {
        validate_preferences(prefs)?;
        self.db.save_preferences(&session.user_id, prefs)
    }

    // --- Chat ---

    pub fn get_chat_history(&self, session: &Session) -> Result<Vec<ChatMessage>> {
        self.db.load_chat_history(&session.user_id)
    }

    pub fn clear_chat_history(&self, session: &Session) -> Result<bool> {
        self.db.clear_chat_history(&session.user_id)
    }

    /// Sends `message` to the assistant. The transcript is only extended when
    /// the provider answers.
    pub fn send_chat_message(
        &self,
        provider: &dyn AnalysisProvider,
        session: &Session,
        message: &str,
    ) -> Result<AnalysisOutcome<ChatMessage>> {
        let message = message.trim();
        if message.is_empty() {
            bail!("Message must not be empty");
        }

        let mut history = self.db.load_chat_history(&session.user_id)?;
        let ctx = ChatContext {
            day: self.day_context(session, today())?,
            history: history.clone(),
            message: message.to_string(),
        };

        let reply = match provider.chat(&ctx) {
            Ok(text) => ChatMessage::new(ChatRole::Assistant, text.trim()),
            Err(e) => {
                warn!(error = %e, "assistant chat failed");
                return Ok(AnalysisOutcome::from_result(Err(e)));
            }
        };

        history.push(ChatMessage::new(ChatRole::User, message));
        history.push(reply.clone());
        if history.len() > MAX_CHAT_MESSAGES {
            history.drain(..history.len() - MAX_CHAT_MESSAGES);
        }
        self.db.save_chat_history(&session.user_id, &history)?;

        Ok(AnalysisOutcome::from_result(Ok(reply)))
    }

    // --- Analysis ---

    pub fn day_context(&self, session: &Session, date: NaiveDate) -> Result<DayContext> {
        let user = self.current_user(session)?;
        let summary = self.db.build_daily_summary(&session.user_id, date)?;
        Ok(DayContext::new(user.profile(), date, &summary))
    }

    pub fn analyze_day(
        &self,
        provider: &dyn AnalysisProvider,
        session: &Session,
        date: NaiveDate,
    ) -> Result<AnalysisOutcome<DailyAnalysis>> {
        let ctx = self.day_context(session, date)?;
        let result = provider.analyze_day(&ctx);
        if let Err(e) = &result {
            warn!(error = %e, %date, "day analysis failed");
        }
        Ok(AnalysisOutcome::from_result(result))
    }

    pub fn analyze_food_photo(
        &self,
        provider: &dyn AnalysisProvider,
        image: &FoodImage,
        hint: Option<&str>,
    ) -> AnalysisOutcome<FoodAnalysis> {
        let result = provider.analyze_food_photo(image, hint);
        if let Err(e) = &result {
            warn!(error = %e, "food photo analysis failed");
        }
        AnalysisOutcome::from_result(result)
    }

    // --- Demo data ---

    pub fn seed_demo_data(&self, today: NaiveDate) -> Result<SeedSummary> {
        seed::seed_demo_user(&self.db, today)
    }
}
