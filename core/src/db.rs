use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::warn;
use uuid::Uuid;

use crate::migrate::{self, CLEANUP_TABLES, ColumnInfo, MigrationReport};
use crate::models::{
    ChatMessage, DailyCalories, DailySummary, MEAL_TYPES, MealEntry, MealGroup, NewMealEntry,
    NewPersonalFood, NewWeightEntry, PersonalFood, StepsEntry, User, UserPreferences, UserProfile,
    WeightEntry,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    pub changes: usize,
    pub last_insert_id: i64,
}

pub struct Database {
    conn: Connection,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn date_str(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_text<T>(idx: usize, text: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = anyhow::Error>,
{
    text.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn parse_date(idx: usize, text: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Self::connect(path)?;
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    /// Opens the database file without touching the schema. Callers must run
    /// [`Database::init`] before issuing queries.
    pub fn connect(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Ok(Database { conn })
    }

    pub fn with_connection(conn: Connection) -> Result<Self> {
        let db = Database { conn };
        db.init()?;
        Ok(db)
    }

    // Only a failure to create the base tables is an error.
    pub fn init(&self) -> Result<MigrationReport> {
        migrate::run(&self.conn).context("Failed to create database tables")
    }

    pub fn reset(&self) -> Result<MigrationReport> {
        migrate::reset(&self.conn).context("Failed to recreate database tables after reset")
    }

    // --- Storage primitives ---

    pub fn schema_version(&self) -> Result<i64> {
        migrate::schema_version(&self.conn)
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        migrate::table_exists(&self.conn, table)
    }

    pub fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        migrate::table_columns(&self.conn, table)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn execute<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<ExecOutcome> {
        let changes = self.conn.execute(sql, params)?;
        Ok(ExecOutcome {
            changes,
            last_insert_id: self.conn.last_insert_rowid(),
        })
    }

    pub fn count_rows(&self, table: &str) -> Result<i64> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
        Ok(count)
    }

    // --- Row mapping helpers ---

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        let goal: String = row.get(2)?;
        let gender: String = row.get(6)?;
        Ok(User {
            id: row.get(0)?,
            user_id: row.get(1)?,
            goal: parse_text(2, &goal)?,
            sport_activity: row.get(3)?,
            height_cm: row.get::<_, Option<f64>>(4)?.unwrap_or_default(),
            weight_kg: row.get::<_, Option<f64>>(5)?.unwrap_or_default(),
            gender: parse_text(6, &gender)?,
            created_at: row.get(7)?,
        })
    }

    fn personal_food_from_row(row: &rusqlite::Row) -> rusqlite::Result<PersonalFood> {
        Ok(PersonalFood {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            calories: row.get(3)?,
            protein: row.get(4)?,
            carbs: row.get(5)?,
            fat: row.get(6)?,
            category: row.get(7)?,
            image_uri: row.get(8)?,
            from_photo: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn meal_entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<MealEntry> {
        Ok(MealEntry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            food_id: row.get(2)?,
            food_name: row.get(3)?,
            calories: row.get(4)?,
            protein: row.get(5)?,
            carbs: row.get(6)?,
            fat: row.get(7)?,
            meal_type: row.get(8)?,
            date: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn weight_entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<WeightEntry> {
        let date: String = row.get(5)?;
        Ok(WeightEntry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            weight_kg: row.get(2)?,
            image_uri: row.get(3)?,
            note: row.get(4)?,
            date: parse_date(5, &date)?,
            created_at: row.get(6)?,
        })
    }

    fn steps_entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<StepsEntry> {
        let date: String = row.get(3)?;
        Ok(StepsEntry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            steps: row.get(2)?,
            date: parse_date(3, &date)?,
            created_at: row.get(4)?,
        })
    }

    // --- Users ---

    pub fn create_user(&self, profile: &UserProfile) -> Result<User> {
        let user_id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO users
                (user_id, goal, sport_activity, height_cm, weight_kg, gender, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user_id,
                profile.goal.as_str(),
                profile.sport_activity,
                profile.height_cm,
                profile.weight_kg,
                profile.gender.as_str(),
                now(),
            ],
        )?;
        self.get_user(&user_id)?
            .context("User not found after insert")
    }

    pub fn current_user(&self) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, user_id, goal, sport_activity, height_cm, weight_kg, gender, created_at
                 FROM users ORDER BY created_at DESC, id DESC LIMIT 1",
                [],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn has_user(&self) -> Result<bool> {
        Ok(self.count_rows("users")? > 0)
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, user_id, goal, sport_activity, height_cm, weight_kg, gender, created_at
                 FROM users WHERE user_id = ?1",
                params![user_id],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn update_user(&self, user_id: &str, profile: &UserProfile) -> Result<User> {
        let rows = self.conn.execute(
            "UPDATE users
             SET goal = ?1, sport_activity = ?2, height_cm = ?3, weight_kg = ?4, gender = ?5
             WHERE user_id = ?6",
            params![
                profile.goal.as_str(),
                profile.sport_activity,
                profile.height_cm,
                profile.weight_kg,
                profile.gender.as_str(),
                user_id,
            ],
        )?;
        if rows == 0 {
            bail!("User not found");
        }
        self.get_user(user_id)?.context("User not found")
    }

    pub fn delete_user(&self, user_id: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        for table in CLEANUP_TABLES {
            tx.execute(
                &format!("DELETE FROM {table} WHERE user_id = ?1"),
                params![user_id],
            )?;
        }
        let rows = tx.execute("DELETE FROM users WHERE user_id = ?1", params![user_id])?;
        tx.commit()?;
        Ok(rows > 0)
    }

    // --- Personal foods ---

    pub fn insert_personal_food(
        &self,
        user_id: &str,
        food: &NewPersonalFood,
    ) -> Result<PersonalFood> {
        self.conn.execute(
            "INSERT INTO personal_foods
                (user_id, name, calories, protein, carbs, fat, category, image_uri, from_photo,
                 created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                user_id,
                food.name,
                food.calories,
                food.protein,
                food.carbs,
                food.fat,
                food.category,
                food.image_uri,
                food.from_photo,
                now(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_personal_food(user_id, id)
    }

    pub fn get_personal_food(&self, user_id: &str, id: i64) -> Result<PersonalFood> {
        self.conn
            .query_row(
                "SELECT id, user_id, name, calories, protein, carbs, fat, category, image_uri,
                        from_photo, created_at
                 FROM personal_foods WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                Self::personal_food_from_row,
            )
            .context("Food not found")
    }

    pub fn list_personal_foods(
        &self,
        user_id: &str,
        search: Option<&str>,
    ) -> Result<Vec<PersonalFood>> {
        let pattern = search.map_or_else(
            || "%".to_string(),
            |query| {
                let escaped = query
                    .replace('\\', "\\\\")
                    .replace('%', "\\%")
                    .replace('_', "\\_");
                format!("%{escaped}%")
            },
        );
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, name, calories, protein, carbs, fat, category, image_uri,
                    from_photo, created_at
             FROM personal_foods
             WHERE user_id = ?1 AND name LIKE ?2 ESCAPE '\\'
             ORDER BY name LIMIT 100",
        )?;
        let foods = stmt
            .query_map(params![user_id, pattern], Self::personal_food_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(foods)
    }

    pub fn delete_personal_food(&self, user_id: &str, id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM personal_foods WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }

    // --- Meal entries ---

    pub fn insert_meal_entry(&self, user_id: &str, entry: &NewMealEntry) -> Result<MealEntry> {
        self.conn.execute(
            "INSERT INTO meal_entries
                (user_id, food_id, food_name, calories, protein, carbs, fat, meal_type, date,
                 created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                user_id,
                entry.food_id,
                entry.food_name,
                entry.calories,
                entry.protein,
                entry.carbs,
                entry.fat,
                entry.meal_type,
                date_str(entry.date),
                now(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_meal_entry(user_id, id)
    }

    pub fn get_meal_entry(&self, user_id: &str, id: i64) -> Result<MealEntry> {
        self.conn
            .query_row(
                "SELECT id, user_id, food_id, food_name, calories, protein, carbs, fat, meal_type,
                        date, created_at
                 FROM meal_entries WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                Self::meal_entry_from_row,
            )
            .context("Meal entry not found")
    }

    pub fn get_meal_entries_for_date(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<MealEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, food_id, food_name, calories, protein, carbs, fat, meal_type,
                    date, created_at
             FROM meal_entries
             WHERE user_id = ?1 AND date = ?2
             ORDER BY id",
        )?;
        let entries = stmt
            .query_map(params![user_id, date_str(date)], Self::meal_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn delete_meal_entry(&self, user_id: &str, id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM meal_entries WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn get_calorie_totals(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyCalories>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, SUM(calories) FROM meal_entries
             WHERE user_id = ?1 AND date >= ?2 AND date <= ?3
             GROUP BY date ORDER BY date",
        )?;
        let totals = stmt
            .query_map(params![user_id, date_str(from), date_str(to)], |row| {
                let date: String = row.get(0)?;
                Ok(DailyCalories {
                    date: parse_date(0, &date)?,
                    calories: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(totals)
    }

    // --- Weight entries ---

    pub fn insert_weight(&self, user_id: &str, entry: &NewWeightEntry) -> Result<WeightEntry> {
        self.conn.execute(
            "INSERT INTO weight_entries (user_id, weight_kg, image_uri, note, date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                entry.weight_kg,
                entry.image_uri,
                entry.note,
                date_str(entry.date),
                now(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                "SELECT id, user_id, weight_kg, image_uri, note, date, created_at
                 FROM weight_entries WHERE id = ?1",
                params![id],
                Self::weight_entry_from_row,
            )
            .context("Weight entry not found after insert")
    }

    // `days` limits the number of entries, newest first.
    pub fn get_weight_history(&self, user_id: &str, days: Option<i64>) -> Result<Vec<WeightEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, weight_kg, image_uri, note, date, created_at
             FROM weight_entries WHERE user_id = ?1
             ORDER BY date DESC, id DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![user_id, days.unwrap_or(-1)], Self::weight_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn latest_weight(&self, user_id: &str, date: NaiveDate) -> Result<Option<WeightEntry>> {
        let entry = self
            .conn
            .query_row(
                "SELECT id, user_id, weight_kg, image_uri, note, date, created_at
                 FROM weight_entries WHERE user_id = ?1 AND date <= ?2
                 ORDER BY date DESC, id DESC LIMIT 1",
                params![user_id, date_str(date)],
                Self::weight_entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn delete_weight(&self, user_id: &str, id: i64) -> Result<()> {
        let rows = self.conn.execute(
            "DELETE FROM weight_entries WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        if rows == 0 {
            bail!("Weight entry not found");
        }
        Ok(())
    }

    // --- Steps entries ---

    pub fn insert_steps(&self, user_id: &str, date: NaiveDate, steps: i64) -> Result<StepsEntry> {
        if steps < 0 {
            bail!("Steps must not be negative");
        }
        self.conn.execute(
            "INSERT INTO steps_entries (user_id, steps, date, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, steps, date_str(date), now()],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                "SELECT id, user_id, steps, date, created_at FROM steps_entries WHERE id = ?1",
                params![id],
                Self::steps_entry_from_row,
            )
            .context("Steps entry not found after insert")
    }

    pub fn get_steps_for_date(&self, user_id: &str, date: NaiveDate) -> Result<i64> {
        let total = self.conn.query_row(
            "SELECT COALESCE(SUM(steps), 0) FROM steps_entries WHERE user_id = ?1 AND date = ?2",
            params![user_id, date_str(date)],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    pub fn get_steps_history(&self, user_id: &str, days: Option<i64>) -> Result<Vec<StepsEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, steps, date, created_at
             FROM steps_entries WHERE user_id = ?1
             ORDER BY date DESC, id DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![user_id, days.unwrap_or(-1)], Self::steps_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn delete_steps(&self, user_id: &str, id: i64) -> Result<()> {
        let rows = self.conn.execute(
            "DELETE FROM steps_entries WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        if rows == 0 {
            bail!("Steps entry not found");
        }
        Ok(())
    }

    // --- Preferences ---

    pub fn get_preferences(&self, user_id: &str) -> Result<UserPreferences> {
        let prefs = self
            .conn
            .query_row(
                "SELECT hide_photos, chart_type, time_range, metric
                 FROM user_preferences WHERE user_id = ?1
                 ORDER BY id DESC LIMIT 1",
                params![user_id],
                |row| {
                    Ok(UserPreferences {
                        hide_photos: row.get(0)?,
                        chart_type: row.get(1)?,
                        time_range: row.get(2)?,
                        metric: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(prefs.unwrap_or_default())
    }

    pub fn save_preferences(
        &self,
        user_id: &str,
        prefs: &UserPreferences,
    ) -> Result<UserPreferences> {
        let now = now();
        let rows = self.conn.execute(
            "UPDATE user_preferences
             SET hide_photos = ?1, chart_type = ?2, time_range = ?3, metric = ?4, updated_at = ?5
             WHERE user_id = ?6",
            params![
                prefs.hide_photos,
                prefs.chart_type,
                prefs.time_range,
                prefs.metric,
                now,
                user_id
            ],
        )?;
        if rows == 0 {
            self.conn.execute(
                "INSERT INTO user_preferences
                    (user_id, hide_photos, chart_type, time_range, metric, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user_id,
                    prefs.hide_photos,
                    prefs.chart_type,
                    prefs.time_range,
                    prefs.metric,
                    now
                ],
            )?;
        }
        self.get_preferences(user_id)
    }

    // --- Chat history ---

    pub fn load_chat_history(&self, user_id: &str) -> Result<Vec<ChatMessage>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT messages FROM chat_history WHERE user_id = ?1 ORDER BY id DESC LIMIT 1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(messages) => Ok(messages),
            Err(e) => {
                warn!(error = %e, "stored chat history is not valid JSON; starting over");
                Ok(Vec::new())
            }
        }
    }

    pub fn save_chat_history(&self, user_id: &str, messages: &[ChatMessage]) -> Result<()> {
        let json = serde_json::to_string(messages)?;
        let now = now();
        let rows = self.conn.execute(
            "UPDATE chat_history SET messages = ?1, updated_at = ?2 WHERE user_id = ?3",
            params![json, now, user_id],
        )?;
        if rows == 0 {
            self.conn.execute(
                "INSERT INTO chat_history (user_id, messages, updated_at) VALUES (?1, ?2, ?3)",
                params![user_id, json, now],
            )?;
        }
        Ok(())
    }

    pub fn clear_chat_history(&self, user_id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM chat_history WHERE user_id = ?1", params![user_id])?;
        Ok(rows > 0)
    }

    // --- Summaries ---

    pub fn build_daily_summary(&self, user_id: &str, date: NaiveDate) -> Result<DailySummary> {
        let entries = self.get_meal_entries_for_date(user_id, date)?;
        let mut meals: Vec<MealGroup> = Vec::new();

        for meal_type in MEAL_TYPES {
            let meal_entries: Vec<MealEntry> = entries
                .iter()
                .filter(|e| e.meal_type == *meal_type)
                .cloned()
                .collect();

            if meal_entries.is_empty() {
                continue;
            }

            let subtotal_calories: f64 = meal_entries.iter().map(|e| e.calories).sum();
            let subtotal_protein: f64 = meal_entries.iter().map(|e| e.protein).sum();
            let subtotal_carbs: f64 = meal_entries.iter().map(|e| e.carbs).sum();
            let subtotal_fat: f64 = meal_entries.iter().map(|e| e.fat).sum();

            meals.push(MealGroup {
                meal_type: (*meal_type).to_string(),
                entries: meal_entries,
                subtotal_calories,
                subtotal_protein,
                subtotal_carbs,
                subtotal_fat,
            });
        }

        let total_calories: f64 = meals.iter().map(|m| m.subtotal_calories).sum();
        let total_protein: f64 = meals.iter().map(|m| m.subtotal_protein).sum();
        let total_carbs: f64 = meals.iter().map(|m| m.subtotal_carbs).sum();
        let total_fat: f64 = meals.iter().map(|m| m.subtotal_fat).sum();

        let steps = self.get_steps_for_date(user_id, date)?;
        let weight_kg = self
            .latest_weight(user_id, date)?
            .filter(|w| w.date == date)
            .map(|w| w.weight_kg);

        Ok(DailySummary {
            date: date_str(date),
            meals,
            total_calories,
            total_protein,
            total_carbs,
            total_fat,
            steps,
            weight_kg,
        })
    }
}
