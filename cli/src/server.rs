use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

use fitlog_core::analysis::{AnalysisOutcome, AnalysisProvider, FoodAnalysis, FoodImage};
use fitlog_core::models::{
    ChatMessage, DailySummary, MealEntry, NewMealEntry, NewWeightEntry, PersonalFood, StepsEntry,
    User, UserPreferences, UserProfile, WeightEntry, validate_meal_type, validate_new_meal,
    validate_preferences, validate_profile, validate_weight,
};
use fitlog_core::service::{FitlogService, Session};

const BODY_LIMIT: usize = 20 * 1024 * 1024; // 20 MB, room for a photo

#[derive(Clone)]
struct AppState {
    service: Arc<Mutex<FitlogService>>,
    provider: Arc<dyn AnalysisProvider>,
    api_key: Option<String>,
}

impl AppState {
    fn service(&self) -> MutexGuard<'_, FitlogService> {
        self.service
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct CreateMealRequest {
    date: String,
    meal_type: String,
    /// Log a saved food; name and macros are copied from it.
    food_id: Option<i64>,
    food_name: Option<String>,
    calories: Option<f64>,
    #[serde(default)]
    protein: f64,
    #[serde(default)]
    carbs: f64,
    #[serde(default)]
    fat: f64,
}

#[derive(Deserialize)]
struct CreateWeightRequest {
    date: String,
    weight_kg: f64,
    note: Option<String>,
    image_uri: Option<String>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    days: Option<i64>,
}

#[derive(Deserialize)]
struct CreateStepsRequest {
    date: String,
    steps: i64,
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Deserialize)]
struct PhotoRequest {
    /// Base64 image bytes, optionally as a `data:` URL.
    image: String,
    #[serde(default = "default_mime")]
    mime_type: String,
    hint: Option<String>,
    /// Save a successful estimate as a personal food.
    #[serde(default)]
    save: bool,
}

fn default_mime() -> String {
    "image/jpeg".to_string()
}

#[derive(Serialize)]
struct PhotoResponse {
    #[serde(flatten)]
    outcome: AnalysisOutcome<FoodAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    food: Option<PersonalFood>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Internal(err) => {
                error!(error = %format!("{err:#}"), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

fn bad_request(err: anyhow::Error) -> ApiError {
    ApiError::BadRequest(format!("{err}"))
}

fn parse_date(date_str: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid date '{date_str}'. Use YYYY-MM-DD")))
}

fn require_session(service: &FitlogService) -> Result<Session, ApiError> {
    service
        .session()
        .context("database error")?
        .ok_or_else(|| ApiError::Conflict("No user has completed onboarding".to_string()))
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Profile ---

async fn get_profile(State(state): State<AppState>) -> Result<Json<User>, ApiError> {
    let service = state.service();
    let session = require_session(&service)?;
    let user = service.current_user(&session).context("database error")?;
    Ok(Json(user))
}

async fn complete_onboarding(
    State(state): State<AppState>,
    Json(profile): Json<UserProfile>,
) -> Result<Json<User>, ApiError> {
    validate_profile(&profile).map_err(bad_request)?;
    let service = state.service();
    let session = service
        .complete_onboarding(&profile)
        .context("failed to complete onboarding")?;
    let user = service.current_user(&session).context("database error")?;
    Ok(Json(user))
}

async fn logout(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    let service = state.service();
    let session = require_session(&service)?;
    service.logout(&session).context("failed to log out")?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Meals ---

async fn get_meals(
    State(state): State<AppState>,
    Path(date_str): Path<String>,
) -> Result<Json<Vec<MealEntry>>, ApiError> {
    let date = parse_date(&date_str)?;
    let service = state.service();
    let session = require_session(&service)?;
    let entries = service
        .get_meal_entries(&session, date)
        .context("database error")?;
    Ok(Json(entries))
}

async fn create_meal(
    State(state): State<AppState>,
    Json(req): Json<CreateMealRequest>,
) -> Result<(StatusCode, Json<MealEntry>), ApiError> {
    let date = parse_date(&req.date)?;
    let meal_type = validate_meal_type(&req.meal_type).map_err(bad_request)?;

    let service = state.service();
    let session = require_session(&service)?;

    let entry = if let Some(food_id) = req.food_id {
        service
            .database()
            .get_personal_food(&session.user_id, food_id)
            .map_err(|_| ApiError::BadRequest(format!("Food with id {food_id} not found")))?;
        service
            .log_food(&session, food_id, &meal_type, date)
            .context("failed to insert meal entry")?
    } else {
        let (Some(food_name), Some(calories)) = (req.food_name, req.calories) else {
            return Err(ApiError::BadRequest(
                "Provide either food_id or food_name and calories".to_string(),
            ));
        };
        let new_entry = NewMealEntry {
            food_id: None,
            food_name,
            calories,
            protein: req.protein,
            carbs: req.carbs,
            fat: req.fat,
            meal_type,
            date,
        };
        validate_new_meal(&new_entry).map_err(bad_request)?;
        service
            .log_meal(&session, &new_entry)
            .context("failed to insert meal entry")?
    };

    Ok((StatusCode::CREATED, Json(entry)))
}

async fn delete_meal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let service = state.service();
    let session = require_session(&service)?;
    if service.delete_meal(&session, id).context("database error")? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Meal entry {id} not found")))
    }
}

async fn get_daily_summary(
    State(state): State<AppState>,
    Path(date_str): Path<String>,
) -> Result<Json<DailySummary>, ApiError> {
    let date = parse_date(&date_str)?;
    let service = state.service();
    let session = require_session(&service)?;
    let summary = service
        .get_daily_summary(&session, date)
        .context("database error")?;
    Ok(Json(summary))
}

// --- Weight and steps ---

async fn create_weight(
    State(state): State<AppState>,
    Json(req): Json<CreateWeightRequest>,
) -> Result<(StatusCode, Json<WeightEntry>), ApiError> {
    let date = parse_date(&req.date)?;
    validate_weight(req.weight_kg).map_err(bad_request)?;

    let service = state.service();
    let session = require_session(&service)?;
    let entry = service
        .log_weight(
            &session,
            &NewWeightEntry {
                weight_kg: req.weight_kg,
                image_uri: req.image_uri,
                note: req.note,
                date,
            },
        )
        .context("failed to insert weight")?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn get_weight_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<WeightEntry>>, ApiError> {
    if params.days.is_some_and(|d| d <= 0) {
        return Err(ApiError::BadRequest("days must be greater than 0".to_string()));
    }
    let service = state.service();
    let session = require_session(&service)?;
    let entries = service
        .get_weight_history(&session, params.days)
        .context("database error")?;
    Ok(Json(entries))
}

async fn create_steps(
    State(state): State<AppState>,
    Json(req): Json<CreateStepsRequest>,
) -> Result<(StatusCode, Json<StepsEntry>), ApiError> {
    let date = parse_date(&req.date)?;
    if req.steps < 0 {
        return Err(ApiError::BadRequest("steps must not be negative".to_string()));
    }
    let service = state.service();
    let session = require_session(&service)?;
    let entry = service
        .log_steps(&session, date, req.steps)
        .context("failed to insert steps")?;
    Ok((StatusCode::CREATED, Json(entry)))
}

// --- Preferences ---

async fn get_preferences(State(state): State<AppState>) -> Result<Json<UserPreferences>, ApiError> {
    let service = state.service();
    let session = require_session(&service)?;
    let prefs = service.get_preferences(&session).context("database error")?;
    Ok(Json(prefs))
}

async fn save_preferences(
    State(state): State<AppState>,
    Json(prefs): Json<UserPreferences>,
) -> Result<Json<UserPreferences>, ApiError> {
    validate_preferences(&prefs).map_err(bad_request)?;
    let service = state.service();
    let session = require_session(&service)?;
    let saved = service
        .save_preferences(&session, &prefs)
        .context("failed to save preferences")?;
    Ok(Json(saved))
}

// --- Chat ---

async fn get_chat(State(state): State<AppState>) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let service = state.service();
    let session = require_session(&service)?;
    let history = service.get_chat_history(&session).context("database error")?;
    Ok(Json(history))
}

async fn clear_chat(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    let service = state.service();
    let session = require_session(&service)?;
    service
        .clear_chat_history(&session)
        .context("database error")?;
    Ok(StatusCode::NO_CONTENT)
}

async fn send_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<AnalysisOutcome<ChatMessage>>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }
    let provider = Arc::clone(&state.provider);
    let service = state.service();
    let session = require_session(&service)?;
    let outcome = tokio::task::block_in_place(|| {
        service.send_chat_message(provider.as_ref(), &session, &req.message)
    })
    .context("failed to send chat message")?;
    Ok(Json(outcome))
}

// --- Analysis ---

async fn analyze_day(
    State(state): State<AppState>,
    Path(date_str): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let date = parse_date(&date_str)?;
    let provider = Arc::clone(&state.provider);
    let service = state.service();
    let session = require_session(&service)?;
    let outcome =
        tokio::task::block_in_place(|| service.analyze_day(provider.as_ref(), &session, date))
            .context("failed to analyze day")?;
    let value = serde_json::to_value(outcome).context("failed to serialize analysis")?;
    Ok(Json(value))
}

async fn analyze_photo(
    State(state): State<AppState>,
    Json(req): Json<PhotoRequest>,
) -> Result<Json<PhotoResponse>, ApiError> {
    let encoded = req
        .image
        .split_once("base64,")
        .map_or(req.image.as_str(), |(_, data)| data);
    let data = STANDARD
        .decode(encoded.trim())
        .map_err(|_| ApiError::BadRequest("image must be base64 encoded".to_string()))?;
    if data.is_empty() {
        return Err(ApiError::BadRequest("image must not be empty".to_string()));
    }
    let image = FoodImage {
        mime_type: req.mime_type,
        data,
    };

    let provider = Arc::clone(&state.provider);
    let service = state.service();
    let session = require_session(&service)?;
    let outcome = tokio::task::block_in_place(|| {
        service.analyze_food_photo(provider.as_ref(), &image, req.hint.as_deref())
    });

    let food = match (&outcome.data, req.save) {
        (Some(analysis), true) => Some(
            service
                .save_food(&session, &analysis.to_new_food(None))
                .context("failed to save food")?,
        ),
        _ => None,
    };

    Ok(Json(PhotoResponse { outcome, food }))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/profile", get(get_profile))
        .route("/api/onboarding", post(complete_onboarding))
        .route("/api/logout", post(logout))
        .route("/api/meals", post(create_meal))
        .route("/api/meals/{key}", get(get_meals).delete(delete_meal))
        .route("/api/summary/{date}", get(get_daily_summary))
        .route("/api/weight", post(create_weight).get(get_weight_history))
        .route("/api/steps", post(create_steps))
        .route(
            "/api/preferences",
            get(get_preferences).put(save_preferences),
        )
        .route("/api/chat", get(get_chat).post(send_chat).delete(clear_chat))
        .route("/api/analysis/day/{date}", post(analyze_day))
        .route("/api/analysis/photo", post(analyze_photo))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    service: FitlogService,
    provider: Arc<dyn AnalysisProvider>,
    port: u16,
    bind: &str,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    let state = AppState {
        service: Arc::new(Mutex::new(service)),
        provider,
        api_key: api_key.clone(),
    };

    let app = build_router(state);

    if let Some(ref key) = api_key {
        eprintln!(
            "API key: {}...{} (see api_key file in data directory)",
            key.get(..4).unwrap_or_default(),
            key.get(key.len().saturating_sub(4)..).unwrap_or_default(),
        );
    } else {
        warn!("authentication disabled (--no-auth); the API is open to anyone");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        warn!(%bind, "listening on a non-loopback address with no authentication");
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    info!(%bind, port, "server listening");
    eprintln!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
