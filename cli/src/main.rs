mod ai_client;
mod commands;
mod config;
mod server;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::ai_client::build_provider;
use crate::commands::{
    LogArgs, PrefsArgs, ProfileArgs, cmd_analyze_day, cmd_analyze_photo, cmd_chat_clear,
    cmd_chat_history, cmd_chat_send, cmd_db_reset, cmd_db_status, cmd_food_add, cmd_food_delete,
    cmd_food_list, cmd_history, cmd_init, cmd_log, cmd_logout, cmd_meal_delete, cmd_onboard,
    cmd_prefs_set, cmd_prefs_show, cmd_profile, cmd_seed, cmd_steps_delete, cmd_steps_history,
    cmd_steps_log, cmd_summary, cmd_today, cmd_weight_delete, cmd_weight_history, cmd_weight_log,
    prompt_choice,
};
use crate::config::Config;
use fitlog_core::db::Database;
use fitlog_core::migrate::MigrationReport;
use fitlog_core::models::NewPersonalFood;
use fitlog_core::service::FitlogService;

#[derive(Parser)]
#[command(
    name = "fitlog",
    version,
    about = "Track meals, weight and steps, with an optional nutrition assistant"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or repair the database and show what changed
    Init {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set up your profile (goal, activity, body measurements)
    Onboard {
        /// Goal: decrease, maintain or increase
        #[arg(long)]
        goal: String,
        /// Sport activity: none, light, moderate, active, very_active
        #[arg(long, default_value = "none")]
        activity: String,
        /// Height in cm
        #[arg(long)]
        height: f64,
        /// Weight in kg
        #[arg(long)]
        weight: f64,
        /// Gender: male, female or other
        #[arg(long)]
        gender: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show your profile, or change parts of it
    Profile {
        #[arg(long)]
        goal: Option<String>,
        #[arg(long)]
        activity: Option<String>,
        /// Height in cm
        #[arg(long)]
        height: Option<f64>,
        /// Weight in kg
        #[arg(long)]
        weight: Option<f64>,
        #[arg(long)]
        gender: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete your profile and everything logged under it
    Logout {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage saved foods
    Food {
        #[command(subcommand)]
        command: FoodCommands,
    },
    /// Log a meal entry, by name or from a saved food
    Log {
        /// Food name (omit when using --food-id)
        name: Option<String>,
        /// Log a saved food by ID
        #[arg(long)]
        food_id: Option<i64>,
        /// Meal type: breakfast, lunch, dinner, snack
        #[arg(short, long, default_value = "snack")]
        meal: String,
        /// Calories, required when logging by name
        #[arg(short, long)]
        calories: Option<f64>,
        #[arg(long, default_value = "0")]
        protein: f64,
        #[arg(long, default_value = "0")]
        carbs: f64,
        #[arg(long, default_value = "0")]
        fat: f64,
        /// Date to log for (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List today's meal entries
    Today {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show daily summary (defaults to today)
    Summary {
        /// Date to show (YYYY-MM-DD, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show calories per day for the last N days
    History {
        /// Number of days to show
        #[arg(short, long, default_value = "7")]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage meal entries
    Meal {
        #[command(subcommand)]
        command: MealCommands,
    },
    /// Track body weight
    Weight {
        #[command(subcommand)]
        command: WeightCommands,
    },
    /// Track daily steps
    Steps {
        #[command(subcommand)]
        command: StepsCommands,
    },
    /// Show or change display preferences
    Prefs {
        #[command(subcommand)]
        command: PrefsCommands,
    },
    /// Ask the assistant to review a day or estimate a food photo
    Analyze {
        #[command(subcommand)]
        command: AnalyzeCommands,
    },
    /// Talk to the nutrition assistant
    Chat {
        #[command(subcommand)]
        command: ChatCommands,
    },
    /// Inspect or reset the database
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Create a demo profile with 30 days of history
    Seed {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
enum FoodCommands {
    /// Save a food for quick logging
    Add {
        /// Food name
        name: String,
        /// Calories per serving
        #[arg(long)]
        calories: f64,
        #[arg(long, default_value = "0")]
        protein: f64,
        #[arg(long, default_value = "0")]
        carbs: f64,
        #[arg(long, default_value = "0")]
        fat: f64,
        #[arg(long, default_value = "other")]
        category: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List or search saved foods
    List {
        /// Only foods whose name contains this text
        #[arg(short, long)]
        search: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a saved food by ID
    Delete {
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum MealCommands {
    /// Delete a meal entry by ID
    Delete {
        /// Entry ID to delete
        entry_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum WeightCommands {
    /// Log a weight entry
    Log {
        /// Weight value (number)
        value: f64,
        /// Unit: kg or lbs (default: kg)
        #[arg(short, long, default_value = "kg")]
        unit: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Optional note
        #[arg(long)]
        note: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show weight history, newest first
    History {
        /// Number of entries to show (default: all)
        #[arg(short, long)]
        days: Option<u32>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a weight entry by ID
    Delete {
        /// Weight entry ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum StepsCommands {
    /// Add steps for a day
    Log {
        steps: i64,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show step entries, newest first
    History {
        /// Number of entries to show (default: all)
        #[arg(short, long)]
        days: Option<u32>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a steps entry by ID
    Delete {
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PrefsCommands {
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change one or more preferences
    Set {
        #[arg(long)]
        hide_photos: Option<bool>,
        /// Chart type: line or bar
        #[arg(long)]
        chart: Option<String>,
        /// Time range: week, month or year
        #[arg(long)]
        range: Option<String>,
        /// Metric: weight, calories or steps
        #[arg(long)]
        metric: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum AnalyzeCommands {
    /// Score a day's intake against your calorie target
    Day {
        /// Date (YYYY-MM-DD, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Estimate the nutrition of a food photo
    Photo {
        /// Image file (jpg, png, webp, gif, heic)
        path: PathBuf,
        /// Short description to help the estimate
        #[arg(long)]
        hint: Option<String>,
        /// Save the result as a personal food
        #[arg(long)]
        save: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ChatCommands {
    /// Send a message and print the reply
    Send {
        message: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the conversation so far
    History {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete the conversation
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Show schema version, tables and the current user
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop all tables and recreate an empty schema
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FITLOG_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Connects and migrates. When the schema cannot be created an interactive
/// user may reset, retry or quit.
fn open_service(path: &Path, interactive: bool) -> Result<(FitlogService, MigrationReport)> {
    let db = Database::connect(path)?;
    loop {
        let err = match db.init() {
            Ok(report) => return Ok((FitlogService::from_database(db), report)),
            Err(e) => e,
        };

        if !interactive {
            return Err(err.context("Database is unusable. Run `fitlog db reset` to start over"));
        }

        eprintln!("Error: {err:#}");
        match prompt_choice(
            "The database could not be initialised. What would you like to do?",
            &["reset", "retry", "quit"],
        )? {
            0 => {
                warn!(path = %path.display(), "resetting database after failed init");
                let report = db.reset()?;
                return Ok((FitlogService::from_database(db), report));
            }
            1 => info!("retrying database init"),
            _ => bail!("Database initialisation aborted"),
        }
    }
}

#[allow(clippy::too_many_lines)]
fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    // Reset must work on a schema that init cannot repair.
    if let Commands::Db {
        command: DbCommands::Reset { yes, json },
    } = cli.command
    {
        let db = Database::connect(&config.db_path)?;
        return cmd_db_reset(&db, yes, json);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let (service, report) = open_service(&config.db_path, std::io::stdin().is_terminal())?;
    let provider = {
        let _guard = runtime.enter();
        build_provider(&config.ai)?
    };

    match cli.command {
        Commands::Init { json } => cmd_init(&report, json),
        Commands::Onboard {
            goal,
            activity,
            height,
            weight,
            gender,
            json,
        } => cmd_onboard(&service, &goal, &activity, height, weight, &gender, json),
        Commands::Profile {
            goal,
            activity,
            height,
            weight,
            gender,
            json,
        } => cmd_profile(
            &service,
            ProfileArgs {
                goal,
                activity,
                height,
                weight,
                gender,
            },
            json,
        ),
        Commands::Logout { yes, json } => cmd_logout(&service, yes, json),
        Commands::Food { command } => match command {
            FoodCommands::Add {
                name,
                calories,
                protein,
                carbs,
                fat,
                category,
                json,
            } => cmd_food_add(
                &service,
                NewPersonalFood {
                    name,
                    calories,
                    protein,
                    carbs,
                    fat,
                    category: category.to_lowercase(),
                    image_uri: None,
                    from_photo: false,
                },
                json,
            ),
            FoodCommands::List { search, json } => {
                cmd_food_list(&service, search.as_deref(), json)
            }
            FoodCommands::Delete { id, json } => cmd_food_delete(&service, id, json),
        },
        Commands::Log {
            name,
            food_id,
            meal,
            calories,
            protein,
            carbs,
            fat,
            date,
            json,
        } => cmd_log(
            &service,
            LogArgs {
                name,
                food_id,
                meal,
                calories,
                protein,
                carbs,
                fat,
                date,
            },
            json,
        ),
        Commands::Today { json } => cmd_today(&service, json),
        Commands::Summary { date, json } => cmd_summary(&service, date, json),
        Commands::History { days, json } => cmd_history(&service, days, json),
        Commands::Meal { command } => match command {
            MealCommands::Delete { entry_id, json } => cmd_meal_delete(&service, entry_id, json),
        },
        Commands::Weight { command } => match command {
            WeightCommands::Log {
                value,
                unit,
                date,
                note,
                json,
            } => cmd_weight_log(&service, value, &unit, date, note, json),
            WeightCommands::History { days, json } => cmd_weight_history(&service, days, json),
            WeightCommands::Delete { id, json } => cmd_weight_delete(&service, id, json),
        },
        Commands::Steps { command } => match command {
            StepsCommands::Log { steps, date, json } => cmd_steps_log(&service, steps, date, json),
            StepsCommands::History { days, json } => cmd_steps_history(&service, days, json),
            StepsCommands::Delete { id, json } => cmd_steps_delete(&service, id, json),
        },
        Commands::Prefs { command } => match command {
            PrefsCommands::Show { json } => cmd_prefs_show(&service, json),
            PrefsCommands::Set {
                hide_photos,
                chart,
                range,
                metric,
                json,
            } => cmd_prefs_set(
                &service,
                PrefsArgs {
                    hide_photos,
                    chart_type: chart,
                    time_range: range,
                    metric,
                },
                json,
            ),
        },
        Commands::Analyze { command } => match command {
            AnalyzeCommands::Day { date, json } => {
                cmd_analyze_day(&service, provider.as_ref(), date, json)
            }
            AnalyzeCommands::Photo {
                path,
                hint,
                save,
                json,
            } => cmd_analyze_photo(
                &service,
                provider.as_ref(),
                &path,
                hint.as_deref(),
                save,
                json,
            ),
        },
        Commands::Chat { command } => match command {
            ChatCommands::Send { message, json } => {
                cmd_chat_send(&service, provider.as_ref(), &message, json)
            }
            ChatCommands::History { json } => cmd_chat_history(&service, json),
            ChatCommands::Clear { yes, json } => cmd_chat_clear(&service, yes, json),
        },
        Commands::Db { command } => match command {
            DbCommands::Status { json } => cmd_db_status(&service, json),
            DbCommands::Reset { yes, json } => cmd_db_reset(service.database(), yes, json),
        },
        Commands::Seed { json } => cmd_seed(&service, json),
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let api_key = if no_auth {
                None
            } else {
                let (key, created) = config.load_or_create_api_key()?;
                if created {
                    info!("generated a new REST API key");
                }
                Some(key)
            };
            runtime.block_on(server::start_server(
                service,
                Arc::from(provider),
                port,
                &bind,
                api_key,
            ))
        }
    }
}
