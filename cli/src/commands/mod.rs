mod analyze;
mod chat;
mod database;
mod food;
mod helpers;
mod meal;
mod prefs;
mod profile;
mod steps;
mod summary;
mod weight;

pub(crate) use analyze::{cmd_analyze_day, cmd_analyze_photo};
pub(crate) use chat::{cmd_chat_clear, cmd_chat_history, cmd_chat_send};
pub(crate) use database::{cmd_db_reset, cmd_db_status, cmd_init, cmd_seed};
pub(crate) use food::{cmd_food_add, cmd_food_delete, cmd_food_list};
pub(crate) use helpers::prompt_choice;
pub(crate) use meal::{LogArgs, cmd_log, cmd_meal_delete, cmd_today};
pub(crate) use prefs::{PrefsArgs, cmd_prefs_set, cmd_prefs_show};
pub(crate) use profile::{ProfileArgs, cmd_logout, cmd_onboard, cmd_profile};
pub(crate) use steps::{cmd_steps_delete, cmd_steps_history, cmd_steps_log};
pub(crate) use summary::{cmd_history, cmd_summary};
pub(crate) use weight::{cmd_weight_delete, cmd_weight_history, cmd_weight_log};
