use anyhow::Result;

use fitlog_core::models::UserPreferences;
use fitlog_core::service::FitlogService;

use super::helpers::{print_json, session};

#[derive(Default)]
pub(crate) struct PrefsArgs {
    pub hide_photos: Option<bool>,
    pub chart_type: Option<String>,
    pub time_range: Option<String>,
    pub metric: Option<String>,
}

impl PrefsArgs {
    fn merge(self, mut prefs: UserPreferences) -> UserPreferences {
        if let Some(hide) = self.hide_photos {
            prefs.hide_photos = hide;
        }
        if let Some(chart) = self.chart_type {
            prefs.chart_type = chart.to_lowercase();
        }
        if let Some(range) = self.time_range {
            prefs.time_range = range.to_lowercase();
        }
        if let Some(metric) = self.metric {
            prefs.metric = metric.to_lowercase();
        }
        prefs
    }
}

fn print_prefs(prefs: &UserPreferences) {
    println!("Hide photos: {}", if prefs.hide_photos { "yes" } else { "no" });
    println!("Chart type:  {}", prefs.chart_type);
    println!("Time range:  {}", prefs.time_range);
    println!("Metric:      {}", prefs.metric);
}

pub(crate) fn cmd_prefs_show(service: &FitlogService, json: bool) -> Result<()> {
    let session = session(service)?;
    let prefs = service.get_preferences(&session)?;
    if json {
        print_json(&prefs)
    } else {
        print_prefs(&prefs);
        Ok(())
    }
}

pub(crate) fn cmd_prefs_set(service: &FitlogService, args: PrefsArgs, json: bool) -> Result<()> {
    let session = session(service)?;
    let prefs = args.merge(service.get_preferences(&session)?);
    let saved = service.save_preferences(&session, &prefs)?;

    if json {
        print_json(&saved)
    } else {
        println!("Preferences saved.\n");
        print_prefs(&saved);
        Ok(())
    }
}
