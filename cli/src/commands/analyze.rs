use anyhow::{Context, Result, bail};
use std::path::Path;

use fitlog_core::analysis::{AnalysisProvider, FoodImage};
use fitlog_core::service::FitlogService;

use super::helpers::{parse_date, print_json, session};

fn mime_for(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "png" => Ok("image/png"),
        "webp" => Ok("image/webp"),
        "gif" => Ok("image/gif"),
        "heic" => Ok("image/heic"),
        _ => bail!("Unsupported image type '{}'. Use jpg, png, webp, gif or heic", path.display()),
    }
}

pub(crate) fn cmd_analyze_day(
    service: &FitlogService,
    provider: &dyn AnalysisProvider,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let session = session(service)?;
    let date = parse_date(date)?;
    let outcome = service.analyze_day(provider, &session, date)?;

    if json {
        return print_json(&outcome);
    }

    let Some(analysis) = outcome.data else {
        bail!(
            "Day analysis failed: {}",
            outcome.error.unwrap_or_else(|| "unknown error".to_string())
        );
    };

    println!("=== {} ===\n", analysis.date);
    println!("  Score: {}/100", analysis.score);
    println!(
        "  Calories: {:.0} of {:.0} kcal ({:.0} remaining)",
        analysis.calories_consumed, analysis.calorie_target, analysis.calories_remaining
    );
    println!(
        "  Macros: P:{:.0}g C:{:.0}g F:{:.0}g",
        analysis.protein, analysis.carbs, analysis.fat
    );
    println!("  Steps: {}\n", analysis.steps);
    for insight in &analysis.insights {
        println!("  - {insight}");
    }
    if !analysis.recommendation.is_empty() {
        println!("\n  {}", analysis.recommendation);
    }
    Ok(())
}

pub(crate) fn cmd_analyze_photo(
    service: &FitlogService,
    provider: &dyn AnalysisProvider,
    path: &Path,
    hint: Option<&str>,
    save: bool,
    json: bool,
) -> Result<()> {
    let mime_type = mime_for(path)?;
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let image = FoodImage {
        mime_type: mime_type.to_string(),
        data,
    };

    let outcome = service.analyze_food_photo(provider, &image, hint);
    let saved = match (&outcome.data, save) {
        (Some(analysis), true) => {
            let session = session(service)?;
            let uri = path
                .canonicalize()
                .ok()
                .map(|p| p.to_string_lossy().into_owned());
            Some(service.save_food(&session, &analysis.to_new_food(uri))?)
        }
        _ => None,
    };

    if json {
        return print_json(&serde_json::json!({
            "success": outcome.success,
            "data": outcome.data,
            "error": outcome.error,
            "food": saved,
        }));
    }

    let Some(analysis) = outcome.data else {
        bail!(
            "Photo analysis failed: {}",
            outcome.error.unwrap_or_else(|| "unknown error".to_string())
        );
    };

    println!(
        "{} ({}): {:.0} kcal | P:{:.0}g C:{:.0}g F:{:.0}g",
        analysis.name,
        analysis.category,
        analysis.calories,
        analysis.protein,
        analysis.carbs,
        analysis.fat
    );
    println!("Confidence: {:.0}%", analysis.confidence * 100.0);
    if let Some(food) = saved {
        println!("Saved as food {}. Log it with `fitlog log --food-id {}`", food.id, food.id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitlog_core::analysis::MockAnalyzer;
    use fitlog_core::models::{Gender, Goal, UserProfile};
    use std::io::Write;

    fn onboarded() -> FitlogService {
        let service = FitlogService::new_in_memory().unwrap();
        service
            .complete_onboarding(&UserProfile {
                goal: Goal::Decrease,
                sport_activity: "moderate".to_string(),
                height_cm: 175.0,
                weight_kg: 82.0,
                gender: Gender::Male,
            })
            .unwrap();
        service
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for(Path::new("a/b/lunch.JPG")).unwrap(), "image/jpeg");
        assert_eq!(mime_for(Path::new("plate.png")).unwrap(), "image/png");
        assert!(mime_for(Path::new("notes.txt")).is_err());
        assert!(mime_for(Path::new("noext")).is_err());
    }

    #[test]
    fn test_analyze_day_with_mock() {
        let service = onboarded();
        cmd_analyze_day(&service, &MockAnalyzer::at_hour(12), None, false).unwrap();
    }

    #[test]
    fn test_analyze_photo_saves_food() {
        let service = onboarded();
        let mut file = tempfile::Builder::new().suffix(".jpg").tempfile().unwrap();
        file.write_all(b"\xff\xd8\xff fake jpeg").unwrap();

        cmd_analyze_photo(
            &service,
            &MockAnalyzer::at_hour(8),
            file.path(),
            Some("leftover pizza"),
            true,
            true,
        )
        .unwrap();

        let session = service.require_session().unwrap();
        let foods = service.list_foods(&session, None).unwrap();
        assert_eq!(foods.len(), 1);
        assert_eq!(foods[0].name, "Margherita pizza");
        assert!(foods[0].from_photo);
        assert!(foods[0].image_uri.is_some());
    }

    #[test]
    fn test_analyze_photo_missing_file() {
        let service = onboarded();
        let err = cmd_analyze_photo(
            &service,
            &MockAnalyzer::new(),
            Path::new("/nonexistent/meal.png"),
            None,
            false,
            true,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
