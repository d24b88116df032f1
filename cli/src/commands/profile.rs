use anyhow::Result;

use fitlog_core::analysis::estimate_daily_calories;
use fitlog_core::models::{Gender, Goal, User, UserProfile};
use fitlog_core::service::FitlogService;

use super::helpers::{confirm, print_json, session};

/// Optional profile fields from the command line.
pub(crate) struct ProfileArgs {
    pub goal: Option<String>,
    pub activity: Option<String>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub gender: Option<String>,
}

impl ProfileArgs {
    fn is_empty(&self) -> bool {
        self.goal.is_none()
            && self.activity.is_none()
            && self.height.is_none()
            && self.weight.is_none()
            && self.gender.is_none()
    }

    fn apply(self, mut profile: UserProfile) -> Result<UserProfile> {
        if let Some(goal) = self.goal {
            profile.goal = goal.parse::<Goal>()?;
        }
        if let Some(activity) = self.activity {
            profile.sport_activity = activity.trim().to_lowercase();
        }
        if let Some(height) = self.height {
            profile.height_cm = height;
        }
        if let Some(weight) = self.weight {
            profile.weight_kg = weight;
        }
        if let Some(gender) = self.gender {
            profile.gender = gender.parse::<Gender>()?;
        }
        Ok(profile)
    }
}

fn print_user(user: &User) {
    println!("Goal:      {}", user.goal);
    println!("Activity:  {}", user.sport_activity);
    println!("Height:    {:.0} cm", user.height_cm);
    println!("Weight:    {:.1} kg", user.weight_kg);
    println!("Gender:    {}", user.gender);
    println!(
        "Target:    ~{:.0} kcal/day",
        estimate_daily_calories(&user.profile())
    );
}

pub(crate) fn cmd_onboard(
    service: &FitlogService,
    goal: &str,
    activity: &str,
    height: f64,
    weight: f64,
    gender: &str,
    json: bool,
) -> Result<()> {
    let profile = UserProfile {
        goal: goal.parse()?,
        sport_activity: activity.trim().to_lowercase(),
        height_cm: height,
        weight_kg: weight,
        gender: gender.parse()?,
    };
    let session = service.complete_onboarding(&profile)?;
    let user = service.current_user(&session)?;

    if json {
        print_json(&user)?;
    } else {
        println!("Profile saved.\n");
        print_user(&user);
    }
    Ok(())
}

pub(crate) fn cmd_profile(service: &FitlogService, updates: ProfileArgs, json: bool) -> Result<()> {
    let session = session(service)?;
    let mut user = service.current_user(&session)?;

    if !updates.is_empty() {
        let profile = updates.apply(user.profile())?;
        user = service.update_profile(&session, &profile)?;
    }

    if json {
        print_json(&user)?;
    } else {
        print_user(&user);
    }
    Ok(())
}

pub(crate) fn cmd_logout(service: &FitlogService, yes: bool, json: bool) -> Result<()> {
    let session = session(service)?;
    confirm(
        "Log out and permanently delete your profile and all logged data?",
        yes,
    )?;
    let removed = service.logout(&session)?;

    if json {
        print_json(&serde_json::json!({ "logged_out": removed }))?;
    } else {
        println!("Logged out. All data for this profile was removed.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> UserProfile {
        UserProfile {
            goal: Goal::Maintain,
            sport_activity: "none".to_string(),
            height_cm: 170.0,
            weight_kg: 70.0,
            gender: Gender::Other,
        }
    }

    #[test]
    fn test_profile_args_apply() {
        let args = ProfileArgs {
            goal: Some("lose".to_string()),
            activity: Some(" Active ".to_string()),
            height: None,
            weight: Some(68.0),
            gender: None,
        };
        assert!(!args.is_empty());

        let profile = args.apply(base()).unwrap();
        assert_eq!(profile.goal, Goal::Decrease);
        assert_eq!(profile.sport_activity, "active");
        assert!((profile.weight_kg - 68.0).abs() < f64::EPSILON);
        assert!((profile.height_cm - 170.0).abs() < f64::EPSILON);
        assert_eq!(profile.gender, Gender::Other);
    }

    #[test]
    fn test_profile_args_reject_bad_gender() {
        let args = ProfileArgs {
            goal: None,
            activity: None,
            height: None,
            weight: None,
            gender: Some("robot".to_string()),
        };
        assert!(args.apply(base()).is_err());
    }

    #[test]
    fn test_onboard_then_logout() {
        let service = FitlogService::new_in_memory().unwrap();
        cmd_onboard(&service, "decrease", "light", 165.0, 60.0, "f", true).unwrap();
        assert!(service.has_user().unwrap());

        cmd_logout(&service, true, true).unwrap();
        assert!(!service.has_user().unwrap());
    }
}
