use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::io::{self, BufRead, IsTerminal, Write};

use fitlog_core::service::{FitlogService, Session};

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Session for the onboarded user, with a hint when there is none.
pub(crate) fn session(service: &FitlogService) -> Result<Session> {
    service
        .session()?
        .context("No profile yet. Run `fitlog onboard` first")
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Reads one line from stdin after printing `prompt` to stderr.
pub(crate) fn read_line(prompt: &str) -> Result<String> {
    eprint!("{prompt}");
    io::stderr().flush()?;
    let stdin = io::stdin();
    let line = stdin.lock().lines().next().context("No input")??;
    Ok(line.trim().to_string())
}

/// Asks the user to pick one of `options` by number or by name.
pub(crate) fn prompt_choice(question: &str, options: &[&str]) -> Result<usize> {
    eprintln!("\n{question}");
    for (i, option) in options.iter().enumerate() {
        eprintln!("  {}) {option}", i + 1);
    }
    let answer = read_line(&format!("Select (1-{}): ", options.len()))?;
    choice_index(&answer, options)
}

fn choice_index(answer: &str, options: &[&str]) -> Result<usize> {
    let answer = answer.trim().to_lowercase();
    if let Ok(n) = answer.parse::<usize>() {
        if n < 1 || n > options.len() {
            bail!("Selection out of range");
        }
        return Ok(n - 1);
    }
    options
        .iter()
        .position(|o| o.eq_ignore_ascii_case(&answer))
        .with_context(|| format!("Unknown choice '{answer}'"))
}

/// Destructive commands need `--yes`, or an interactive confirmation.
pub(crate) fn confirm(question: &str, yes: bool) -> Result<()> {
    if yes {
        return Ok(());
    }
    if !io::stdin().is_terminal() {
        bail!("Refusing to continue without confirmation. Pass --yes");
    }
    let answer = read_line(&format!("{question} [y/N] "))?;
    if matches!(answer.to_lowercase().as_str(), "y" | "yes") {
        Ok(())
    } else {
        bail!("Aborted")
    }
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_none() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(None).unwrap(), today);
    }

    #[test]
    fn test_parse_date_keywords() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(Some("today".to_string())).unwrap(), today);
        assert_eq!(
            parse_date(Some("yesterday".to_string())).unwrap(),
            today - chrono::Duration::days(1)
        );
        assert_eq!(
            parse_date(Some("tomorrow".to_string())).unwrap(),
            today + chrono::Duration::days(1)
        );
    }

    #[test]
    fn test_parse_date_iso() {
        let date = parse_date(Some("2024-01-15".to_string())).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date(Some("nope".to_string())).is_err());
    }

    #[test]
    fn test_choice_index() {
        let options = ["reset", "retry", "quit"];
        assert_eq!(choice_index("1", &options).unwrap(), 0);
        assert_eq!(choice_index(" 3 ", &options).unwrap(), 2);
        assert_eq!(choice_index("Retry", &options).unwrap(), 1);
        assert!(choice_index("0", &options).is_err());
        assert!(choice_index("4", &options).is_err());
        assert!(choice_index("panic", &options).is_err());
    }

    #[test]
    fn test_session_hint_without_user() {
        let service = FitlogService::new_in_memory().unwrap();
        let err = session(&service).unwrap_err();
        assert!(err.to_string().contains("fitlog onboard"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world this is long", 10), "hello w...");
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
    }

    #[test]
    fn test_no_neg_zero() {
        assert_eq!(no_neg_zero(-0.0).to_bits(), 0.0_f64.to_bits());
        assert_eq!(no_neg_zero(5.0), 5.0);
    }
}
