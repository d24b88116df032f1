use anyhow::{Result, bail};

use fitlog_core::analysis::AnalysisProvider;
use fitlog_core::models::{ChatMessage, ChatRole};
use fitlog_core::service::FitlogService;

use super::helpers::{confirm, print_json, session};

fn speaker(role: ChatRole) -> &'static str {
    match role {
        ChatRole::User => "you",
        ChatRole::Assistant => "coach",
    }
}

fn print_message(m: &ChatMessage) {
    println!("{:>5}: {}", speaker(m.role), m.content);
}

pub(crate) fn cmd_chat_send(
    service: &FitlogService,
    provider: &dyn AnalysisProvider,
    message: &str,
    json: bool,
) -> Result<()> {
    let session = session(service)?;
    let outcome = service.send_chat_message(provider, &session, message)?;

    if json {
        return print_json(&outcome);
    }
    match outcome.data {
        Some(reply) => print_message(&reply),
        None => bail!(
            "Assistant did not answer: {}",
            outcome.error.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
    Ok(())
}

pub(crate) fn cmd_chat_history(service: &FitlogService, json: bool) -> Result<()> {
    let session = session(service)?;
    let history = service.get_chat_history(&session)?;

    if json {
        print_json(&history)?;
    } else if history.is_empty() {
        eprintln!("No conversation yet. Try `fitlog chat send \"how am I doing?\"`");
    } else {
        for m in &history {
            print_message(m);
        }
    }
    Ok(())
}

pub(crate) fn cmd_chat_clear(service: &FitlogService, yes: bool, json: bool) -> Result<()> {
    let session = session(service)?;
    confirm("Delete the whole conversation?", yes)?;
    let cleared = service.clear_chat_history(&session)?;

    if json {
        print_json(&serde_json::json!({ "cleared": cleared }))?;
    } else if cleared {
        println!("Conversation cleared");
    } else {
        println!("Nothing to clear");
    }
    Ok(())
}
