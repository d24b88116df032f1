use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::AiConfig;
use fitlog_core::analysis::{
    AnalysisProvider, ChatContext, DailyAnalysis, DayContext, FoodAnalysis, FoodImage,
    MockAnalyzer, build_chat_prompt, build_day_prompt, build_food_prompt, parse_daily_analysis,
    parse_food_analysis,
};
use fitlog_core::models::ChatRole;

/// Most recent transcript turns sent along with a chat message.
const CHAT_CONTEXT_TURNS: usize = 20;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Content,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Content {
    Text(String),
    Parts(Vec<Part>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Part {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl Message {
    fn text(role: &'static str, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Content::Text(text.into()),
        }
    }
}

fn role_name(role: ChatRole) -> &'static str {
    match role {
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

fn data_url(image: &FoodImage) -> String {
    format!("data:{};base64,{}", image.mime_type, STANDARD.encode(&image.data))
}

fn chat_messages(ctx: &ChatContext) -> Vec<Message> {
    let skip = ctx.history.len().saturating_sub(CHAT_CONTEXT_TURNS);
    let mut messages = vec![Message::text("system", build_chat_prompt(ctx))];
    messages.extend(
        ctx.history
            .iter()
            .skip(skip)
            .map(|m| Message::text(role_name(m.role), m.content.clone())),
    );
    messages.push(Message::text("user", ctx.message.clone()));
    messages
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct AiClient {
    client: reqwest::Client,
    rt: tokio::runtime::Handle,
    base_url: String,
    model: String,
    api_key: String,
}

impl AiClient {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("FITLOG_AI_API_KEY is not set")?;
        let client = reqwest::Client::builder()
            .user_agent(format!("fitlog-cli/{}", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(60))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            rt: tokio::runtime::Handle::current(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key,
        })
    }

    async fn complete_async(&self, messages: Vec<Message>) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, model = %self.model, "sending completion request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest {
                model: &self.model,
                messages,
                temperature: 0.3,
            })
            .send()
            .await
            .context("Failed to reach assistant API")?;

        let status = resp.status();
        if !status.is_success() {
            bail!("Assistant API returned {status}");
        }

        let data: CompletionResponse = resp
            .json()
            .await
            .context("Failed to parse assistant response")?;

        data.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .context("Assistant returned an empty response")
    }
}

impl AnalysisProvider for AiClient {
    fn analyze_food_photo(&self, image: &FoodImage, hint: Option<&str>) -> Result<FoodAnalysis> {
        let message = Message {
            role: "user",
            content: Content::Parts(vec![
                Part::Text {
                    text: build_food_prompt(hint),
                },
                Part::ImageUrl {
                    image_url: ImageUrl {
                        url: data_url(image),
                    },
                },
            ]),
        };
        let text = self.rt.block_on(self.complete_async(vec![message]))?;
        parse_food_analysis(&text)
    }

    fn analyze_day(&self, ctx: &DayContext) -> Result<DailyAnalysis> {
        let message = Message::text("user", build_day_prompt(ctx));
        let text = self.rt.block_on(self.complete_async(vec![message]))?;
        parse_daily_analysis(&text, ctx)
    }

    fn chat(&self, ctx: &ChatContext) -> Result<String> {
        self.rt.block_on(self.complete_async(chat_messages(ctx)))
    }
}

/// Picks the remote client, or the offline analyzer in mock mode.
pub fn build_provider(config: &AiConfig) -> Result<Box<dyn AnalysisProvider>> {
    if config.use_mock() {
        info!("assistant running in mock mode");
        Ok(Box::new(MockAnalyzer::new()))
    } else {
        info!(model = %config.model, "assistant using remote API");
        Ok(Box::new(AiClient::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use fitlog_core::models::{ChatMessage, DailySummary, Gender, Goal, UserProfile};

    fn chat_context(history: usize) -> ChatContext {
        let summary = DailySummary {
            date: "2024-06-15".to_string(),
            meals: Vec::new(),
            total_calories: 0.0,
            total_protein: 0.0,
            total_carbs: 0.0,
            total_fat: 0.0,
            steps: 0,
            weight_kg: None,
        };
        ChatContext {
            day: DayContext::new(
                UserProfile {
                    goal: Goal::Maintain,
                    sport_activity: "none".to_string(),
                    height_cm: 180.0,
                    weight_kg: 80.0,
                    gender: Gender::Male,
                },
                NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
                &summary,
            ),
            history: (0..history)
                .map(|i| {
                    let role = if i % 2 == 0 {
                        ChatRole::User
                    } else {
                        ChatRole::Assistant
                    };
                    ChatMessage::new(role, format!("turn {i}"))
                })
                .collect(),
            message: "what now?".to_string(),
        }
    }

    #[test]
    fn test_chat_messages_order() {
        let messages = chat_messages(&chat_context(2));
        let roles: Vec<&str> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);

        let json = serde_json::to_value(&messages[3]).unwrap();
        assert_eq!(json["content"], "what now?");
    }

    #[test]
    fn test_chat_messages_keep_recent_turns() {
        let messages = chat_messages(&chat_context(30));
        assert_eq!(messages.len(), CHAT_CONTEXT_TURNS + 2);

        let first_turn = serde_json::to_value(&messages[1]).unwrap();
        assert_eq!(first_turn["content"], "turn 10");
    }

    #[test]
    fn test_image_message_shape() {
        let image = FoodImage {
            mime_type: "image/png".to_string(),
            data: b"abc".to_vec(),
        };
        let message = Message {
            role: "user",
            content: Content::Parts(vec![Part::ImageUrl {
                image_url: ImageUrl {
                    url: data_url(&image),
                },
            }]),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["content"][0]["type"], "image_url");
        assert_eq!(json["content"][0]["image_url"]["url"], "data:image/png;base64,YWJj");
    }

    #[test]
    fn test_build_provider_without_key_is_mock() {
        let config = AiConfig {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            force_mock: false,
        };
        // Mock mode never touches the runtime handle, so no runtime is needed.
        assert!(build_provider(&config).is_ok());
    }

    #[test]
    fn test_completion_response_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"score\": 70}"}}]}"#;
        let data: CompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            data.choices[0].message.content.as_deref(),
            Some("{\"score\": 70}")
        );
    }

    #[tokio::test]
    #[ignore = "hits a live assistant API; needs FITLOG_AI_API_KEY"]
    async fn test_live_chat_completion() {
        let config = AiConfig::from_env();
        let client = AiClient::new(&config).unwrap();
        let text = client
            .complete_async(vec![Message::text("user", "Reply with the word ok.")])
            .await
            .unwrap();
        assert!(!text.is_empty());
    }
}
