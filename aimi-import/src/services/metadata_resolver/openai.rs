//! OpenAI backend (chat completions)

use super::prompt::{build_prompt, parse_answer, SYSTEM_PROMPT};
use super::{MetadataResolver, RateLimiter, ResolveError, ResolveRequest};
use crate::config::OpenAiSettings;
use crate::models::TrackMetadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const TEMPERATURE: f32 = 0.2;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AnswerMessage,
}

#[derive(Debug, Deserialize)]
struct AnswerMessage {
    content: Option<String>,
}

/// OpenAI chat completion model
pub struct OpenAiResolver {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    rate_limiter: RateLimiter,
}

impl OpenAiResolver {
    pub fn new(settings: &OpenAiSettings, timeout: Duration) -> Result<Self, ResolveError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ResolveError::Config("OpenAI enabled without an API key".to_string()))?;

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResolveError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: settings.model.clone(),
            rate_limiter: RateLimiter::new(settings.min_interval_ms),
        })
    }
}

#[async_trait]
impl MetadataResolver for OpenAiResolver {
    fn name(&self) -> &str {
        "openai"
    }

    async fn resolve(&self, request: &ResolveRequest) -> Result<TrackMetadata, ResolveError> {
        self.rate_limiter.wait().await;

        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(model = %self.model, file = %request.display_name(), "Querying OpenAI");

        let prompt = build_prompt(request);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: TEMPERATURE,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ResolveError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ResolveError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ResolveError::Parse(e.to_string()))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ResolveError::Parse("empty completion".to_string()))?;

        parse_answer(&content, &request.hints)
    }
}
