//! Ollama backend (`/api/generate`)

use super::prompt::{build_prompt, parse_answer, SYSTEM_PROMPT};
use super::{MetadataResolver, RateLimiter, ResolveError, ResolveRequest};
use crate::config::OllamaSettings;
use crate::models::TrackMetadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: String,
    stream: bool,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Local Ollama model
pub struct OllamaResolver {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    rate_limiter: RateLimiter,
}

impl OllamaResolver {
    pub fn new(settings: &OllamaSettings, timeout: Duration) -> Result<Self, ResolveError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResolveError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            rate_limiter: RateLimiter::new(settings.min_interval_ms),
        })
    }
}

#[async_trait]
impl MetadataResolver for OllamaResolver {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn resolve(&self, request: &ResolveRequest) -> Result<TrackMetadata, ResolveError> {
        self.rate_limiter.wait().await;

        let url = format!("{}/api/generate", self.base_url);
        tracing::debug!(url = %url, model = %self.model, file = %request.display_name(), "Querying Ollama");

        let body = GenerateRequest {
            model: &self.model,
            system: SYSTEM_PROMPT,
            prompt: build_prompt(request),
            stream: false,
            format: "json",
        };

        let response = self
            .http_client
            .post(&url)
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

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ResolveError::Parse(e.to_string()))?;

        parse_answer(&generated.response, &request.hints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileIdentity;
    use crate::services::tag_reader::TagHints;
    use std::path::PathBuf;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver(url: &str) -> OllamaResolver {
        let settings = OllamaSettings {
            enabled: true,
            url: url.to_string(),
            model: "phi4-mini".to_string(),
            min_interval_ms: 0,
        };
        OllamaResolver::new(&settings, Duration::from_secs(5)).unwrap()
    }

    fn request() -> ResolveRequest {
        ResolveRequest {
            identity: FileIdentity::of_bytes(b"ollama"),
            path: PathBuf::from("/in/Queen - Bohemian Rhapsody (Official Video).mp3"),
            hints: TagHints::default(),
        }
    }

    #[tokio::test]
    async fn test_resolve_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "phi4-mini",
                "stream": false,
                "format": "json"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "phi4-mini",
                "response": "{\"use_as_is\": false, \"artist\": \"Queen\", \"title\": \"Bohemian Rhapsody\"}",
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let metadata = resolver(&server.uri()).resolve(&request()).await.unwrap();
        assert_eq!(metadata, TrackMetadata::new("Queen", "Bohemian Rhapsody"));
    }

    #[tokio::test]
    async fn test_server_error_is_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        match resolver(&server.uri()).resolve(&request()).await {
            Err(ResolveError::Api { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "model not loaded");
            }
            other => panic!("Expected API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let result = resolver("http://127.0.0.1:1").resolve(&request()).await;
        assert!(matches!(result, Err(ResolveError::Network(_))));
    }
}
