//! AI metadata resolution
//!
//! A [`MetadataResolver`] turns a file name plus embedded tag hints into clean
//! [`TrackMetadata`]. Backends are untrusted: every failure is a typed
//! [`ResolveError`] and the caller decides what it costs.

mod ollama;
mod openai;
pub mod prompt;

pub use ollama::OllamaResolver;
pub use openai::OpenAiResolver;

use crate::config::ResolverSettings;
use crate::models::{FileIdentity, TrackMetadata};
use crate::services::tag_reader::TagHints;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// Allowance for scheduling between chained backend calls
const CHAIN_SLACK: Duration = Duration::from_millis(250);

/// Outer bound for one resolution across `backends` chained backends
pub fn resolution_budget(per_backend: Duration, backends: usize) -> Duration {
    per_backend.saturating_mul(backends.max(1) as u32) + CHAIN_SLACK
}

/// Resolution errors
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Backend answered but not with the expected JSON
    #[error("Parse error: {0}")]
    Parse(String),

    /// Answer lacks artist or title
    #[error("Incomplete answer: {0}")]
    Incomplete(String),

    #[error("Resolution timed out after {0:?}")]
    Timeout(Duration),

    #[error("No resolver backend enabled")]
    NoBackend,

    #[error("Invalid resolver configuration: {0}")]
    Config(String),
}

/// Input to one resolution call
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub identity: FileIdentity,
    pub path: PathBuf,
    pub hints: TagHints,
}

impl ResolveRequest {
    /// File name without extension, as shown to the model
    pub fn display_name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// External AI-backed metadata lookup
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    async fn resolve(&self, request: &ResolveRequest) -> Result<TrackMetadata, ResolveError>;

    /// Backends tried by one call; each may use a full per-backend timeout
    fn backend_count(&self) -> usize {
        1
    }
}

/// Enforces a minimum interval between requests
pub(crate) struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub(crate) fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    pub(crate) async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Tries each backend in order and returns the first usable answer
pub struct ResolverChain {
    backends: Vec<Box<dyn MetadataResolver>>,
    backend_timeout: Option<Duration>,
}

impl ResolverChain {
    pub fn new(backends: Vec<Box<dyn MetadataResolver>>) -> Self {
        Self {
            backends,
            backend_timeout: None,
        }
    }

    /// Bound every backend call on its own, so a hung backend still leaves
    /// time for the next one
    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = Some(timeout);
        self
    }

    /// Build the enabled backends (Ollama first, then OpenAI)
    pub fn from_settings(settings: &ResolverSettings, timeout: Duration) -> Result<Self, ResolveError> {
        let mut backends: Vec<Box<dyn MetadataResolver>> = Vec::new();

        if settings.ollama.enabled {
            backends.push(Box::new(OllamaResolver::new(&settings.ollama, timeout)?));
        }
        if settings.openai.enabled {
            backends.push(Box::new(OpenAiResolver::new(&settings.openai, timeout)?));
        }

        if backends.is_empty() {
            return Err(ResolveError::NoBackend);
        }
        Ok(Self::new(backends).with_backend_timeout(timeout))
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[async_trait]
impl MetadataResolver for ResolverChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn backend_count(&self) -> usize {
        self.backends.len()
    }

    async fn resolve(&self, request: &ResolveRequest) -> Result<TrackMetadata, ResolveError> {
        let mut last_error = ResolveError::NoBackend;

        for backend in &self.backends {
            let result = match self.backend_timeout {
                Some(limit) => tokio::time::timeout(limit, backend.resolve(request))
                    .await
                    .unwrap_or(Err(ResolveError::Timeout(limit))),
                None => backend.resolve(request).await,
            };

            match result {
                Ok(metadata) => {
                    tracing::debug!(
                        backend = backend.name(),
                        identity = %request.identity.short(),
                        "Resolved"
                    );
                    return Ok(metadata);
                }
                Err(e) => {
                    tracing::warn!(
                        backend = backend.name(),
                        identity = %request.identity.short(),
                        error = %e,
                        "Backend failed"
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
