//! Importer configuration
//!
//! Built once at start-up and passed into each component. Priority, highest
//! first: command line, environment, TOML file, defaults.

use crate::services::file_scanner::DEFAULT_AUDIO_EXTENSIONS;
use crate::services::library_writer::PlacementMode;
use crate::services::metadata_resolver::resolution_budget;
use aimi_common::config::{
    default_data_dir, env_flag, env_parse, load_toml_config, locate_config_file, resolve_path,
    LoggingConfig,
};
use aimi_common::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const APP_NAME: &str = "aimi";
const DEFAULT_DB_FILE: &str = "music_imports.db";

/// Longest accepted pending lease (30 days)
const MAX_PENDING_LEASE_SECS: u64 = 30 * 24 * 3600;

/// Time a claim must outlive resolution by, for tagging and the commit
const PLACEMENT_MARGIN: Duration = Duration::from_secs(60);

// ============================================================================
// TOML file
// ============================================================================

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub database_path: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub import: ImportSettings,
    pub ollama: OllamaSettings,
    pub openai: OpenAiSettings,
}

impl TomlConfig {
    /// Locate and parse the configuration file (missing file gives defaults)
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = locate_config_file(explicit, APP_NAME)?;
        if let Some(path) = &path {
            info!("Loading config from {}", path.display());
        }
        load_toml_config(path.as_deref())
    }
}

/// `[import]` section
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    pub max_attempts: u32,
    pub resolve_timeout_secs: u64,
    /// Age after which a `Pending` record is treated as abandoned
    pub pending_lease_secs: u64,
    pub max_consecutive_store_errors: u32,
    pub audio_extensions: Vec<String>,
    /// Fuzzy duplicate threshold; 0 disables linking
    pub fuzzy_ratio: f64,
    pub placement: PlacementMode,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            resolve_timeout_secs: 180,
            pending_lease_secs: 900,
            max_consecutive_store_errors: 3,
            audio_extensions: DEFAULT_AUDIO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            fuzzy_ratio: 0.95,
            placement: PlacementMode::Copy,
        }
    }
}

/// `[ollama]` section
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub enabled: bool,
    pub url: String,
    pub model: String,
    pub min_interval_ms: u64,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://localhost:11434".to_string(),
            model: "phi4-mini".to_string(),
            min_interval_ms: 0,
        }
    }
}

/// `[openai]` section
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub min_interval_ms: u64,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            model: "gpt-4.1-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            min_interval_ms: 0,
        }
    }
}

/// Every resolver backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolverSettings {
    pub ollama: OllamaSettings,
    pub openai: OpenAiSettings,
}

impl ResolverSettings {
    pub fn any_enabled(&self) -> bool {
        self.enabled_count() > 0
    }

    pub fn enabled_count(&self) -> usize {
        usize::from(self.ollama.enabled) + usize::from(self.openai.enabled)
    }
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Command-line values that take precedence over everything else
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub database_path: Option<PathBuf>,
    pub max_attempts: Option<u32>,
    pub resolve_timeout_secs: Option<u64>,
    pub placement: Option<PlacementMode>,
}

/// Effective importer configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ImportConfig {
    pub database_path: PathBuf,
    pub max_attempts: u32,
    pub resolve_timeout: Duration,
    pub pending_lease: Duration,
    pub max_consecutive_store_errors: u32,
    pub audio_extensions: Vec<String>,
    pub fuzzy_ratio: f64,
    pub placement: PlacementMode,
    pub resolvers: ResolverSettings,
    pub log_level: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        let import = ImportSettings::default();
        Self {
            database_path: default_database_path(),
            max_attempts: import.max_attempts,
            resolve_timeout: Duration::from_secs(import.resolve_timeout_secs),
            pending_lease: Duration::from_secs(import.pending_lease_secs),
            max_consecutive_store_errors: import.max_consecutive_store_errors,
            audio_extensions: import.audio_extensions,
            fuzzy_ratio: import.fuzzy_ratio,
            placement: import.placement,
            resolvers: ResolverSettings::default(),
            log_level: LoggingConfig::default().level,
        }
    }
}

impl ImportConfig {
    /// Merge CLI, environment and TOML values
    pub fn resolve(cli: &CliOverrides, toml: TomlConfig) -> Result<Self> {
        let TomlConfig {
            database_path,
            logging,
            import,
            mut ollama,
            mut openai,
        } = toml;

        let database_path = resolve_path(
            cli.database_path.as_deref(),
            "IMPORT_DB_PATH",
            database_path.as_deref(),
            default_database_path,
        );

        let max_attempts = match cli.max_attempts {
            Some(v) => v,
            None => env_parse("AIMI_MAX_ATTEMPTS")?.unwrap_or(import.max_attempts),
        };
        let resolve_timeout_secs = match cli.resolve_timeout_secs {
            Some(v) => v,
            None => env_parse("AIMI_RESOLVE_TIMEOUT_SECS")?.unwrap_or(import.resolve_timeout_secs),
        };
        let pending_lease_secs =
            env_parse("AIMI_PENDING_LEASE_SECS")?.unwrap_or(import.pending_lease_secs);
        let fuzzy_ratio = env_parse("FUZZY_RATIO")?.unwrap_or(import.fuzzy_ratio);

        if let Some(enabled) = env_flag("USE_OLLAMA") {
            ollama.enabled = enabled;
        }
        if let Some(url) = env_parse::<String>("OLLAMA_URL")? {
            ollama.url = url;
        }
        if let Some(model) = env_parse::<String>("OLLAMA_MODEL")? {
            ollama.model = model;
        }
        if let Some(enabled) = env_flag("USE_OPENAI") {
            openai.enabled = enabled;
        }
        if let Some(key) = env_parse::<String>("OPENAI_API_KEY")? {
            openai.api_key = Some(key);
        }
        if let Some(model) = env_parse::<String>("OPENAI_MODEL")? {
            openai.model = model;
        }

        let config = Self {
            database_path,
            max_attempts,
            resolve_timeout: Duration::from_secs(resolve_timeout_secs),
            pending_lease: Duration::from_secs(pending_lease_secs),
            max_consecutive_store_errors: import.max_consecutive_store_errors,
            audio_extensions: import.audio_extensions,
            fuzzy_ratio,
            placement: cli.placement.unwrap_or(import.placement),
            resolvers: ResolverSettings { ollama, openai },
            log_level: logging.level,
        };
        config.validate()?;
        Ok(config)
    }

    /// Range checks that hold for every run mode
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.fuzzy_ratio) {
            return Err(Error::Config(format!(
                "fuzzy_ratio must be within 0.0..=1.0, got {}",
                self.fuzzy_ratio
            )));
        }
        if self.resolve_timeout.is_zero() {
            return Err(Error::Config("resolve_timeout_secs must be positive".to_string()));
        }
        if self.pending_lease.is_zero() || self.pending_lease.as_secs() > MAX_PENDING_LEASE_SECS {
            return Err(Error::Config(format!(
                "pending_lease_secs must be within 1..={}",
                MAX_PENDING_LEASE_SECS
            )));
        }
        // A live claim must not expire while its owner is still resolving
        let min_lease = self.claim_duration();
        if self.pending_lease <= min_lease {
            return Err(Error::Config(format!(
                "pending_lease_secs ({}) must exceed the longest resolution plus placement ({}s)",
                self.pending_lease.as_secs(),
                min_lease.as_secs_f64().ceil()
            )));
        }
        if self.max_consecutive_store_errors == 0 {
            return Err(Error::Config(
                "max_consecutive_store_errors must be at least 1".to_string(),
            ));
        }
        if self.audio_extensions.is_empty() {
            return Err(Error::Config("audio_extensions must not be empty".to_string()));
        }
        Ok(())
    }

    /// Additional checks for runs that call the resolver
    pub fn validate_for_resolution(&self) -> Result<()> {
        if !self.resolvers.any_enabled() {
            return Err(Error::Config(
                "No resolver enabled: set USE_OLLAMA or USE_OPENAI".to_string(),
            ));
        }
        if self.resolvers.openai.enabled
            && self
                .resolvers
                .openai
                .api_key
                .as_deref()
                .map_or(true, |k| k.trim().is_empty())
        {
            return Err(Error::Config(
                "OpenAI enabled but OPENAI_API_KEY is not set".to_string(),
            ));
        }
        Ok(())
    }

    /// Longest time one claim can stay in flight: every enabled backend
    /// timing out in turn, then placement
    pub fn claim_duration(&self) -> Duration {
        resolution_budget(self.resolve_timeout, self.resolvers.enabled_count()) + PLACEMENT_MARGIN
    }

    /// Pending lease as used by the record state machine
    pub fn pending_lease_chrono(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pending_lease.as_secs().min(MAX_PENDING_LEASE_SECS) as i64)
    }
}

fn default_database_path() -> PathBuf {
    default_data_dir(APP_NAME).join(DEFAULT_DB_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_VARS: &[&str] = &[
        "IMPORT_DB_PATH",
        "AIMI_MAX_ATTEMPTS",
        "AIMI_RESOLVE_TIMEOUT_SECS",
        "AIMI_PENDING_LEASE_SECS",
        "FUZZY_RATIO",
        "USE_OLLAMA",
        "OLLAMA_URL",
        "OLLAMA_MODEL",
        "USE_OPENAI",
        "OPENAI_API_KEY",
        "OPENAI_MODEL",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    fn parse(toml_text: &str) -> TomlConfig {
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = ImportConfig::resolve(&CliOverrides::default(), TomlConfig::default()).unwrap();

        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.resolve_timeout, Duration::from_secs(180));
        assert_eq!(config.fuzzy_ratio, 0.95);
        assert_eq!(config.placement, PlacementMode::Copy);
        assert!(config.resolvers.ollama.enabled);
        assert!(!config.resolvers.openai.enabled);
        assert!(config.database_path.ends_with("aimi/music_imports.db"));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    #[serial]
    fn test_priority_cli_over_env_over_toml() {
        clear_env();
        let toml = parse(
            r#"
            database_path = "/toml/imports.db"

            [import]
            max_attempts = 5
            resolve_timeout_secs = 30
            placement = "move"

            [ollama]
            model = "llama3"
            "#,
        );

        std::env::set_var("AIMI_MAX_ATTEMPTS", "4");
        std::env::set_var("IMPORT_DB_PATH", "/env/imports.db");
        std::env::set_var("OLLAMA_MODEL", "qwen");

        let cli = CliOverrides {
            max_attempts: Some(2),
            ..Default::default()
        };
        let config = ImportConfig::resolve(&cli, toml).unwrap();
        clear_env();

        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.database_path, PathBuf::from("/env/imports.db"));
        assert_eq!(config.resolve_timeout, Duration::from_secs(30));
        assert_eq!(config.placement, PlacementMode::Move);
        assert_eq!(config.resolvers.ollama.model, "qwen");
    }

    #[test]
    #[serial]
    fn test_env_flags_toggle_backends() {
        clear_env();
        std::env::set_var("USE_OLLAMA", "false");
        std::env::set_var("USE_OPENAI", "1");
        std::env::set_var("OPENAI_API_KEY", "sk-abc");

        let config = ImportConfig::resolve(&CliOverrides::default(), TomlConfig::default()).unwrap();
        clear_env();

        assert!(!config.resolvers.ollama.enabled);
        assert!(config.resolvers.openai.enabled);
        assert_eq!(config.resolvers.openai.api_key.as_deref(), Some("sk-abc"));
        config.validate_for_resolution().unwrap();
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_rejected() {
        clear_env();
        std::env::set_var("FUZZY_RATIO", "1.5");
        let result = ImportConfig::resolve(&CliOverrides::default(), TomlConfig::default());
        clear_env();
        assert!(matches!(result, Err(Error::Config(_))));

        std::env::set_var("AIMI_MAX_ATTEMPTS", "many");
        let result = ImportConfig::resolve(&CliOverrides::default(), TomlConfig::default());
        clear_env();
        assert!(matches!(result, Err(Error::Config(_))));

        let cli = CliOverrides {
            max_attempts: Some(0),
            ..Default::default()
        };
        assert!(ImportConfig::resolve(&cli, TomlConfig::default()).is_err());
    }

    #[test]
    #[serial]
    fn test_lease_shorter_than_resolution_is_rejected() {
        clear_env();
        std::env::set_var("AIMI_PENDING_LEASE_SECS", "60");
        let result = ImportConfig::resolve(&CliOverrides::default(), TomlConfig::default());
        clear_env();
        match result {
            Err(Error::Config(msg)) => assert!(msg.contains("pending_lease_secs (60)")),
            other => panic!("Expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_lease_covers_every_enabled_backend() {
        let mut config = ImportConfig::default();
        config.resolve_timeout = Duration::from_secs(180);
        config.pending_lease = Duration::from_secs(300);
        config.validate().unwrap();

        // Ollama then OpenAI may each take the full timeout
        config.resolvers.openai.enabled = true;
        assert!(config.claim_duration() > Duration::from_secs(420));
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.pending_lease = Duration::from_secs(900);
        config.validate().unwrap();
    }

    #[test]
    fn test_resolution_requires_a_backend() {
        let mut config = ImportConfig::default();
        config.resolvers.ollama.enabled = false;
        assert!(config.validate_for_resolution().is_err());

        config.resolvers.openai.enabled = true;
        assert!(config.validate_for_resolution().is_err(), "missing key");

        config.resolvers.openai.api_key = Some("sk".to_string());
        assert!(config.validate_for_resolution().is_ok());
    }

    #[test]
    fn test_unknown_placement_fails_to_parse() {
        let result: std::result::Result<TomlConfig, _> = toml::from_str("[import]\nplacement = \"teleport\"");
        assert!(result.is_err());
    }
}
