//! Configuration for promptloop.
//!
//! Everything comes from environment variables (optionally via a `.env`
//! file). The service has no CLI flags for behavior: a run is fully
//! determined by wall-clock time and store state.

use std::str::FromStr;

use chrono_tz::Tz;
use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// OpenRouter keys are prefixed `sk-or-`; they need a different base URL.
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api";
const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Main configuration for the service.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub embeddings: EmbeddingsConfig,
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            database: DatabaseConfig::from_env()?,
            llm: LlmConfig::from_env()?,
            embeddings: EmbeddingsConfig::from_env()?,
            scheduler: SchedulerConfig::from_env()?,
        })
    }
}

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: SecretString,
    pub pool_size: usize,
}

impl DatabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let url = optional_env("DATABASE_URL")?.ok_or_else(|| ConfigError::MissingRequired {
            key: "DATABASE_URL".to_string(),
            hint: "Set DATABASE_URL to a postgres:// connection string".to_string(),
        })?;

        let pool_size = optional_env("DATABASE_POOL_SIZE")?
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "DATABASE_POOL_SIZE".to_string(),
                message: format!("must be a positive integer: {e}"),
            })?
            .unwrap_or(10);

        Ok(Self {
            url: SecretString::from(url),
            pool_size,
        })
    }

    /// Get the database URL (exposes the secret).
    pub fn url(&self) -> &str {
        self.url.expose_secret()
    }
}

/// LLM gateway configuration (OpenAI-compatible Chat Completions).
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<SecretString>,
}

impl LlmConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let api_key = optional_env("LLM_API_KEY")?;

        // OpenRouter keys are routed to OpenRouter unless the base URL is
        // set explicitly.
        let default_base = match api_key.as_deref() {
            Some(key) if key.starts_with("sk-or-") => OPENROUTER_BASE_URL,
            _ => OPENAI_BASE_URL,
        };

        let base_url = optional_env("LLM_BASE_URL")?.unwrap_or_else(|| default_base.to_string());
        let model = optional_env("LLM_MODEL")?.unwrap_or_else(|| "gpt-4o".to_string());

        Ok(Self {
            base_url,
            model,
            api_key: api_key.map(SecretString::from),
        })
    }
}

/// Embeddings endpoint configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingsConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub api_key: Option<SecretString>,
}

impl EmbeddingsConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let model =
            optional_env("EMBEDDINGS_MODEL")?.unwrap_or_else(|| "text-embedding-3-small".to_string());

        let dimension = optional_env("EMBEDDINGS_DIMENSION")?
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "EMBEDDINGS_DIMENSION".to_string(),
                message: format!("must be a positive integer: {e}"),
            })?
            .unwrap_or(1536);

        // Embeddings share the LLM key unless overridden.
        let api_key = optional_env("EMBEDDINGS_API_KEY")?.or(optional_env("LLM_API_KEY")?);

        // The endpoint follows the chat endpoint unless overridden, so
        // an OpenRouter key routes both calls to OpenRouter.
        let default_base = match api_key.as_deref() {
            Some(key) if key.starts_with("sk-or-") => OPENROUTER_BASE_URL,
            _ => OPENAI_BASE_URL,
        };
        let base_url = optional_env("EMBEDDINGS_BASE_URL")?
            .or(optional_env("LLM_BASE_URL")?)
            .unwrap_or_else(|| default_base.to_string());

        Ok(Self {
            base_url,
            model,
            dimension,
            api_key: api_key.map(SecretString::from),
        })
    }
}

/// Nightly trigger configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Cron expression with a seconds field, e.g. `0 20 4 * * *`.
    pub cron: String,
    /// Timezone the cron expression is evaluated in.
    pub timezone: Tz,
}

impl SchedulerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let cron = optional_env("LOOP_CRON")?.unwrap_or_else(|| "0 20 4 * * *".to_string());

        // Validate early so a bad expression fails at startup, not at 4 AM.
        cron::Schedule::from_str(&cron).map_err(|e| ConfigError::InvalidValue {
            key: "LOOP_CRON".to_string(),
            message: e.to_string(),
        })?;

        let tz_name = optional_env("LOOP_TIMEZONE")?.unwrap_or_else(|| "Europe/Prague".to_string());
        let timezone: Tz = tz_name.parse().map_err(|_| ConfigError::InvalidValue {
            key: "LOOP_TIMEZONE".to_string(),
            message: format!("unknown IANA timezone '{tz_name}'"),
        })?;

        Ok(Self { cron, timezone })
    }
}

/// Read an optional environment variable, treating empty strings as unset.
fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}
