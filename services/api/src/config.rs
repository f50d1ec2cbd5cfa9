use async_openai::config::OpenAIConfig;
use coach_core::{
    conversation::{LoopSettings, TimeoutSettings},
    llm_client::{CompletionSettings, DEFAULT_CHAT_MODEL, DEFAULT_TEMPERATURE, DEFAULT_VOICE},
    retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy},
    store::connection::DEFAULT_FRESHNESS,
};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

const GEMINI_OPENAI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Backend for completions. Both are reached through the OpenAI wire format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub chat_model: String,
    pub chat_temperature: f32,
    pub tts_voice: String,
    pub log_level: Level,
    pub store_freshness: Duration,
    pub completion_timeout: Duration,
    pub persist_max_attempts: u32,
    /// Tell the user whether the identifier or the password was wrong.
    pub login_reveal_reason: bool,
    pub coach_greeting: bool,
}

fn parsed<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let provider_str = std::env::var("LLM_PROVIDER")
            .or_else(|_| std::env::var("REALTIME_PROVIDER"))
            .unwrap_or_else(|_| "openai".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "gemini" => Provider::Gemini,
            _ => Provider::OpenAI,
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();

        let default_model = match provider {
            Provider::OpenAI => DEFAULT_CHAT_MODEL,
            Provider::Gemini => GEMINI_DEFAULT_MODEL,
        };
        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| default_model.to_string());

        let chat_temperature = parsed("CHAT_TEMPERATURE", DEFAULT_TEMPERATURE)?;
        if !(0.0..=2.0).contains(&chat_temperature) {
            return Err(ConfigError::InvalidValue(
                "CHAT_TEMPERATURE".to_string(),
                format!("{} is outside 0.0..=2.0", chat_temperature),
            ));
        }

        let tts_voice = std::env::var("TTS_VOICE").unwrap_or_else(|_| DEFAULT_VOICE.to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let store_freshness = Duration::from_secs(parsed(
            "STORE_FRESHNESS_SECS",
            DEFAULT_FRESHNESS.as_secs(),
        )?);
        let completion_timeout = Duration::from_secs(parsed("COMPLETION_TIMEOUT_SECS", 30u64)?);
        let persist_max_attempts = parsed("PERSIST_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if persist_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "PERSIST_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let login_reveal_reason = parsed("LOGIN_REVEAL_REASON", false)?;
        let coach_greeting = parsed("COACH_GREETING", true)?;

        match provider {
            Provider::OpenAI => {
                if openai_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                    ));
                }
            }
            Provider::Gemini => {
                if gemini_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "GEMINI_API_KEY must be set for 'gemini' provider".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            bind_address,
            database_url,
            provider,
            openai_api_key,
            gemini_api_key,
            chat_model,
            chat_temperature,
            tts_voice,
            log_level,
            store_freshness,
            completion_timeout,
            persist_max_attempts,
            login_reveal_reason,
            coach_greeting,
        })
    }

    /// Client configuration for the selected completion provider.
    pub fn completion_client_config(&self) -> OpenAIConfig {
        match self.provider {
            Provider::OpenAI => {
                OpenAIConfig::new().with_api_key(self.openai_api_key.clone().unwrap_or_default())
            }
            Provider::Gemini => OpenAIConfig::new()
                .with_api_base(GEMINI_OPENAI_BASE)
                .with_api_key(self.gemini_api_key.clone().unwrap_or_default()),
        }
    }

    /// Voice input and spoken replies need OpenAI audio endpoints.
    pub fn audio_client_config(&self) -> Option<OpenAIConfig> {
        self.openai_api_key
            .as_ref()
            .map(|key| OpenAIConfig::new().with_api_key(key.clone()))
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            completion: CompletionSettings {
                model: self.chat_model.clone(),
                temperature: self.chat_temperature,
            },
            timeouts: TimeoutSettings {
                completion_start: self.completion_timeout,
                fragment_idle: self.completion_timeout,
                ..TimeoutSettings::default()
            },
            retry: RetryPolicy {
                max_attempts: self.persist_max_attempts,
                ..RetryPolicy::default()
            },
            voice: self.tts_voice.clone(),
            speak_replies: false,
        }
    }
}
