//! Configuration management for the quiz solver.
//!
//! Configuration is read once at startup from environment variables and then
//! threaded through the solver as an explicit [`Config`] value:
//! - `OPENROUTER_API_KEY` - Required. API key for the LLM provider.
//! - `OPENROUTER_BASE_URL` - Optional. OpenAI-compatible API base. Defaults to OpenRouter.
//! - `DEFAULT_MODEL` - Optional. Model used when listing fails or nothing matches the preference.
//! - `MODEL_PREFERENCE` - Optional. Comma-separated name patterns for fast models. Defaults to `flash,mini`.
//! - `QUIZ_EMAIL` - Required. Identity submitted alongside every answer.
//! - `QUIZ_SECRET` - Required. Shared secret checked on inbound jobs and sent with answers.
//! - `HOST` - Optional. Server host. Defaults to `0.0.0.0`.
//! - `PORT` - Optional. Server port. Defaults to `8000`.
//! - `MAX_STEPS` - Optional. Maximum quiz steps per run. Defaults to `15`.
//! - `PAGE_TIMEOUT_SECS` / `PAGE_SETTLE_MS` - Optional. Browser navigation bounds.
//! - `SUBMIT_TIMEOUT_SECS` - Optional. Answer POST timeout. Defaults to `20`.
//! - `EXEC_TIMEOUT_SECS` - Optional. Wall clock for generated code. Defaults to `120`.
//! - `PYTHON_BIN` - Optional. Interpreter for generated code. Defaults to `python3`.
//! - `MARKUP_PROMPT_CHARS` - Optional. Markup prefix sent to the model. Defaults to `8000`.
//! - `CHROME_EXECUTABLE` - Optional. Explicit Chromium/Chrome binary.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-001";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// LLM provider settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Provider API key
    pub api_key: String,

    /// OpenAI-compatible API base (no trailing slash)
    pub base_url: String,

    /// Model used when selection finds nothing better
    pub default_model: String,

    /// Name patterns tried in order when picking a fast model
    pub model_preference: Vec<String>,

    /// Transient-error retries per model call (0 = single attempt)
    pub max_retries: u32,
}

/// Browser settings for the page fetcher.
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// Upper bound on navigation
    pub page_timeout: Duration,

    /// Fixed wait after load for client-side rendering
    pub settle: Duration,

    /// Explicit browser binary; auto-detected when unset
    pub chrome_executable: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            page_timeout: Duration::from_secs(60),
            settle: Duration::from_millis(2000),
            chrome_executable: None,
        }
    }
}

/// Sandbox settings for generated code.
#[derive(Debug, Clone)]
pub struct ExecSettings {
    pub python_bin: String,
    pub timeout: Duration,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            python_bin: "python3".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Solver configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,

    /// Identity submitted with every answer
    pub email: String,

    /// Shared secret (inbound check and outbound payload)
    pub secret: String,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Step ceiling for one run
    pub max_steps: usize,

    /// Timeout for the answer POST
    pub submit_timeout: Duration,

    /// Markup prefix length passed to the model
    pub markup_prompt_chars: usize,

    pub browser: BrowserSettings,

    pub exec: ExecSettings,
}

fn required(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

fn parsed<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}

/// Split a comma-separated pattern list, dropping blanks.
pub fn parse_patterns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if the API key, email or secret is
    /// not set, and `ConfigError::InvalidValue` for unparseable numbers.
    pub fn from_env() -> Result<Self, ConfigError> {
        let llm = LlmConfig {
            api_key: required("OPENROUTER_API_KEY")?,
            base_url: std::env::var("OPENROUTER_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            default_model: std::env::var("DEFAULT_MODEL")
                .unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            model_preference: parse_patterns(
                &std::env::var("MODEL_PREFERENCE").unwrap_or_else(|_| "flash,mini".to_string()),
            ),
            max_retries: parsed("LLM_MAX_RETRIES", 0)?,
        };

        let max_steps: usize = parsed("MAX_STEPS", 15)?;
        if max_steps == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_STEPS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let browser = BrowserSettings {
            page_timeout: Duration::from_secs(parsed("PAGE_TIMEOUT_SECS", 60)?),
            settle: Duration::from_millis(parsed("PAGE_SETTLE_MS", 2000)?),
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok().map(PathBuf::from),
        };

        let exec = ExecSettings {
            python_bin: std::env::var("PYTHON_BIN").unwrap_or_else(|_| "python3".to_string()),
            timeout: Duration::from_secs(parsed("EXEC_TIMEOUT_SECS", 120)?),
        };

        Ok(Self {
            llm,
            email: required("QUIZ_EMAIL")?,
            secret: required("QUIZ_SECRET")?,
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parsed("PORT", 8000)?,
            max_steps,
            submit_timeout: Duration::from_secs(parsed("SUBMIT_TIMEOUT_SECS", 20)?),
            markup_prompt_chars: parsed("MARKUP_PROMPT_CHARS", 8000)?,
            browser,
            exec,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, email: String, secret: String) -> Self {
        Self {
            llm: LlmConfig {
                api_key,
                base_url: DEFAULT_BASE_URL.to_string(),
                default_model: DEFAULT_MODEL.to_string(),
                model_preference: vec!["flash".to_string(), "mini".to_string()],
                max_retries: 0,
            },
            email,
            secret,
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_steps: 15,
            submit_timeout: Duration::from_secs(20),
            markup_prompt_chars: 8000,
            browser: BrowserSettings::default(),
            exec: ExecSettings::default(),
        }
    }
}
