//! Configuration types.
//!
//! Everything is read from the environment (optionally seeded from a `.env`
//! file by the binary). Secrets are only required by the commands that use
//! them, so they are loaded lazily through `gmail_token()` / `llm_config()`.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Time between poll cycles.
    pub poll_interval: Duration,
    /// Time between auto-archive sweeps.
    pub archive_interval: Duration,
    /// Max inbox messages considered per sweep.
    pub sweep_max: u32,
    /// Max new messages fetched per poll cycle.
    pub poll_max: u32,
    /// Path of the persisted static rule file.
    pub rules_file: PathBuf,
    /// Path of the libSQL database.
    pub db_path: PathBuf,
    /// Optional directory for daily-rolling log files.
    pub log_dir: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            archive_interval: Duration::from_secs(4 * 60 * 60),
            sweep_max: 100,
            poll_max: 500,
            rules_file: PathBuf::from("email_rules.json"),
            db_path: PathBuf::from("./data/inbox-rules.db"),
            log_dir: None,
        }
    }
}

impl DaemonConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let poll_interval = env_parse::<u64>("INBOX_RULES_POLL_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);
        let archive_interval = env_parse::<u64>("INBOX_RULES_ARCHIVE_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.archive_interval);
        let sweep_max = env_parse::<u32>("INBOX_RULES_SWEEP_MAX")?.unwrap_or(defaults.sweep_max);
        let poll_max = env_parse::<u32>("INBOX_RULES_POLL_MAX")?.unwrap_or(defaults.poll_max);

        if poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "INBOX_RULES_POLL_INTERVAL_SECS".into(),
                message: "must be greater than zero".into(),
            });
        }

        Ok(Self {
            poll_interval,
            archive_interval,
            sweep_max,
            poll_max,
            rules_file: env_opt("INBOX_RULES_RULES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.rules_file),
            db_path: env_opt("INBOX_RULES_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            log_dir: env_opt("INBOX_RULES_LOG_DIR").map(PathBuf::from),
        })
    }
}

/// Bearer token for the Gmail REST API.
pub fn gmail_token() -> Result<SecretString, ConfigError> {
    env_opt("GMAIL_ACCESS_TOKEN")
        .map(SecretString::from)
        .ok_or_else(|| ConfigError::MissingEnvVar("GMAIL_ACCESS_TOKEN".into()))
}

/// LLM backend selection, model and key.
pub fn llm_config() -> Result<LlmConfig, ConfigError> {
    let backend = match env_opt("INBOX_RULES_LLM_BACKEND")
        .unwrap_or_else(|| "openai".to_string())
        .to_lowercase()
        .as_str()
    {
        "openai" => LlmBackend::OpenAi,
        "anthropic" => LlmBackend::Anthropic,
        other => {
            return Err(ConfigError::InvalidValue {
                key: "INBOX_RULES_LLM_BACKEND".into(),
                message: format!("unknown backend '{other}' (expected openai or anthropic)"),
            });
        }
    };

    let key_var = match backend {
        LlmBackend::OpenAi => "OPENAI_API_KEY",
        LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
    };
    let api_key = env_opt(key_var).ok_or_else(|| ConfigError::MissingEnvVar(key_var.into()))?;

    let model = env_opt("INBOX_RULES_MODEL").unwrap_or_else(|| match backend {
        LlmBackend::OpenAi => "gpt-4o".to_string(),
        LlmBackend::Anthropic => "claude-sonnet-4-20250514".to_string(),
    });

    Ok(LlmConfig {
        backend,
        api_key: SecretString::from(api_key),
        model,
    })
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_daemon_schedule() {
        let config = DaemonConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.archive_interval, Duration::from_secs(14_400));
        assert_eq!(config.sweep_max, 100);
        assert_eq!(config.rules_file, PathBuf::from("email_rules.json"));
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn env_parse_missing_is_none() {
        let parsed = env_parse::<u64>("INBOX_RULES_TEST_UNSET_VARIABLE").unwrap();
        assert!(parsed.is_none());
    }
}
