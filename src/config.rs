//! Configuration loader and validator for the channel digest bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::quality::QualityFilter;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    pub watch: Watch,
    pub summary: Summary,
    #[serde(default)]
    pub quality: Quality,
    pub openai: OpenAi,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    /// Users allowed to trigger runs through private bot commands.
    #[serde(default)]
    pub allowed_users: Vec<i64>,
    /// `@username` or numeric chat id of the channel digests are published to.
    pub target_channel: String,
}

/// Channel display-name substrings that mark a channel as monitored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Watch {
    pub patterns: Vec<String>,
}

/// Aggregation thresholds and schedules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Summary {
    pub min_posts: u32,
    pub max_posts: u32,
    /// Six-field cron expression (seconds first).
    pub schedule: String,
    #[serde(default = "default_stats_schedule")]
    pub stats_schedule: String,
    pub backend_timeout_seconds: u64,
}

/// Content quality floors for ingestion and generated digests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quality {
    pub min_length: usize,
    pub min_letter_ratio: f64,
    pub min_title_length: usize,
    pub min_body_length: usize,
}

/// OpenAI-compatible chat completion backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenAi {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_stats_schedule() -> String {
    "0 0 * * * *".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for Quality {
    fn default() -> Self {
        Self {
            min_length: QualityFilter::MIN_LENGTH,
            min_letter_ratio: QualityFilter::MIN_LETTER_RATIO,
            min_title_length: 10,
            min_body_length: 100,
        }
    }
}

impl Quality {
    pub fn filter(&self) -> QualityFilter {
        QualityFilter::new(self.min_length, self.min_letter_ratio)
    }
}

impl Summary {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_seconds)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/digest.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.telegram.target_channel.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.target_channel must be non-empty"));
    }

    if cfg.watch.patterns.is_empty() {
        return Err(ConfigError::Invalid("watch.patterns must list at least one pattern"));
    }
    if cfg.watch.patterns.iter().any(|p| p.trim().is_empty()) {
        return Err(ConfigError::Invalid("watch.patterns must not contain blank entries"));
    }

    let s = &cfg.summary;
    if s.min_posts == 0 {
        return Err(ConfigError::Invalid("summary.min_posts must be > 0"));
    }
    if s.max_posts < s.min_posts {
        return Err(ConfigError::Invalid("summary.max_posts must be >= summary.min_posts"));
    }
    if s.schedule.trim().is_empty() {
        return Err(ConfigError::Invalid("summary.schedule must be non-empty"));
    }
    if s.stats_schedule.trim().is_empty() {
        return Err(ConfigError::Invalid("summary.stats_schedule must be non-empty"));
    }
    if s.backend_timeout_seconds == 0 {
        return Err(ConfigError::Invalid("summary.backend_timeout_seconds must be > 0"));
    }

    let q = &cfg.quality;
    if !(0.0..=1.0).contains(&q.min_letter_ratio) {
        return Err(ConfigError::Invalid("quality.min_letter_ratio must be within [0, 1]"));
    }

    if cfg.openai.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("openai.api_key must be non-empty"));
    }
    if cfg.openai.model.trim().is_empty() {
        return Err(ConfigError::Invalid("openai.model must be non-empty"));
    }
    if cfg.openai.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("openai.base_url must be non-empty"));
    }

    Ok(())
}

/// Returns the example YAML content shipped with the bot.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  allowed_users:
    - 123456789
  target_channel: "@your_digest_channel"

watch:
  patterns:
    - "MVP 1"
    - "MVP 2"
    - "MVP 3"

summary:
  min_posts: 5
  max_posts: 50
  schedule: "0 0 */6 * * *"
  stats_schedule: "0 0 * * * *"
  backend_timeout_seconds: 90

quality:
  min_length: 50
  min_letter_ratio: 0.6
  min_title_length: 10
  min_body_length: 100

openai:
  api_key: "YOUR_OPENAI_API_KEY"
  base_url: "https://api.openai.com/"
  model: "gpt-4"
  max_tokens: 1000
  temperature: 0.7
"#
}
