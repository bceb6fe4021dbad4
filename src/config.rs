//! Configuration loading.
//!
//! Feedcast reads a single human-owned `config.toml`. Every section has
//! defaults, so a file holding only `[feed] url` is valid. Relative paths are
//! resolved against the config directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bot credentials.
    pub telegram: TelegramConfig,
    /// Feed source and polling.
    pub feed: FeedConfig,
    /// Feed fetch retry policy.
    pub retry: RetryConfig,
    /// Fan-out worker pool.
    pub fanout: FanoutConfig,
    /// Persistent storage.
    pub storage: StorageConfig,
    /// Log files.
    pub logging: LoggingConfig,
    /// Localized texts.
    pub strings: StringsConfig,
    /// Bug report aggregation.
    pub reporter: ReporterConfig,
    /// Per-user rate limits.
    pub limits: LimitsConfig,
}

/// Telegram-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Environment variable name holding the bot token.
    pub bot_token_env: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token_env: "FEEDCAST_BOT_TOKEN".to_owned(),
        }
    }
}

/// Feed source.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// RSS document URL.
    pub url: String,
    /// Poll interval until changed with `/set_interval`.
    pub default_interval_secs: u64,
    /// HTTP request timeout.
    pub timeout_secs: u64,
    /// `User-Agent` header sent with feed requests.
    pub user_agent: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            default_interval_secs: default_interval_secs(),
            timeout_secs: 30,
            user_agent: format!("feedcast/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl FeedConfig {
    /// Default poll interval.
    pub fn default_interval(&self) -> Duration {
        Duration::from_secs(self.default_interval_secs.max(1))
    }

    /// HTTP timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Exponential backoff for feed fetches.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per poll cycle, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay_secs: u64,
    /// Delay growth factor between retries.
    pub multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_secs: 3,
            multiplier: 2,
        }
    }
}

/// Fan-out worker pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Destinations served concurrently.
    pub concurrency: usize,
    /// Longest honoured retry-after hint, in seconds.
    pub max_retry_after_secs: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            max_retry_after_secs: 30,
        }
    }
}

/// Persistent storage.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("feedcast.db"),
        }
    }
}

/// Log files.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for rotated JSON logs.
    pub dir: PathBuf,
    /// Level for the bot's own events when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            level: "info".to_owned(),
        }
    }
}

/// Localized texts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StringsConfig {
    /// Optional JSON strings file; built-in texts are used when unset.
    pub file: Option<PathBuf>,
    /// Language code looked up in the file.
    pub language: String,
}

impl Default for StringsConfig {
    fn default() -> Self {
        Self {
            file: None,
            language: crate::strings::FALLBACK_LANGUAGE.to_owned(),
        }
    }
}

/// Bug report aggregation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Where aggregated bug reports are dumped on shutdown.
    pub bugs_file: Option<PathBuf>,
}

/// Per-user rate limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Cooldown between `/last_feed` requests of non-admin users.
    pub last_feed_cooldown_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            last_feed_cooldown_secs: 120,
        }
    }
}

impl LimitsConfig {
    /// `/last_feed` cooldown.
    pub fn last_feed_cooldown(&self) -> Duration {
        Duration::from_secs(self.last_feed_cooldown_secs)
    }
}

fn default_interval_secs() -> u64 {
    300
}

impl Config {
    /// Make relative paths absolute against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.storage.db_path);
        resolve(&mut self.logging.dir);
        if let Some(file) = self.strings.file.as_mut() {
            resolve(file);
        }
        if let Some(file) = self.reporter.bugs_file.as_mut() {
            resolve(file);
        }
    }

    /// Check values that have no usable default.
    ///
    /// # Errors
    ///
    /// Returns an error if the feed URL is missing or not http(s), or the log
    /// level is unknown.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.feed.url.trim().is_empty() {
            anyhow::bail!("[feed] url is required");
        }
        let url = url::Url::parse(&self.feed.url)
            .map_err(|e| anyhow::anyhow!("[feed] url {:?} is invalid: {e}", self.feed.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("[feed] url must be http or https, got {}", url.scheme());
        }
        self.logging
            .level
            .parse::<tracing::Level>()
            .map_err(|_| anyhow::anyhow!("[logging] level {:?} is unknown", self.logging.level))?;
        Ok(())
    }
}

/// Load the config from a TOML file and resolve relative paths against the
/// file's directory.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let mut config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    if let Some(base) = path.parent() {
        config.resolve_paths(base);
    }
    Ok(config)
}

/// Resolve the default config directory (`~/.feedcast/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".feedcast"))
}

/// Load `.env` from `dir` (if present) and read the bot token from the
/// configured environment variable.
///
/// # Errors
///
/// Returns an error if the variable is unset or empty.
pub fn bot_token(config: &TelegramConfig, dir: &Path) -> anyhow::Result<String> {
    let env_file = dir.join(".env");
    if env_file.exists() {
        dotenvy::from_path(&env_file)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", env_file.display()))?;
    }
    match std::env::var(&config.bot_token_env) {
        Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_owned()),
        _ => anyhow::bail!(
            "bot token not found: set {} in the environment or {}",
            config.bot_token_env,
            env_file.display()
        ),
    }
}
