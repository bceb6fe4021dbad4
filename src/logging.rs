//! Log output for the bot.
//!
//! The long-running bot writes JSON lines to a daily file under
//! `[logging] dir` and a readable copy to stderr. One-shot commands
//! (`preview`, `reset`) log to stderr only.
//!
//! `RUST_LOG` wins when set. Otherwise the bot logs at `[logging] level`
//! while the Telegram client, HTTP stack and SQLite driver stay at `warn`.


use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// File name prefix of rotated log files.
pub const LOG_FILE_PREFIX: &str = "feedcast.log";

/// Dependencies whose chatter is capped at `warn`.
const QUIET_TARGETS: [&str; 4] = ["teloxide", "hyper", "reqwest", "sqlx"];

/// Keeps the file writer flushing. Dropping it flushes and closes the file.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Filter directives used when `RUST_LOG` is unset.
///
/// ```
/// assert_eq!(
///     feedcast::logging::default_directives("debug"),
///     "debug,teloxide=warn,hyper=warn,reqwest=warn,sqlx=warn"
/// );
/// ```
pub fn default_directives(level: &str) -> String {
    let mut directives = level.to_ascii_lowercase();
    for target in QUIET_TARGETS {
        directives.push(',');
        directives.push_str(target);
        directives.push_str("=warn");
    }
    directives
}

/// Start logging for the bot process: `{dir}/feedcast.log.YYYY-MM-DD` plus
/// stderr.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or the level
/// does not parse.
pub fn init_production(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(&config.dir).map_err(|e| {
        anyhow::anyhow!(
            "failed to create log directory {}: {e}",
            config.dir.display()
        )
    })?;

    let file_appender = tracing_appender::rolling::daily(&config.dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(false)
        .with_writer(writer);
    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter(&config.level)?)
        .with(json_layer)
        .with(console_layer)
        .init();

    Ok(LoggingGuard { _guard: guard })
}

/// Start stderr-only logging for a one-shot command.
pub fn init_cli() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives("info")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn filter(level: &str) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(default_directives(level))
        .map_err(|e| anyhow::anyhow!("invalid log level {level:?}: {e}"))
}
