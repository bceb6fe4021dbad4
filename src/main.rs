//! Feedcast CLI entry point.
//!
//! Provides `start`, `reset`, and `preview` subcommands for running the bot,
//! clearing persisted state, or dry-running the feed segmentation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use teloxide::Bot;
use tokio::sync::watch;
use tracing::{error, info, warn};

use feedcast::admin::AdminRegistry;
use feedcast::compose::{ComposerDriver, SessionStore};
use feedcast::config::{self, Config};
use feedcast::fanout::FanoutEngine;
use feedcast::feed::{parse_feed, select_latest, FeedError, FeedSource, HttpFeedSource, Poller, RetryPolicy};
use feedcast::reporter::{BugLog, ErrorSink, OwnerReporter};
use feedcast::store::{KvStore, Namespace, SqliteStore, WatermarkStore};
use feedcast::strings::Strings;
use feedcast::telegram::{self, BotContext, BotDeps};
use feedcast::transport::telegram::TelegramTransport;
use feedcast::transport::Transport;

/// Feedcast: rebroadcast a web feed to Telegram chats.
#[derive(Parser)]
#[command(name = "feedcast", version, about)]
struct Cli {
    /// Config file (default: `~/.feedcast/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the bot until Ctrl+C.
    Start,
    /// Clear persisted state.
    Reset {
        /// What to clear.
        #[arg(value_enum)]
        target: ResetTarget,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// Print the segments the newest post would be sent as.
    Preview,
}

/// Storage namespaces selectable by `reset`.
#[derive(Clone, Copy, ValueEnum)]
enum ResetTarget {
    /// Watermark, interval, owner and admins.
    Data,
    /// The chat registry.
    Chats,
    /// Everything.
    All,
}

impl ResetTarget {
    fn namespaces(self) -> &'static [Namespace] {
        match self {
            Self::Data => &[Namespace::Config],
            Self::Chats => &[Namespace::Chats],
            Self::All => &[Namespace::Config, Namespace::Chats],
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config::config_dir()?.join("config.toml"),
    };

    match cli.command {
        Command::Start => handle_start(&config_path).await,
        Command::Reset { target, yes } => handle_reset(&config_path, target, yes).await,
        Command::Preview => handle_preview(&config_path).await,
    }
}

fn load(config_path: &Path) -> anyhow::Result<Config> {
    let config = config::load_config(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    config.validate()?;
    Ok(config)
}

fn feed_source(config: &Config) -> anyhow::Result<HttpFeedSource> {
    HttpFeedSource::new(
        &config.feed.url,
        config.feed.timeout(),
        &config.feed.user_agent,
    )
    .context("failed to create feed client")
}

fn retry_policy(config: &Config) -> RetryPolicy<FeedError> {
    RetryPolicy::new(
        config.retry.max_attempts,
        Duration::from_secs(config.retry.base_delay_secs),
        config.retry.multiplier,
        FeedError::is_transient,
    )
}

/// Run the bot: dispatcher in the foreground, poller in the background.
async fn handle_start(config_path: &Path) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let _logging_guard = feedcast::logging::init_production(&config.logging)?;

    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let bot_token = config::bot_token(&config.telegram, config_dir)?;

    let sqlite = Arc::new(
        SqliteStore::open(&config.storage.db_path)
            .await
            .with_context(|| format!("failed to open {}", config.storage.db_path.display()))?,
    );
    let store = WatermarkStore::new(Arc::clone(&sqlite) as Arc<dyn KvStore>);

    let strings = Arc::new(match &config.strings.file {
        Some(path) => Strings::load(path, &config.strings.language)?,
        None => Strings::builtin(),
    });

    let bot = Bot::new(&bot_token);
    let transport: Arc<dyn Transport> = Arc::new(TelegramTransport::new(bot.clone()));
    let bug_log = Arc::new(BugLog::new());
    let sink: Arc<dyn ErrorSink> = Arc::new(OwnerReporter::new(
        Arc::clone(&transport),
        store.clone(),
        Arc::clone(&bug_log),
    ));

    let fanout = Arc::new(
        FanoutEngine::new(
            Arc::clone(&transport),
            Arc::clone(&sink),
            config.fanout.concurrency,
        )
        .with_retry_after_cap(Duration::from_secs(config.fanout.max_retry_after_secs)),
    );

    let poller = Arc::new(Poller::new(
        Arc::new(feed_source(&config)?),
        retry_policy(&config),
        store.clone(),
        Arc::clone(&fanout),
        Arc::clone(&sink),
        Arc::clone(&strings),
        config.feed.default_interval(),
    ));

    let sessions = Arc::new(SessionStore::new());
    let composer = Arc::new(ComposerDriver::new(
        Arc::clone(&transport),
        Arc::clone(&fanout),
        store.clone(),
        Arc::clone(&sink),
    ));
    let context = Arc::new(BotContext::new(BotDeps {
        transport: Arc::clone(&transport),
        store: store.clone(),
        admin: Arc::new(AdminRegistry::new(store.clone())),
        strings,
        poller: Arc::clone(&poller),
        sessions,
        composer,
        bot_token,
        last_feed_cooldown: config.limits.last_feed_cooldown(),
    }));

    info!(
        config = %config_path.display(),
        feed = %config.feed.url,
        db = %config.storage.db_path.display(),
        "feedcast started"
    );

    let (fatal_tx, _) = watch::channel(false);
    let fatal_tx = Arc::new(fatal_tx);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poll_task = {
        let fatal_tx = Arc::clone(&fatal_tx);
        let poller = Arc::clone(&poller);
        tokio::spawn(async move {
            let result = poller.run(shutdown_rx).await;
            if result.is_err() {
                fatal_tx.send_replace(true);
            }
            result
        })
    };

    let dispatch_result = telegram::run_telegram(bot, context, Arc::clone(&fatal_tx)).await;

    // Let the in-flight poll cycle finish.
    shutdown_tx.send_replace(true);
    let poll_result = match poll_task.await {
        Ok(result) => result.map_err(anyhow::Error::from),
        Err(e) => Err(anyhow::anyhow!("poller task failed: {e}")),
    };

    if let Some(path) = &config.reporter.bugs_file {
        match bug_log.dump(path) {
            Ok(()) => info!(path = %path.display(), "bug log written"),
            Err(e) => warn!(error = %e, "failed to write bug log"),
        }
    }
    sqlite.close().await;
    info!("feedcast stopped");

    dispatch_result?;
    poll_result?;
    if *fatal_tx.borrow() {
        error!("stopped after a storage failure");
        anyhow::bail!("storage failure, see logs");
    }
    Ok(())
}

/// Clear one or both storage namespaces.
async fn handle_reset(config_path: &Path, target: ResetTarget, yes: bool) -> anyhow::Result<()> {
    feedcast::logging::init_cli();
    let config = config::load_config(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let names: Vec<&str> = target.namespaces().iter().map(|ns| ns.as_str()).collect();
    if !yes && !confirm(&format!(
        "Clear {} in {}?",
        names.join(" and "),
        config.storage.db_path.display()
    ))? {
        println!("Aborted.");
        return Ok(());
    }

    let store = SqliteStore::open(&config.storage.db_path)
        .await
        .with_context(|| format!("failed to open {}", config.storage.db_path.display()))?;
    for &ns in target.namespaces() {
        let removed = store.clear(ns).await?;
        info!(namespace = ns.as_str(), removed, "namespace cleared");
        println!("Cleared {}: {removed} entries", ns.as_str());
    }
    store.close().await;
    Ok(())
}

/// Ask a yes/no question on stdin.
fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Fetch the feed once and print what the newest post would be sent as.
async fn handle_preview(config_path: &Path) -> anyhow::Result<()> {
    feedcast::logging::init_cli();
    let config = load(config_path)?;

    let source = feed_source(&config)?;
    let raw = retry_policy(&config)
        .run(|| source.fetch())
        .await
        .context("failed to fetch feed")?;
    let items = parse_feed(&raw).context("failed to parse feed")?;
    info!(items = items.len(), "feed parsed");

    let latest = match select_latest(items) {
        Ok(Some(latest)) => latest,
        Ok(None) => {
            println!("The feed has no broadcastable item.");
            return Ok(());
        }
        Err(e) => anyhow::bail!("newest item cannot be segmented: {e:?}"),
    };

    println!("title:     {}", latest.item.title);
    println!("link:      {}", latest.item.link);
    match latest.item.published_at {
        Some(at) => println!("published: {}", at.to_rfc3339()),
        None => println!("published: (missing or invalid)"),
    }
    for (n, segment) in latest.segments.iter().enumerate() {
        println!("\n--- segment {} ---", n.saturating_add(1));
        println!("{}", serde_json::to_string_pretty(segment)?);
    }
    Ok(())
}
