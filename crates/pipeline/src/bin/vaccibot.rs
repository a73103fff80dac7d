//! vaccibot: polls the booking API and announces free vaccination slots.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use vaccibot_core::config::load_dotenv;
use vaccibot_core::Config;
use vaccibot_notify::{QuietHours, TelegramNotifier};
use vaccibot_pipeline::{cancel_on_signal, spawn_pipeline, PipelineSettings, StageGroup};
use vaccibot_source::GorzdravClient;
use vaccibot_storage::{KeyValueStore, SqliteStore};

// ── CLI ─────────────────────────────────────────────────────────────

/// Announces free vaccination slots to a Telegram chat.
#[derive(Parser, Debug)]
#[command(name = "vaccibot", version, about)]
struct Cli {
    /// Load environment variables from this file instead of `./.env`.
    #[arg(long, env = "VACCIBOT_ENV_FILE")]
    env_file: Option<PathBuf>,

    /// Run a single poll, drain the pipeline and exit.
    #[arg(long)]
    once: bool,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("loading env file {}", path.display()))?;
        }
        None => load_dotenv(),
    }

    let config = Config::from_env().context("reading configuration")?;
    config.validate().context("invalid configuration")?;
    config.log_summary();

    let store = SqliteStore::open(&config.storage.db_path)
        .await
        .with_context(|| format!("opening dedup store {}", config.storage.db_path.display()))?;
    store.ping().await.context("dedup store health check")?;

    let source = GorzdravClient::new(config.upstream.base_url.clone())
        .context("building upstream client")?;

    let quiet_hours = config
        .telegram
        .quiet_hours
        .map(|window| QuietHours::new(window, config.telegram.utc_offset_hours))
        .transpose()
        .context("quiet hours")?;
    let notifier = TelegramNotifier::from_config(
        config.telegram.bot_token.clone().context("telegram token")?,
        config.telegram.chat_id.clone().context("telegram chat")?,
        quiet_hours,
        config.telegram.send_timeout,
    )
    .context("telegram notifier")?;

    let settings = PipelineSettings::from_config(&config, cli.once)?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let mut group = StageGroup::new();
    spawn_pipeline(&mut group, &cancel, source, notifier, store.clone(), settings)
        .context("starting pipeline")?;

    let outcome = group.wait(&cancel).await;
    info!(?outcome, "pipeline stopping");
    cancel.cancel();

    let aborted = group.shutdown(config.shutdown_grace).await;
    store.close().await;
    info!(aborted, "vaccibot shutdown complete");
    Ok(())
}
