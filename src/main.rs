use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{error, info, warn};

use tg_digestbot::config;
use tg_digestbot::db;
use tg_digestbot::handlers::{self, Admins};
use tg_digestbot::ingest::{Ingestor, WatchList};
use tg_digestbot::openai::OpenAiClient;
use tg_digestbot::pipeline::{Pipeline, PipelineSettings};
use tg_digestbot::publisher::{ChannelPublisher, TelegramPublisher};
use tg_digestbot::scheduler;
use tg_digestbot::summarizer::{Floors, Summarizer};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let telegram = TelegramPublisher::new(bot.clone());
    telegram.connect().await?;
    let publisher: Arc<dyn ChannelPublisher> = Arc::new(telegram);

    let timeout = cfg.summary.backend_timeout();
    let backend = OpenAiClient::from_config(&cfg.openai, timeout)?;
    let summarizer = Summarizer::new(Arc::new(backend), timeout, Floors::from(&cfg.quality));
    let pipeline = Pipeline::new(
        pool.clone(),
        summarizer,
        publisher,
        PipelineSettings::from(&cfg),
    );
    let ingestor = Arc::new(Ingestor::new(
        pool.clone(),
        WatchList::new(&cfg.watch.patterns),
        cfg.quality.filter(),
    ));
    let admins = Admins(Arc::new(cfg.telegram.allowed_users.clone()));

    scheduler::log_stats(&pipeline).await;
    match pipeline.channel_stats().await {
        Ok(channels) => {
            for ch in channels {
                info!(
                    name = %ch.name,
                    username = ch.username.as_deref().unwrap_or("-"),
                    posts = ch.posts_count,
                    active = ch.is_active,
                    "monitored channel"
                );
            }
        }
        Err(err) => error!(%err, "failed to read channel stats"),
    }

    let mut sched = scheduler::start(
        pipeline.clone(),
        &cfg.summary.schedule,
        &cfg.summary.stats_schedule,
    )
    .await?;

    let handler = dptree::entry()
        .branch(Update::filter_channel_post().endpoint(handlers::handle_channel_post))
        .branch(Update::filter_my_chat_member().endpoint(handlers::handle_membership))
        .branch(Update::filter_message().endpoint(handlers::handle_admin_message));

    info!(patterns = ?cfg.watch.patterns, target = %cfg.telegram.target_channel, "starting telegram bot");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ingestor, pipeline.clone(), admins])
        .default_handler(|_| async {})
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("shutting down");
    if let Err(err) = sched.shutdown().await {
        warn!(%err, "scheduler shutdown failed");
    }
    pipeline.wait_idle().await;
    pool.close().await;
    Ok(())
}
