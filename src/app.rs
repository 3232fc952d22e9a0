use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use reqwest::Client;
use teloxide::prelude::*;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    config::AppConfig,
    infrastructure::{directories::ResolvedPaths, notifier::notify_admin_chat, shutdown::Shutdown},
    media::MediaFetcher,
    pixiv::PixivClient,
    tasks::{
        pipeline::{PipelineLimits, RelayPipeline},
        processor::MessageProcessor,
        retry::RetryPolicy,
    },
    telegram::{TelegramResponder, TelegramService},
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const FALLBACK_BOT_NAME: &str = "pixiv relay bot";

pub struct PixivRelayApp {
    _paths: ResolvedPaths,
    processor_handle: JoinHandle<()>,
    telegram: TelegramService,
    shutdown: Shutdown,
    config: Arc<AppConfig>,
    bot: Bot,
}

impl PixivRelayApp {
    pub async fn initialize(
        config: AppConfig,
        paths: ResolvedPaths,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let config = Arc::new(config);

        let http_client = Client::builder()
            .user_agent(format!("pixiv-relay-bot/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        let telegram_client = teloxide::net::default_reqwest_settings()
            .timeout(config.telegram.upload_timeout)
            .build()
            .context("failed to build Telegram HTTP client")?;
        let bot = Bot::with_client(&config.telegram_bot_token, telegram_client);

        let pixiv = Arc::new(PixivClient::new(http_client.clone(), config.pixiv.clone()));
        match pixiv.login().await {
            Ok(()) => tracing::info!(target: "pixiv", "pixiv login succeeded"),
            Err(err) => tracing::warn!(
                target: "pixiv",
                error = %err,
                "pixiv login failed; will retry on first request"
            ),
        }

        let fetcher = Arc::new(MediaFetcher::new(http_client, config.media.clone()));
        let responder = Arc::new(TelegramResponder::new(bot.clone(), &config.media));
        let retry = RetryPolicy {
            retries: config.pixiv.resolve_retries,
            base_delay: config.pixiv.retry_base_delay,
        };
        let pipeline = Arc::new(RelayPipeline::new(
            pixiv,
            fetcher,
            responder,
            retry,
            PipelineLimits {
                max_posts: config.jobs.max_posts_per_message,
                max_user_works: config.jobs.max_user_works,
                archive_bytes: config.media.max_upload_bytes,
            },
        ));

        let (jobs_tx, jobs_rx) = mpsc::channel(config.jobs.queue_capacity);
        let processor = Arc::new(MessageProcessor::new(
            pipeline,
            config.jobs.max_concurrent_jobs,
            SHUTDOWN_GRACE,
        ));
        let processor_handle = processor.spawn(jobs_rx, shutdown.subscribe());

        let bot_name = match bot.get_me().await {
            Ok(me) => me.user.first_name.clone(),
            Err(err) => {
                tracing::warn!(target: "telegram", error = %err, "getMe failed");
                FALLBACK_BOT_NAME.to_string()
            }
        };

        let telegram = TelegramService::new(bot.clone(), config.clone(), bot_name, jobs_tx);

        Ok(Self {
            _paths: paths,
            processor_handle,
            telegram,
            shutdown,
            config,
            bot,
        })
    }

    pub async fn run(self) -> Result<()> {
        let PixivRelayApp {
            _paths: _,
            mut processor_handle,
            telegram,
            shutdown,
            config,
            bot,
        } = self;

        tracing::info!(
            target: "lifecycle",
            max_concurrent_jobs = config.jobs.max_concurrent_jobs,
            allowed_chats = config.allowed_chat_ids.len(),
            "pixiv relay bot started"
        );
        notify_admin_chat(&bot, config.as_ref(), "pixiv relay bot started.").await;

        let mut shutdown_listener = shutdown.subscribe();
        let mut telegram_future = Box::pin(telegram.run(shutdown.subscribe()));
        let mut telegram_completed = false;

        tokio::select! {
            _ = shutdown_listener.notified() => {
                tracing::info!(target: "lifecycle", "shutdown signal received");
            }
            res = &mut telegram_future => {
                telegram_completed = true;
                if let Err(err) = res {
                    tracing::error!(target: "telegram", ?err, "dispatcher exited with an error");
                } else {
                    tracing::info!(target: "telegram", "dispatcher exited");
                }
            }
        }

        shutdown.trigger();

        if !telegram_completed {
            let wait = tokio::time::sleep(SHUTDOWN_GRACE);
            tokio::pin!(wait);
            tokio::select! {
                res = &mut telegram_future => {
                    if let Err(err) = res {
                        tracing::error!(target: "telegram", ?err, "dispatcher exited with an error");
                    }
                }
                _ = &mut wait => {
                    tracing::warn!(
                        target: "telegram",
                        "Telegram dispatcher did not stop within {:?}; moving on",
                        SHUTDOWN_GRACE
                    );
                }
            }
        }

        // The processor applies its own grace to in-flight jobs; allow a little on top.
        let processor_sleep = tokio::time::sleep(SHUTDOWN_GRACE * 2);
        tokio::pin!(processor_sleep);
        tokio::select! {
            res = &mut processor_handle => {
                if let Err(err) = res {
                    if err.is_panic() {
                        tracing::error!(target: "processor", "message processor panicked");
                    }
                }
            }
            _ = &mut processor_sleep => {
                tracing::warn!(
                    target: "processor",
                    "message processor did not stop within {:?}; aborting",
                    SHUTDOWN_GRACE * 2
                );
                processor_handle.abort();
            }
        }

        tracing::info!(target: "lifecycle", "pixiv relay bot stopped");
        notify_admin_chat(&bot, config.as_ref(), "pixiv relay bot stopped.").await;
        Ok(())
    }
}
