use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use teloxide::{
    dispatching::Dispatcher,
    error_handlers::ErrorHandler,
    prelude::*,
    types::{Message, ParseMode, ReplyParameters},
    update_listeners,
    utils::command::BotCommands,
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::Instant,
};

use crate::{
    config::AppConfig,
    domain::IncomingMessage,
    infrastructure::{notifier::notify_admin_chat, shutdown::ShutdownListener},
    pixiv::{extract_post_refs, extract_user_refs},
};

use super::{
    types::{AppState, BotResult, GeneralCommand},
    utils::{command_list, greeting},
};

pub struct TelegramService {
    bot: Bot,
    state: Arc<AppState>,
}

#[derive(Default)]
struct WatchdogState {
    first_error_at: Option<Instant>,
    consecutive_errors: u32,
    last_alert_at: Option<Instant>,
}

#[derive(Clone, Copy, Debug)]
enum NetworkIssueKind {
    Timeout,
    Connection,
    Other,
}

impl NetworkIssueKind {
    fn label(&self) -> &'static str {
        match self {
            NetworkIssueKind::Timeout => "request timeout",
            NetworkIssueKind::Connection => "connection failure",
            NetworkIssueKind::Other => "network error",
        }
    }
}

struct NetworkIssueInfo {
    kind: NetworkIssueKind,
    url: Option<String>,
    detail: String,
}

struct UpdateListenerWatchdog {
    bot: Bot,
    config: Arc<AppConfig>,
    state: Mutex<WatchdogState>,
}

impl UpdateListenerWatchdog {
    fn new(bot: Bot, config: Arc<AppConfig>) -> Arc<Self> {
        Arc::new(Self {
            bot,
            config,
            state: Mutex::new(WatchdogState::default()),
        })
    }

    async fn process_error(self: Arc<Self>, error: teloxide::RequestError) {
        if let Some(info) = Self::classify_network_issue(&error) {
            self.handle_network_failure(info, error).await;
        } else {
            tracing::error!(
                target: "telegram",
                error = %error,
                "update listener error"
            );
        }
    }

    fn classify_network_issue(error: &teloxide::RequestError) -> Option<NetworkIssueInfo> {
        match error {
            teloxide::RequestError::Network(source) => {
                let req_err = source.as_ref();
                let kind = if req_err.is_timeout() {
                    NetworkIssueKind::Timeout
                } else if req_err.is_connect() {
                    NetworkIssueKind::Connection
                } else {
                    NetworkIssueKind::Other
                };
                Some(NetworkIssueInfo {
                    kind,
                    url: req_err.url().map(|u| u.to_string()),
                    detail: req_err.to_string(),
                })
            }
            _ => None,
        }
    }

    async fn handle_network_failure(&self, info: NetworkIssueInfo, error: teloxide::RequestError) {
        let now = Instant::now();
        let alert: Option<(u32, std::time::Duration)> = {
            let mut state = self.state.lock();
            let resilience = &self.config.resilience;

            if state
                .first_error_at
                .map(|ts| now.duration_since(ts) > resilience.network_error_window)
                .unwrap_or(true)
            {
                state.first_error_at = Some(now);
                state.consecutive_errors = 0;
            }

            state.consecutive_errors = state.consecutive_errors.saturating_add(1);
            let consecutive = state.consecutive_errors;
            let elapsed = now.duration_since(state.first_error_at.unwrap_or(now));

            tracing::error!(
                target: "telegram",
                issue = info.kind.label(),
                url = info.url.as_deref(),
                consecutive,
                error = %error,
                "Telegram polling network failure"
            );

            let cooling_down = state
                .last_alert_at
                .map(|ts| now.duration_since(ts) < resilience.alert_cooldown)
                .unwrap_or(false);
            if consecutive >= resilience.network_error_threshold && !cooling_down {
                state.last_alert_at = Some(now);
                state.first_error_at = None;
                state.consecutive_errors = 0;
                Some((consecutive, elapsed))
            } else {
                None
            }
        };

        let Some((consecutive, elapsed)) = alert else {
            return;
        };

        tracing::warn!(
            target: "telegram",
            consecutive,
            elapsed_secs = elapsed.as_secs(),
            "repeated polling failures; alerting admin chat"
        );
        let summary = Self::build_summary(&info, consecutive, elapsed);
        notify_admin_chat(&self.bot, self.config.as_ref(), &summary).await;
    }

    fn build_summary(info: &NetworkIssueInfo, consecutive: u32, elapsed: std::time::Duration) -> String {
        let mut message = format!(
            "Telegram polling reported {consecutive} consecutive {kind}s over the last {secs}s.",
            kind = info.kind.label(),
            secs = elapsed.as_secs()
        );
        if let Some(url) = info.url.as_deref() {
            message.push_str(&format!("\n- last request: {}", html_escape::encode_text(url)));
        }
        message.push_str(&format!(
            "\n- detail: {}",
            html_escape::encode_text(&info.detail)
        ));
        message
    }
}

impl ErrorHandler<teloxide::RequestError> for UpdateListenerWatchdog {
    fn handle_error(self: Arc<Self>, error: teloxide::RequestError) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            self.process_error(error).await;
        })
    }
}

impl TelegramService {
    pub fn new(
        bot: Bot,
        config: Arc<AppConfig>,
        bot_name: String,
        jobs: mpsc::Sender<IncomingMessage>,
    ) -> Self {
        let state = Arc::new(AppState {
            config,
            bot_name,
            jobs,
        });
        Self { bot, state }
    }

    pub async fn run(&self, mut shutdown: ShutdownListener) -> Result<()> {
        self.bot.set_my_commands(command_list()).await?;
        tracing::info!(target: "telegram", "bot commands registered");

        let handler = Update::filter_message()
            .branch(
                dptree::entry()
                    .filter_command::<GeneralCommand>()
                    .endpoint(Self::on_command),
            )
            .branch(dptree::endpoint(Self::on_plain_message));

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![self.state.clone()])
            .default_handler(|update| async move {
                tracing::debug!(target: "telegram", ?update, "unhandled update");
            })
            .build();

        let listener = update_listeners::polling_default(self.bot.clone()).await;
        let watchdog = UpdateListenerWatchdog::new(self.bot.clone(), self.state.config.clone());

        let shutdown_token = dispatcher.shutdown_token();
        let mut dispatcher_future = Box::pin(dispatcher.dispatch_with_listener(listener, watchdog));
        let mut dispatcher_finished = false;

        tokio::select! {
            _ = shutdown.notified() => {
                tracing::info!(target: "telegram", "dispatcher shutdown requested");
                if let Ok(wait) = shutdown_token.shutdown() {
                    wait.await;
                }
            }
            _ = &mut dispatcher_future => {
                dispatcher_finished = true;
                tracing::info!(target: "telegram", "dispatcher stopped");
            }
        }

        if !dispatcher_finished {
            dispatcher_future.await;
        }

        Ok(())
    }

    async fn on_plain_message(bot: Bot, msg: Message, state: Arc<AppState>) -> BotResult<()> {
        let Some(text) = msg.text().map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(());
        };
        if !names_pixiv_content(text, state.config.jobs.max_posts_per_message) {
            return Ok(());
        }
        if !state.is_chat_allowed(msg.chat.id.0) {
            tracing::debug!(target: "telegram", chat_id = msg.chat.id.0, "chat not allowed");
            return Ok(());
        }

        let job = IncomingMessage {
            chat_id: msg.chat.id,
            message_id: msg.id,
            from_id: msg.from.as_ref().map(|u| u.id.0),
            text: text.to_string(),
            timestamp: msg.date,
        };

        match state.jobs.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                tracing::warn!(
                    target: "telegram",
                    chat_id = job.chat_id.0,
                    "job queue full; rejecting message"
                );
                bot.send_message(msg.chat.id, "I'm busy right now, please try again in a minute.")
                    .reply_parameters(ReplyParameters::new(msg.id))
                    .await?;
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(target: "telegram", "job queue closed; dropping message");
            }
        }
        Ok(())
    }

    async fn on_command(
        bot: Bot,
        msg: Message,
        cmd: GeneralCommand,
        state: Arc<AppState>,
    ) -> BotResult<()> {
        match cmd {
            GeneralCommand::Start => {
                bot.send_message(msg.chat.id, greeting(&state.bot_name))
                    .parse_mode(ParseMode::Html)
                    .await?
            }
            GeneralCommand::Help => {
                bot.send_message(msg.chat.id, GeneralCommand::descriptions().to_string())
                    .await?
            }
        };
        Ok(())
    }
}

fn names_pixiv_content(text: &str, limit: usize) -> bool {
    !extract_post_refs(text, limit).is_empty() || !extract_user_refs(text, limit).is_empty()
}
