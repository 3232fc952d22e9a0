use std::sync::Arc;

use tokio::sync::mpsc;
use teloxide::utils::command::BotCommands;

use crate::{config::AppConfig, domain::IncomingMessage};

pub type BotResult<T> = Result<T, teloxide::RequestError>;

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub bot_name: String,
    pub jobs: mpsc::Sender<IncomingMessage>,
}

impl AppState {
    /// An empty allowlist serves every chat.
    pub fn is_chat_allowed(&self, chat_id: i64) -> bool {
        self.config.allowed_chat_ids.is_empty()
            || self.config.allowed_chat_ids.contains(&chat_id)
            || self.config.admin_chat_id == Some(chat_id)
    }
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum GeneralCommand {
    #[command(description = "introduce the bot")]
    Start,
    #[command(description = "show this help")]
    Help,
}
