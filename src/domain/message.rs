use chrono::{DateTime, Utc};
use teloxide::{prelude::*, types::MessageId};

#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub from_id: Option<u64>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}
