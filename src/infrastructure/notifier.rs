use teloxide::{prelude::*, types::ParseMode};

use crate::config::AppConfig;

pub async fn notify_admin_chat(bot: &Bot, config: &AppConfig, text: &str) {
    let Some(admin_chat_id) = config.admin_chat_id.filter(|id| *id != 0) else {
        tracing::debug!(target: "telegram", "no admin chat configured; notice dropped");
        return;
    };
    if let Err(err) = bot
        .send_message(ChatId(admin_chat_id), text)
        .parse_mode(ParseMode::Html)
        .disable_notification(true)
        .await
    {
        tracing::warn!(
            target: "telegram",
            error = %err,
            admin_chat_id,
            "failed to send admin notification"
        );
    }
}
