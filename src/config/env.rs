use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telegram_bot_token: String,
    pub admin_chat_id: Option<i64>,
    pub allowed_chat_ids: Vec<i64>,
    pub pixiv: PixivConfig,
    pub media: MediaConfig,
    pub jobs: JobConfig,
    pub telegram: TelegramConfig,
    pub directories: DirectoryConfig,
    pub logging: LoggingConfig,
    pub resilience: ResilienceConfig,
}

#[derive(Debug, Clone)]
pub struct PixivConfig {
    pub refresh_token: String,
    pub api_timeout: Duration,
    pub resolve_retries: usize,
    pub retry_base_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub fetch_timeout: Duration,
    /// Hard ceiling for any single asset; matches the Bot API upload limit.
    pub max_upload_bytes: u64,
    pub photo_max_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub max_posts_per_message: usize,
    pub max_concurrent_jobs: usize,
    pub queue_capacity: usize,
    pub max_user_works: usize,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub upload_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub logs_dir: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub network_error_threshold: u32,
    pub network_error_window: Duration,
    pub alert_cooldown: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}
