use std::{env, str::FromStr, time::Duration};

use super::env::{
    AppConfig, ConfigError, DirectoryConfig, JobConfig, LoggingConfig, MediaConfig, PixivConfig,
    ResilienceConfig, TelegramConfig,
};

const TELEGRAM_FILE_LIMIT: u64 = 50 * 1024 * 1024;
const TELEGRAM_PHOTO_LIMIT: u64 = 10 * 1024 * 1024;

pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::from_lookup(|key| env::var(key).ok())
}

impl AppConfig {
    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram_bot_token =
            var("TELEGRAM_BOT_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;
        let refresh_token =
            var("PIXIV_REFRESH_TOKEN").ok_or(ConfigError::Missing("PIXIV_REFRESH_TOKEN"))?;

        let admin_chat_id = parse_opt::<i64>(&var, "ADMIN_CHAT_ID")?;
        let allowed_chat_ids = match var("ALLOWED_CHAT_IDS") {
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| {
                    part.parse::<i64>().map_err(|_| ConfigError::Invalid {
                        key: "ALLOWED_CHAT_IDS",
                        value: part.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let pixiv = PixivConfig {
            refresh_token,
            api_timeout: secs(parse_or(&var, "PIXIV_API_TIMEOUT_SECS", 30)?),
            resolve_retries: parse_or(&var, "RESOLVE_RETRIES", 1)?,
            retry_base_delay: Duration::from_millis(parse_or(&var, "RETRY_BASE_DELAY_MS", 500)?),
        };

        let media = MediaConfig {
            fetch_timeout: secs(parse_or(&var, "MEDIA_FETCH_TIMEOUT_SECS", 30)?),
            max_upload_bytes: parse_or(&var, "MAX_UPLOAD_BYTES", TELEGRAM_FILE_LIMIT)?,
            photo_max_bytes: parse_or(&var, "PHOTO_MAX_BYTES", TELEGRAM_PHOTO_LIMIT)?,
        };

        let jobs = JobConfig {
            max_posts_per_message: parse_or(&var, "MAX_POSTS_PER_MESSAGE", 10usize)?.max(1),
            max_concurrent_jobs: parse_or(&var, "MAX_CONCURRENT_JOBS", 4usize)?.max(1),
            queue_capacity: parse_or(&var, "JOB_QUEUE_CAPACITY", 64usize)?.max(1),
            max_user_works: parse_or(&var, "MAX_USER_WORKS", 300usize)?.max(1),
        };

        let telegram = TelegramConfig {
            upload_timeout: secs(parse_or(&var, "TELEGRAM_UPLOAD_TIMEOUT_SECS", 60)?),
        };

        let directories = DirectoryConfig {
            logs_dir: var("LOGS_DIR").unwrap_or_else(|| "logs".to_string()),
        };

        let logging = LoggingConfig {
            level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        };

        let resilience = ResilienceConfig {
            network_error_threshold: parse_or(&var, "NETWORK_ERROR_THRESHOLD", 5u32)?.max(1),
            network_error_window: secs(parse_or(&var, "NETWORK_ERROR_WINDOW_SECS", 120)?),
            alert_cooldown: secs(parse_or(&var, "ALERT_COOLDOWN_SECS", 600)?),
        };

        Ok(Self {
            telegram_bot_token,
            admin_chat_id,
            allowed_chat_ids,
            pixiv,
            media,
            jobs,
            telegram,
            directories,
            logging,
            resilience,
        })
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn parse_opt<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match var(key) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(None),
    }
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_opt(var, key)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_tokens_are_set() {
        let config = load(&[("TELEGRAM_BOT_TOKEN", "123:abc"), ("PIXIV_REFRESH_TOKEN", "r")])
            .expect("config loads");
        assert_eq!(config.media.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(config.media.photo_max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.pixiv.resolve_retries, 1);
        assert_eq!(config.media.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.telegram.upload_timeout, Duration::from_secs(60));
        assert_eq!(config.jobs.max_concurrent_jobs, 4);
        assert_eq!(config.jobs.max_user_works, 300);
        assert!(config.allowed_chat_ids.is_empty());
        assert!(config.admin_chat_id.is_none());
    }

    #[test]
    fn missing_token_is_reported_by_name() {
        let err = load(&[("TELEGRAM_BOT_TOKEN", "123:abc")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("PIXIV_REFRESH_TOKEN")));

        let err = load(&[("TELEGRAM_BOT_TOKEN", "  "), ("PIXIV_REFRESH_TOKEN", "r")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TELEGRAM_BOT_TOKEN")));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = load(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("PIXIV_REFRESH_TOKEN", "r"),
            ("MAX_UPLOAD_BYTES", "lots"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MAX_UPLOAD_BYTES", .. }));
    }

    #[test]
    fn allowed_chats_are_parsed_from_csv() {
        let config = load(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("PIXIV_REFRESH_TOKEN", "r"),
            ("ALLOWED_CHAT_IDS", "-1001, 42 ,"),
            ("MAX_CONCURRENT_JOBS", "0"),
            ("MAX_USER_WORKS", "25"),
        ])
        .expect("config loads");
        assert_eq!(config.allowed_chat_ids, vec![-1001, 42]);
        assert_eq!(config.jobs.max_concurrent_jobs, 1);
        assert_eq!(config.jobs.max_user_works, 25);
    }
}
