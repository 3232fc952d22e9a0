use std::time::{Duration, Instant};

use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use tokio::sync::Mutex;

use crate::{config::PixivConfig, domain::RelayError};

use super::models::TokenResponse;

pub const AUTH_TOKEN_URL: &str = "https://oauth.secure.pixiv.net/auth/token";
pub const CLIENT_ID: &str = "MOBrBDS8blbauoSck0ZfDbtuzpyT";
pub const CLIENT_SECRET: &str = "lsACyCD94FhDUtGTXi3QzcFE2uU1hqtDaKeqrdwj";
pub const APP_USER_AGENT: &str = "PixivAndroidApp/5.0.234 (Android 11; Pixel 5)";

const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + EXPIRY_MARGIN < self.expires_at
    }
}

pub struct PixivAuth {
    http: Client,
    timeout: Duration,
    refresh_token: RwLock<String>,
    access: RwLock<Option<AccessToken>>,
    refresh_gate: Mutex<()>,
}

impl PixivAuth {
    pub fn new(http: Client, config: &PixivConfig) -> Self {
        Self {
            http,
            timeout: config.api_timeout,
            refresh_token: RwLock::new(config.refresh_token.clone()),
            access: RwLock::new(None),
            refresh_gate: Mutex::new(()),
        }
    }

    pub async fn access_token(&self) -> Result<String, RelayError> {
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let _gate = self.refresh_gate.lock().await;
        if let Some(token) = self.cached() {
            return Ok(token);
        }
        self.refresh().await
    }

    pub fn invalidate(&self) {
        *self.access.write() = None;
    }

    fn cached(&self) -> Option<String> {
        self.access
            .read()
            .as_ref()
            .filter(|token| token.is_fresh())
            .map(|token| token.value.clone())
    }

    async fn refresh(&self) -> Result<String, RelayError> {
        let refresh_token = self.refresh_token.read().clone();
        let form = [
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("grant_type", "refresh_token"),
            ("include_policy", "true"),
            ("refresh_token", refresh_token.as_str()),
        ];

        let response = self
            .http
            .post(AUTH_TOKEN_URL)
            .header(reqwest::header::USER_AGENT, APP_USER_AGENT)
            .form(&form)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                target: "pixiv",
                status = status.as_u16(),
                body = %body,
                "pixiv token refresh rejected"
            );
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    RelayError::Upstream {
                        reason: format!("pixiv rejected the refresh token ({status})"),
                    }
                }
                _ => RelayError::from_status(status, "pixiv token endpoint"),
            });
        }

        let token: TokenResponse = response.json().await.map_err(|err| RelayError::Upstream {
            reason: format!("malformed token response: {err}"),
        })?;

        if let Some(rotated) = token.refresh_token.filter(|t| !t.is_empty()) {
            *self.refresh_token.write() = rotated;
        }
        *self.access.write() = Some(AccessToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });

        tracing::info!(
            target: "pixiv",
            expires_in = token.expires_in,
            "pixiv access token refreshed"
        );
        Ok(token.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_close_to_expiry_are_not_fresh() {
        let stale = AccessToken {
            value: "a".into(),
            expires_at: Instant::now() + Duration::from_secs(30),
        };
        let fresh = AccessToken {
            value: "b".into(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        };
        assert!(!stale.is_fresh());
        assert!(fresh.is_fresh());
    }

    #[tokio::test]
    async fn invalidate_clears_cached_token() {
        let config = PixivConfig {
            refresh_token: "r".into(),
            api_timeout: Duration::from_secs(1),
            resolve_retries: 1,
            retry_base_delay: Duration::from_millis(1),
        };
        let auth = PixivAuth::new(Client::new(), &config);
        *auth.access.write() = Some(AccessToken {
            value: "cached".into(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        });
        assert_eq!(auth.access_token().await.expect("cached token"), "cached");
        auth.invalidate();
        assert!(auth.cached().is_none());
    }
}
