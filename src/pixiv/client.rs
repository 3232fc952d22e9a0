use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::{
    config::PixivConfig,
    domain::{Post, PostId, PostReference, RelayError, UserId},
    tasks::pipeline::PostSource,
};

use super::{
    auth::{PixivAuth, APP_USER_AGENT},
    models::{
        ApiErrorResponse, IllustDetailResponse, UgoiraMetadataResponse, UserIllustsResponse,
    },
};

pub const APP_API_BASE: &str = "https://app-api.pixiv.net";

pub struct PixivClient {
    http: Client,
    config: PixivConfig,
    auth: PixivAuth,
}

enum Attempt<T> {
    Done(T),
    Reauthenticate,
}

impl PixivClient {
    pub fn new(http: Client, config: PixivConfig) -> Self {
        let auth = PixivAuth::new(http.clone(), &config);
        Self { http, config, auth }
    }

    pub async fn login(&self) -> Result<(), RelayError> {
        self.auth.access_token().await.map(|_| ())
    }

    pub async fn fetch_post(&self, post_id: PostId) -> Result<Post, RelayError> {
        let detail: IllustDetailResponse = self
            .get_json(post_id, "/v1/illust/detail", &[("illust_id", post_id.to_string())])
            .await?;

        if detail.illust.is_ugoira() {
            let metadata: UgoiraMetadataResponse = self
                .get_json(post_id, "/v1/ugoira/metadata", &[("illust_id", post_id.to_string())])
                .await?;
            detail.illust.into_ugoira_post(metadata.ugoira_metadata)
        } else {
            detail.illust.into_image_post()
        }
    }

    pub async fn user_post_ids(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<PostId>, RelayError> {
        let mut ids = Vec::new();
        let mut offset = 0usize;
        loop {
            let page: UserIllustsResponse = self
                .get_json(
                    user_id,
                    "/v1/user/illusts",
                    &[
                        ("user_id", user_id.to_string()),
                        ("type", "illust".to_string()),
                        ("offset", offset.to_string()),
                    ],
                )
                .await
                .map_err(|err| match err {
                    RelayError::NotFound { .. } => RelayError::UserNotFound { user_id },
                    other => other,
                })?;

            let fetched = page.illusts.len();
            offset += fetched;
            ids.extend(page.illusts.into_iter().filter(|i| i.visible).map(|i| i.id));
            tracing::debug!(target: "pixiv", user_id, offset, "user works page fetched");

            if fetched == 0 || page.next_url.is_none() || ids.len() >= limit {
                break;
            }
        }
        ids.truncate(limit);
        Ok(ids)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        subject_id: u64,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RelayError> {
        match self.try_get_json(subject_id, path, query).await? {
            Attempt::Done(value) => Ok(value),
            Attempt::Reauthenticate => {
                tracing::info!(target: "pixiv", path, "access token rejected; re-authenticating");
                self.auth.invalidate();
                match self.try_get_json(subject_id, path, query).await? {
                    Attempt::Done(value) => Ok(value),
                    Attempt::Reauthenticate => Err(RelayError::Upstream {
                        reason: "pixiv rejected a freshly issued access token".into(),
                    }),
                }
            }
        }
    }

    async fn try_get_json<T: DeserializeOwned>(
        &self,
        subject_id: u64,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Attempt<T>, RelayError> {
        let token = self.auth.access_token().await?;
        let response = self
            .http
            .get(format!("{APP_API_BASE}{path}"))
            .query(query)
            .bearer_auth(token)
            .header(reqwest::header::USER_AGENT, APP_USER_AGENT)
            .header("App-OS", "android")
            .header("App-OS-Version", "11")
            .timeout(self.config.api_timeout)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let value = response.json::<T>().await.map_err(|err| RelayError::Upstream {
                reason: format!("malformed {path} response: {err}"),
            })?;
            return Ok(Attempt::Done(value));
        }

        let body = response.text().await.unwrap_or_default();
        let api_error = serde_json::from_str::<ApiErrorResponse>(&body)
            .map(|parsed| parsed.error)
            .unwrap_or_default();
        tracing::debug!(
            target: "pixiv",
            subject_id,
            path,
            status = status.as_u16(),
            error = api_error.summary(),
            "pixiv api error"
        );

        classify_failure(subject_id, status, api_error.is_oauth_failure())
    }
}

fn classify_failure<T>(
    post_id: PostId,
    status: StatusCode,
    oauth_failure: bool,
) -> Result<Attempt<T>, RelayError> {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED if oauth_failure => {
            Ok(Attempt::Reauthenticate)
        }
        StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => Err(RelayError::NotFound { post_id }),
        status => Err(RelayError::from_status(status, "pixiv app api")),
    }
}

#[async_trait]
impl PostSource for PixivClient {
    async fn resolve(&self, reference: &PostReference) -> Result<Post, RelayError> {
        self.fetch_post(reference.post_id).await
    }

    async fn user_posts(&self, user_id: UserId, limit: usize) -> Result<Vec<PostId>, RelayError> {
        self.user_post_ids(user_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_restricted_posts_are_not_found() {
        for status in [StatusCode::NOT_FOUND, StatusCode::FORBIDDEN] {
            let result = classify_failure::<()>(9, status, false);
            assert!(matches!(result, Err(RelayError::NotFound { post_id: 9 })));
        }
    }

    #[test]
    fn oauth_rejection_asks_for_reauthentication() {
        let result = classify_failure::<()>(9, StatusCode::BAD_REQUEST, true);
        assert!(matches!(result, Ok(Attempt::Reauthenticate)));
    }

    #[test]
    fn server_errors_are_transient() {
        let result = classify_failure::<()>(9, StatusCode::SERVICE_UNAVAILABLE, false);
        assert!(matches!(result, Err(err) if err.is_transient()));
        let result = classify_failure::<()>(9, StatusCode::BAD_REQUEST, false);
        assert!(matches!(result, Err(RelayError::Upstream { .. })));
    }
}
