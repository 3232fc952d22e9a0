use std::{slice, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use teloxide::types::{ChatId, MessageId};

use crate::{
    domain::{
        user_link, AssetRequest, IncomingMessage, MediaAsset, Post, PostId, PostOutcome,
        PostReference, RelayError, UserId, UserReference,
    },
    media::archive::{ArchiveBatcher, PackedArchive},
    pixiv::{extract_post_refs, extract_user_refs},
    telegram::utils::{
        archive_caption, build_caption, collecting_text, escape_html, no_works_text,
        sending_works_text, status_text, works_sent_text,
    },
};

use super::retry::{retry_transient, RetryPolicy};

#[async_trait]
pub trait PostSource: Send + Sync {
    async fn resolve(&self, reference: &PostReference) -> Result<Post, RelayError>;
    /// Newest first, at most `limit` ids.
    async fn user_posts(&self, user_id: UserId, limit: usize) -> Result<Vec<PostId>, RelayError>;
}

#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch(&self, request: &AssetRequest) -> Result<MediaAsset, RelayError>;
}

#[async_trait]
pub trait Responder: Send + Sync {
    async fn send_status(&self, chat_id: ChatId, reply_to: MessageId, text: &str)
        -> Option<MessageId>;
    async fn clear_status(&self, chat_id: ChatId, status_id: MessageId);
    async fn deliver(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        assets: &[MediaAsset],
        caption: &str,
    ) -> Result<(), RelayError>;
    async fn send_notice(&self, chat_id: ChatId, reply_to: MessageId, text: &str);
    async fn report_failure(&self, chat_id: ChatId, reply_to: MessageId, text: &str);
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineLimits {
    pub max_posts: usize,
    pub max_user_works: usize,
    pub archive_bytes: u64,
}

pub struct RelayPipeline {
    source: Arc<dyn PostSource>,
    assets: Arc<dyn AssetSource>,
    responder: Arc<dyn Responder>,
    retry: RetryPolicy,
    limits: PipelineLimits,
}

impl RelayPipeline {
    pub fn new(
        source: Arc<dyn PostSource>,
        assets: Arc<dyn AssetSource>,
        responder: Arc<dyn Responder>,
        retry: RetryPolicy,
        limits: PipelineLimits,
    ) -> Self {
        Self {
            source,
            assets,
            responder,
            retry,
            limits,
        }
    }

    /// Posts first, then every work of each named user.
    pub async fn run(&self, message: &IncomingMessage) -> Vec<PostOutcome> {
        let refs = extract_post_refs(&message.text, self.limits.max_posts);
        let users = extract_user_refs(&message.text, self.limits.max_posts);
        if refs.is_empty() && users.is_empty() {
            return Vec::new();
        }

        let total = refs.len();
        tracing::info!(
            target: "processor",
            chat_id = message.chat_id.0,
            from_id = message.from_id,
            posts = total,
            users = users.len(),
            queued_ms = (Utc::now() - message.timestamp).num_milliseconds(),
            "relaying message"
        );
        let mut outcomes = Vec::with_capacity(total);
        for (index, reference) in refs.iter().enumerate() {
            let position = (total > 1).then_some((index + 1, total));
            outcomes.push(self.relay_post(message, reference, position).await);
        }
        for user in users {
            outcomes.extend(self.relay_user(message, user).await);
        }
        outcomes
    }

    async fn relay_post(
        &self,
        message: &IncomingMessage,
        reference: &PostReference,
        position: Option<(usize, usize)>,
    ) -> PostOutcome {
        let post_id = reference.post_id;
        let status = self
            .responder
            .send_status(message.chat_id, message.message_id, &status_text(post_id))
            .await;

        let result = match self.collect(reference).await {
            Ok((post, assets)) => {
                let caption = build_caption(&post, reference, position);
                self.responder
                    .deliver(message.chat_id, message.message_id, &assets, &caption)
                    .await
                    .map(|()| assets.len())
            }
            Err(error) => Err(error),
        };

        if let Some(status_id) = status {
            self.responder.clear_status(message.chat_id, status_id).await;
        }

        match result {
            Ok(assets) => {
                tracing::info!(
                    target: "processor",
                    chat_id = message.chat_id.0,
                    post_id,
                    assets,
                    "post delivered"
                );
                PostOutcome::Delivered { post_id, assets }
            }
            Err(error) => self.post_failed(message, reference, error).await,
        }
    }

    async fn collect(
        &self,
        reference: &PostReference,
    ) -> Result<(Post, Vec<MediaAsset>), RelayError> {
        let post = retry_transient(self.retry, || self.source.resolve(reference))
            .await?
            .select_page(reference.page)?;

        // Pages are fetched in order; the first failure abandons the whole post.
        let requests = post.asset_requests();
        let mut assets = Vec::with_capacity(requests.len());
        for request in &requests {
            assets.push(self.assets.fetch(request).await?);
        }
        Ok((post, assets))
    }

    async fn post_failed(
        &self,
        message: &IncomingMessage,
        reference: &PostReference,
        error: RelayError,
    ) -> PostOutcome {
        let post_id = reference.post_id;
        tracing::warn!(
            target: "processor",
            chat_id = message.chat_id.0,
            post_id,
            error = %error,
            "post failed"
        );
        let link = escape_html(&reference.link());
        self.responder
            .report_failure(
                message.chat_id,
                message.message_id,
                &error.user_message(post_id, &link),
            )
            .await;
        PostOutcome::Failed { post_id, error }
    }

    async fn relay_user(
        &self,
        message: &IncomingMessage,
        user: UserReference,
    ) -> Vec<PostOutcome> {
        let UserReference {
            user_id,
            as_archive,
        } = user;
        self.notice(message, &collecting_text(user_id)).await;

        let limit = self.limits.max_user_works;
        let ids = match retry_transient(self.retry, || self.source.user_posts(user_id, limit)).await
        {
            Ok(ids) => ids,
            Err(error) => {
                tracing::warn!(
                    target: "processor",
                    chat_id = message.chat_id.0,
                    user_id,
                    error = %error,
                    "user listing failed"
                );
                let text = error.user_listing_message(user_id, &escape_html(&user_link(user_id)));
                self.responder
                    .report_failure(message.chat_id, message.message_id, &text)
                    .await;
                return Vec::new();
            }
        };
        if ids.is_empty() {
            self.notice(message, &no_works_text(user_id)).await;
            return Vec::new();
        }

        let total = ids.len();
        tracing::info!(
            target: "processor",
            chat_id = message.chat_id.0,
            user_id,
            works = total,
            as_archive,
            "relaying user works"
        );
        self.notice(message, &sending_works_text(user_id, total)).await;

        let outcomes = if as_archive {
            self.relay_user_archives(message, user_id, &ids).await
        } else {
            let mut outcomes = Vec::with_capacity(total);
            for (index, post_id) in ids.iter().copied().enumerate() {
                let reference = PostReference::from_id(post_id);
                outcomes.push(
                    self.relay_post(message, &reference, Some((index + 1, total)))
                        .await,
                );
            }
            outcomes
        };

        let delivered = outcomes.iter().filter(|o| o.is_delivered()).count();
        self.notice(message, &works_sent_text(user_id, delivered, total))
            .await;
        outcomes
    }

    async fn relay_user_archives(
        &self,
        message: &IncomingMessage,
        user_id: UserId,
        ids: &[PostId],
    ) -> Vec<PostOutcome> {
        let total = ids.len();
        let mut batcher = ArchiveBatcher::new(user_id, self.limits.archive_bytes);
        let mut outcomes = Vec::with_capacity(total);
        for (index, post_id) in ids.iter().copied().enumerate() {
            let reference = PostReference::from_id(post_id);
            let pushed = match self.collect(&reference).await {
                Ok((_, assets)) => batcher.push(index + 1, post_id, assets),
                Err(error) => Err(error),
            };
            match pushed {
                Ok(Some(archive)) => {
                    outcomes.extend(self.send_archive(message, user_id, archive, total).await)
                }
                Ok(None) => {}
                Err(error) => outcomes.push(self.post_failed(message, &reference, error).await),
            }
        }
        if let Some(archive) = batcher.finish() {
            outcomes.extend(self.send_archive(message, user_id, archive, total).await);
        }
        outcomes
    }

    async fn send_archive(
        &self,
        message: &IncomingMessage,
        user_id: UserId,
        archive: PackedArchive,
        total: usize,
    ) -> Vec<PostOutcome> {
        let PackedArchive {
            posts,
            last_index,
            file_name,
            asset,
        } = archive;
        let sent = match asset {
            Ok(asset) => {
                let caption = archive_caption(user_id, last_index, total);
                self.responder
                    .deliver(
                        message.chat_id,
                        message.message_id,
                        slice::from_ref(&asset),
                        &caption,
                    )
                    .await
            }
            Err(error) => Err(error),
        };

        match sent {
            Ok(()) => {
                tracing::info!(
                    target: "processor",
                    chat_id = message.chat_id.0,
                    user_id,
                    file_name = %file_name,
                    posts = posts.len(),
                    "archive delivered"
                );
                posts
                    .into_iter()
                    .map(|(post_id, assets)| PostOutcome::Delivered { post_id, assets })
                    .collect()
            }
            Err(error) => {
                tracing::warn!(
                    target: "processor",
                    chat_id = message.chat_id.0,
                    user_id,
                    file_name = %file_name,
                    error = %error,
                    "archive failed"
                );
                let text = format!(
                    "Could not send archive <code>{}</code>.",
                    escape_html(&file_name)
                );
                self.responder
                    .report_failure(message.chat_id, message.message_id, &text)
                    .await;
                posts
                    .into_iter()
                    .map(|(post_id, _)| PostOutcome::Failed {
                        post_id,
                        error: RelayError::Delivery {
                            reason: error.to_string(),
                        },
                    })
                    .collect()
            }
        }
    }

    async fn notice(&self, message: &IncomingMessage, text: &str) {
        self.responder
            .send_notice(message.chat_id, message.message_id, text)
            .await;
    }
}
