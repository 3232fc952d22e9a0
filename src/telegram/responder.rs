use std::ops::Range;

use async_trait::async_trait;
use teloxide::{
    prelude::*,
    RequestError,
    types::{
        ChatAction, InputFile, InputMedia, InputMediaDocument, InputMediaPhoto, MessageId,
        ParseMode, ReplyParameters,
    },
};

use crate::{
    config::MediaConfig,
    domain::{MediaAsset, MediaKind, RelayError},
    tasks::pipeline::Responder,
};

const MEDIA_GROUP_MAX: usize = 10;
const PHOTO_MAX_DIMENSION_SUM: u32 = 10_000;
const PHOTO_MAX_ASPECT_RATIO: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Photo(usize),
    Animation(usize),
    Document(usize),
    PhotoGroup(Range<usize>),
    DocumentGroup(Range<usize>),
}

impl Delivery {
    fn first(&self) -> usize {
        match self {
            Delivery::Photo(i) | Delivery::Animation(i) | Delivery::Document(i) => *i,
            Delivery::PhotoGroup(range) | Delivery::DocumentGroup(range) => range.start,
        }
    }

    fn as_documents(&self) -> Option<Delivery> {
        match self {
            Delivery::Photo(i) => Some(Delivery::Document(*i)),
            Delivery::PhotoGroup(range) => Some(Delivery::DocumentGroup(range.clone())),
            _ => None,
        }
    }
}

/// Albums stay photos only when every page qualifies; a media group cannot mix kinds.
pub fn plan_delivery(assets: &[MediaAsset], photo_max_bytes: u64) -> Vec<Delivery> {
    if let [asset] = assets {
        return vec![single(0, asset, photo_max_bytes)];
    }

    let as_photos = assets
        .iter()
        .all(|asset| asset.kind == MediaKind::Image && fits_as_photo(asset, photo_max_bytes));

    (0..assets.len())
        .step_by(MEDIA_GROUP_MAX)
        .map(|start| {
            let range = start..(start + MEDIA_GROUP_MAX).min(assets.len());
            match (range.len(), as_photos) {
                (1, true) => Delivery::Photo(range.start),
                (1, false) => Delivery::Document(range.start),
                (_, true) => Delivery::PhotoGroup(range),
                (_, false) => Delivery::DocumentGroup(range),
            }
        })
        .collect()
}

fn single(index: usize, asset: &MediaAsset, photo_max_bytes: u64) -> Delivery {
    match asset.kind {
        MediaKind::Image if fits_as_photo(asset, photo_max_bytes) => Delivery::Photo(index),
        MediaKind::Animation => Delivery::Animation(index),
        _ => Delivery::Document(index),
    }
}

fn fits_as_photo(asset: &MediaAsset, photo_max_bytes: u64) -> bool {
    if asset.size() > photo_max_bytes {
        return false;
    }
    match (asset.width, asset.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => {
            w.saturating_add(h) <= PHOTO_MAX_DIMENSION_SUM
                && w.max(h) <= w.min(h).saturating_mul(PHOTO_MAX_ASPECT_RATIO)
        }
        _ => true,
    }
}

pub struct TelegramResponder {
    bot: Bot,
    photo_max_bytes: u64,
}

impl TelegramResponder {
    pub fn new(bot: Bot, config: &MediaConfig) -> Self {
        Self {
            bot,
            photo_max_bytes: config.photo_max_bytes,
        }
    }

    async fn send_one(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        delivery: &Delivery,
        assets: &[MediaAsset],
        caption: &str,
    ) -> Result<(), RequestError> {
        let reply = ReplyParameters::new(reply_to);
        match delivery {
            Delivery::Photo(index) => {
                self.bot
                    .send_photo(chat_id, input_file(&assets[*index]))
                    .caption(caption)
                    .parse_mode(ParseMode::Html)
                    .reply_parameters(reply)
                    .await?;
            }
            Delivery::Animation(index) => {
                self.bot
                    .send_animation(chat_id, input_file(&assets[*index]))
                    .caption(caption)
                    .parse_mode(ParseMode::Html)
                    .reply_parameters(reply)
                    .await?;
            }
            Delivery::Document(index) => {
                self.bot
                    .send_document(chat_id, input_file(&assets[*index]))
                    .caption(caption)
                    .parse_mode(ParseMode::Html)
                    .reply_parameters(reply)
                    .await?;
            }
            Delivery::PhotoGroup(range) => {
                let media = assets[range.clone()]
                    .iter()
                    .enumerate()
                    .map(|(i, asset)| {
                        let item = InputMediaPhoto::new(input_file(asset));
                        InputMedia::Photo(if i == 0 {
                            item.caption(caption).parse_mode(ParseMode::Html)
                        } else {
                            item
                        })
                    })
                    .collect::<Vec<_>>();
                self.bot
                    .send_media_group(chat_id, media)
                    .reply_parameters(reply)
                    .await?;
            }
            Delivery::DocumentGroup(range) => {
                let media = assets[range.clone()]
                    .iter()
                    .enumerate()
                    .map(|(i, asset)| {
                        let item = InputMediaDocument::new(input_file(asset));
                        InputMedia::Document(if i == 0 {
                            item.caption(caption).parse_mode(ParseMode::Html)
                        } else {
                            item
                        })
                    })
                    .collect::<Vec<_>>();
                self.bot
                    .send_media_group(chat_id, media)
                    .reply_parameters(reply)
                    .await?;
            }
        }
        Ok(())
    }

    async fn reply_html(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        text: &str,
    ) -> Result<(), RequestError> {
        self.bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .reply_parameters(ReplyParameters::new(reply_to))
            .await?;
        Ok(())
    }
}

fn input_file(asset: &MediaAsset) -> InputFile {
    InputFile::memory(asset.data.clone()).file_name(asset.file_name.clone())
}

// Photo dimension and size checks happen server side and surface as API errors.
fn rejected_by_telegram(err: &RequestError) -> bool {
    matches!(err, RequestError::Api(_))
}

fn upload_action(delivery: &Delivery) -> ChatAction {
    match delivery {
        Delivery::Photo(_) | Delivery::PhotoGroup(_) => ChatAction::UploadPhoto,
        Delivery::Animation(_) => ChatAction::UploadVideo,
        Delivery::Document(_) | Delivery::DocumentGroup(_) => ChatAction::UploadDocument,
    }
}

#[async_trait]
impl Responder for TelegramResponder {
    async fn send_status(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        text: &str,
    ) -> Option<MessageId> {
        match self
            .bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .reply_parameters(ReplyParameters::new(reply_to))
            .disable_notification(true)
            .await
        {
            Ok(sent) => Some(sent.id),
            Err(err) => {
                tracing::warn!(
                    target: "telegram",
                    error = %err,
                    chat_id = chat_id.0,
                    "failed to send status message"
                );
                None
            }
        }
    }

    async fn clear_status(&self, chat_id: ChatId, status_id: MessageId) {
        if let Err(err) = self.bot.delete_message(chat_id, status_id).await {
            tracing::debug!(
                target: "telegram",
                error = %err,
                chat_id = chat_id.0,
                "failed to delete status message"
            );
        }
    }

    async fn deliver(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        assets: &[MediaAsset],
        caption: &str,
    ) -> Result<(), RelayError> {
        for delivery in plan_delivery(assets, self.photo_max_bytes) {
            if let Err(err) = self
                .bot
                .send_chat_action(chat_id, upload_action(&delivery))
                .await
            {
                tracing::debug!(
                    target: "telegram",
                    error = %err,
                    chat_id = chat_id.0,
                    "failed to send chat action"
                );
            }

            let mut sent = self
                .send_one(chat_id, reply_to, &delivery, assets, caption)
                .await;
            let refused = matches!(&sent, Err(err) if rejected_by_telegram(err));
            if let (true, Some(fallback)) = (refused, delivery.as_documents()) {
                tracing::warn!(
                    target: "telegram",
                    chat_id = chat_id.0,
                    ?delivery,
                    "photos refused; resending as documents"
                );
                sent = self
                    .send_one(chat_id, reply_to, &fallback, assets, caption)
                    .await;
            }
            sent.map_err(|err| {
                tracing::error!(
                    target: "telegram",
                    error = %err,
                    chat_id = chat_id.0,
                    ?delivery,
                    source = assets[delivery.first()].source_url.as_str(),
                    "upload failed"
                );
                RelayError::Delivery {
                    reason: err.to_string(),
                }
            })?;
        }
        Ok(())
    }

    async fn send_notice(&self, chat_id: ChatId, reply_to: MessageId, text: &str) {
        if let Err(err) = self.reply_html(chat_id, reply_to, text).await {
            tracing::warn!(
                target: "telegram",
                error = %err,
                chat_id = chat_id.0,
                "failed to send notice"
            );
        }
    }

    async fn report_failure(&self, chat_id: ChatId, reply_to: MessageId, text: &str) {
        if let Err(err) = self.reply_html(chat_id, reply_to, text).await {
            tracing::warn!(
                target: "telegram",
                error = %err,
                chat_id = chat_id.0,
                "failed to send failure reply"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use teloxide::{types::Seconds, ApiError};

    use super::*;

    const MB: usize = 1024 * 1024;
    const PHOTO_LIMIT: u64 = 10 * 1024 * 1024;

    fn image(size: usize, dims: Option<(u32, u32)>) -> MediaAsset {
        MediaAsset {
            source_url: "https://i.pximg.net/1_p0.jpg".into(),
            kind: MediaKind::Image,
            file_name: "1_p0.jpg".into(),
            width: dims.map(|d| d.0),
            height: dims.map(|d| d.1),
            data: vec![0; size],
        }
    }

    fn ugoira(kind: MediaKind, file_name: &str) -> MediaAsset {
        MediaAsset {
            source_url: "https://i.pximg.net/1_ugoira1920x1080.zip".into(),
            kind,
            file_name: file_name.into(),
            width: None,
            height: None,
            data: vec![0; 16],
        }
    }

    #[test]
    fn small_image_goes_as_photo() {
        let plan = plan_delivery(&[image(2 * MB, Some((1200, 800)))], PHOTO_LIMIT);
        assert_eq!(plan, vec![Delivery::Photo(0)]);
    }

    #[test]
    fn heavy_or_extreme_images_go_as_documents() {
        assert_eq!(
            plan_delivery(&[image(12 * MB, Some((1200, 800)))], PHOTO_LIMIT),
            vec![Delivery::Document(0)]
        );
        assert_eq!(
            plan_delivery(&[image(MB, Some((8000, 4000)))], PHOTO_LIMIT),
            vec![Delivery::Document(0)]
        );
        assert_eq!(
            plan_delivery(&[image(MB, Some((300, 9000)))], PHOTO_LIMIT),
            vec![Delivery::Document(0)]
        );
    }

    #[test]
    fn extreme_aspect_ratio_is_not_rounded_away() {
        assert_eq!(
            plan_delivery(&[image(MB, Some((100, 2099)))], PHOTO_LIMIT),
            vec![Delivery::Document(0)]
        );
        assert_eq!(
            plan_delivery(&[image(MB, Some((100, 2500)))], PHOTO_LIMIT),
            vec![Delivery::Document(0)]
        );
        assert_eq!(
            plan_delivery(&[image(MB, Some((100, 2000)))], PHOTO_LIMIT),
            vec![Delivery::Photo(0)]
        );
    }

    #[test]
    fn one_tall_page_turns_album_into_documents() {
        let assets = vec![image(MB, Some((1000, 800))), image(MB, Some((100, 2099)))];
        assert_eq!(
            plan_delivery(&assets, PHOTO_LIMIT),
            vec![Delivery::DocumentGroup(0..2)]
        );
    }

    #[test]
    fn rendered_ugoira_goes_as_animation() {
        assert_eq!(
            plan_delivery(&[ugoira(MediaKind::Animation, "1_ugoira.gif")], PHOTO_LIMIT),
            vec![Delivery::Animation(0)]
        );
        assert_eq!(
            plan_delivery(&[ugoira(MediaKind::Document, "1_ugoira.zip")], PHOTO_LIMIT),
            vec![Delivery::Document(0)]
        );
    }

    #[test]
    fn refused_photos_fall_back_to_documents() {
        assert_eq!(Delivery::Photo(3).as_documents(), Some(Delivery::Document(3)));
        assert_eq!(
            Delivery::PhotoGroup(0..4).as_documents(),
            Some(Delivery::DocumentGroup(0..4))
        );
        assert_eq!(Delivery::Document(0).as_documents(), None);
        assert_eq!(Delivery::Animation(0).as_documents(), None);

        let refused = RequestError::Api(ApiError::Unknown(
            "Bad Request: PHOTO_INVALID_DIMENSIONS".into(),
        ));
        assert!(rejected_by_telegram(&refused));
        let throttled = RequestError::RetryAfter(Seconds::from_seconds(3));
        assert!(!rejected_by_telegram(&throttled));
    }

    #[test]
    fn albums_are_chunked_by_ten_in_order() {
        let assets: Vec<_> = (0..23).map(|_| image(MB, None)).collect();
        assert_eq!(
            plan_delivery(&assets, PHOTO_LIMIT),
            vec![
                Delivery::PhotoGroup(0..10),
                Delivery::PhotoGroup(10..20),
                Delivery::PhotoGroup(20..23),
            ]
        );
    }

    #[test]
    fn lone_tail_of_album_is_sent_alone() {
        let assets: Vec<_> = (0..11).map(|_| image(MB, None)).collect();
        assert_eq!(
            plan_delivery(&assets, PHOTO_LIMIT),
            vec![Delivery::PhotoGroup(0..10), Delivery::Photo(10)]
        );
    }

    #[test]
    fn one_heavy_page_turns_album_into_documents() {
        let assets = vec![image(MB, None), image(11 * MB, None), image(MB, None)];
        assert_eq!(
            plan_delivery(&assets, PHOTO_LIMIT),
            vec![Delivery::DocumentGroup(0..3)]
        );
    }
}
