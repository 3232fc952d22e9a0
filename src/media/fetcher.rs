use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header::REFERER, Client};

use super::ugoira::{image_dimensions, render_gif};
use crate::{
    config::MediaConfig,
    domain::{AssetRequest, MediaAsset, MediaKind, RelayError},
    tasks::pipeline::AssetSource,
};

// `i.pximg.net` answers 403 without an app or site referer.
const PIXIV_REFERER: &str = "https://app-api.pixiv.net/";

pub struct MediaFetcher {
    client: Client,
    config: MediaConfig,
}

impl MediaFetcher {
    pub fn new(client: Client, config: MediaConfig) -> Self {
        Self { client, config }
    }

    pub async fn fetch(&self, request: &AssetRequest) -> Result<MediaAsset, RelayError> {
        let data = self.download(&request.url).await?;
        let asset = MediaAsset::from_request(request, data);
        match request.kind {
            MediaKind::Image => Ok(with_dimensions(asset)),
            MediaKind::Animation => self.animate(request, asset).await,
            MediaKind::Document => Ok(asset),
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, RelayError> {
        let limit = self.config.max_upload_bytes;
        let response = self
            .client
            .get(url)
            .header(REFERER, PIXIV_REFERER)
            .timeout(self.config.fetch_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::from_status(status, "pixiv image host"));
        }

        let declared = response.content_length();
        if let Some(size) = declared {
            check_size(url, size, limit)?;
        }

        let mut data = Vec::with_capacity(declared.unwrap_or(0).min(limit) as usize);
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            check_size(url, (data.len() + chunk.len()) as u64, limit)?;
            data.extend_from_slice(&chunk);
        }

        tracing::debug!(target: "media", url, bytes = data.len(), "asset downloaded");
        Ok(data)
    }

    async fn animate(
        &self,
        request: &AssetRequest,
        archive: MediaAsset,
    ) -> Result<MediaAsset, RelayError> {
        let limit = self.config.max_upload_bytes;
        let delays = request.frame_delays.clone();
        let MediaAsset {
            source_url,
            file_name,
            data,
            ..
        } = archive;

        let (data, rendered) = tokio::task::spawn_blocking(move || {
            let gif = render_gif(&data, &delays);
            (data, gif)
        })
        .await
        .map_err(|err| RelayError::Media {
            reason: format!("ugoira render task failed: {err}"),
        })?;

        match rendered {
            Ok(gif) if (gif.len() as u64) <= limit => Ok(MediaAsset {
                file_name: format!("{}.gif", file_name.trim_end_matches(".zip")),
                source_url,
                kind: MediaKind::Animation,
                width: None,
                height: None,
                data: gif,
            }),
            outcome => {
                match outcome {
                    Ok(gif) => tracing::warn!(
                        target: "media",
                        url = %source_url,
                        size = gif.len(),
                        limit,
                        "ugoira gif exceeds upload limit; sending frames archive"
                    ),
                    Err(err) => tracing::warn!(
                        target: "media",
                        url = %source_url,
                        error = %err,
                        "ugoira could not be rendered; sending frames archive"
                    ),
                }
                Ok(MediaAsset {
                    source_url,
                    kind: MediaKind::Document,
                    file_name,
                    width: None,
                    height: None,
                    data,
                })
            }
        }
    }
}

/// Album pages often come without sizes; read them from the image header.
fn with_dimensions(mut asset: MediaAsset) -> MediaAsset {
    if asset.width.is_none() || asset.height.is_none() {
        match image_dimensions(&asset.data) {
            Some((width, height)) => {
                asset.width = Some(width);
                asset.height = Some(height);
            }
            None => tracing::debug!(
                target: "media",
                url = %asset.source_url,
                "image dimensions unreadable"
            ),
        }
    }
    asset
}

fn check_size(url: &str, size: u64, limit: u64) -> Result<(), RelayError> {
    if size > limit {
        tracing::warn!(target: "media", url, size, limit, "asset exceeds upload limit");
        return Err(RelayError::TooLarge {
            url: url.to_string(),
            size,
            limit,
        });
    }
    Ok(())
}

#[async_trait]
impl AssetSource for MediaFetcher {
    async fn fetch(&self, request: &AssetRequest) -> Result<MediaAsset, RelayError> {
        MediaFetcher::fetch(self, request).await
    }
}
