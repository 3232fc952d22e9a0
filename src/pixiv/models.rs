use serde::Deserialize;

use crate::domain::{Page, Post, PostId, PostMedia, RelayError, Ugoira};

pub const ILLUST_TYPE_UGOIRA: &str = "ugoira";

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IllustDetailResponse {
    pub illust: Illust,
}

#[derive(Debug, Deserialize)]
pub struct UserIllustsResponse {
    #[serde(default)]
    pub illusts: Vec<UserIllust>,
    pub next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserIllust {
    pub id: PostId,
    #[serde(default = "visible_by_default")]
    pub visible: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub user_message: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reason: String,
}

impl ApiErrorBody {
    pub fn summary(&self) -> &str {
        [&self.user_message, &self.message, &self.reason]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
            .unwrap_or("unknown error")
    }

    pub fn is_oauth_failure(&self) -> bool {
        self.message.contains("OAuth") || self.message.contains("invalid_grant")
    }
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ImageUrls {
    pub original: Option<String>,
    pub large: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MetaPage {
    pub image_urls: ImageUrls,
}

#[derive(Debug, Default, Deserialize)]
pub struct MetaSinglePage {
    pub original_image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Illust {
    pub id: PostId,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub user: User,
    pub width: u32,
    pub height: u32,
    pub page_count: u32,
    #[serde(default)]
    pub meta_single_page: MetaSinglePage,
    #[serde(default)]
    pub meta_pages: Vec<MetaPage>,
    #[serde(default = "visible_by_default")]
    pub visible: bool,
}

fn visible_by_default() -> bool {
    true
}

impl Illust {
    pub fn is_ugoira(&self) -> bool {
        self.kind == ILLUST_TYPE_UGOIRA
    }

    pub fn into_image_post(self) -> Result<Post, RelayError> {
        if !self.visible {
            return Err(RelayError::NotFound { post_id: self.id });
        }

        let media = if self.meta_pages.is_empty() {
            let url = self.meta_single_page.original_image_url.ok_or_else(|| {
                RelayError::Upstream {
                    reason: format!("illust {} has no original image url", self.id),
                }
            })?;
            PostMedia::Image(Page {
                url,
                width: Some(self.width),
                height: Some(self.height),
            })
        } else {
            let pages = self
                .meta_pages
                .into_iter()
                .map(|meta| {
                    meta.image_urls
                        .original
                        .or(meta.image_urls.large)
                        .map(|url| Page {
                            url,
                            width: None,
                            height: None,
                        })
                })
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| RelayError::Upstream {
                    reason: format!("illust {} has a page without image url", self.id),
                })?;
            if pages.len() != self.page_count as usize {
                tracing::debug!(
                    target: "pixiv",
                    post_id = self.id,
                    listed = pages.len(),
                    page_count = self.page_count,
                    "page list and page count disagree"
                );
            }
            match <[Page; 1]>::try_from(pages) {
                Ok([only]) => PostMedia::Image(Page {
                    width: Some(self.width),
                    height: Some(self.height),
                    ..only
                }),
                Err(pages) => PostMedia::Album(pages),
            }
        };

        Ok(Post {
            id: self.id,
            title: self.title,
            author: self.user.name,
            media,
        })
    }

    pub fn into_ugoira_post(self, metadata: UgoiraMetadata) -> Result<Post, RelayError> {
        if !self.visible {
            return Err(RelayError::NotFound { post_id: self.id });
        }
        Ok(Post {
            id: self.id,
            title: self.title,
            author: self.user.name,
            media: PostMedia::Video(Ugoira {
                archive_url: metadata.zip_urls.best(),
                frame_delays: metadata.frames.into_iter().map(|f| f.delay).collect(),
            }),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct UgoiraMetadataResponse {
    pub ugoira_metadata: UgoiraMetadata,
}

#[derive(Debug, Deserialize)]
pub struct UgoiraMetadata {
    pub zip_urls: ZipUrls,
    #[serde(default)]
    pub frames: Vec<UgoiraFrame>,
}

#[derive(Debug, Deserialize)]
pub struct ZipUrls {
    pub medium: String,
}

impl ZipUrls {
    pub fn best(&self) -> String {
        self.medium.replace("600x600", "1920x1080")
    }
}

#[derive(Debug, Deserialize)]
pub struct UgoiraFrame {
    pub delay: u32,
}
