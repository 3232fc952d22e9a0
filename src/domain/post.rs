use super::error::RelayError;

pub type PostId = u64;
pub type UserId = u64;

const POST_LINK_BASE: &str = "https://www.pixiv.net/en/artworks/";
const USER_LINK_BASE: &str = "https://www.pixiv.net/en/users/";

pub fn canonical_link(post_id: PostId) -> String {
    format!("{POST_LINK_BASE}{post_id}")
}

pub fn user_link(user_id: UserId) -> String {
    format!("{USER_LINK_BASE}{user_id}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostReference {
    pub post_id: PostId,
    /// 1-based.
    pub page: Option<u32>,
    pub source_url: Option<String>,
}

impl PostReference {
    pub fn from_id(post_id: PostId) -> Self {
        Self {
            post_id,
            page: None,
            source_url: None,
        }
    }

    pub fn link(&self) -> String {
        self.source_url
            .clone()
            .unwrap_or_else(|| canonical_link(self.post_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserReference {
    pub user_id: UserId,
    pub as_archive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ugoira {
    pub archive_url: String,
    pub frame_delays: Vec<u32>,
}

impl Ugoira {
    pub fn mean_delay_ms(&self) -> Option<u32> {
        if self.frame_delays.is_empty() {
            return None;
        }
        let total: u64 = self.frame_delays.iter().map(|d| u64::from(*d)).sum();
        Some((total / self.frame_delays.len() as u64) as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostMedia {
    Image(Page),
    Album(Vec<Page>),
    Video(Ugoira),
}

#[derive(Debug, Clone)]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub author: String,
    pub media: PostMedia,
}

impl Post {
    pub fn page_count(&self) -> usize {
        match &self.media {
            PostMedia::Image(_) | PostMedia::Video(_) => 1,
            PostMedia::Album(pages) => pages.len(),
        }
    }

    pub fn select_page(self, page: Option<u32>) -> Result<Self, RelayError> {
        let Some(page) = page else {
            return Ok(self);
        };
        let pages = self.page_count();
        let index = page as usize;
        if index == 0 || index > pages {
            return Err(RelayError::PageOutOfRange {
                post_id: self.id,
                page,
                pages,
            });
        }
        let media = match self.media {
            PostMedia::Album(mut all) => PostMedia::Image(all.swap_remove(index - 1)),
            other => other,
        };
        Ok(Self { media, ..self })
    }

    pub fn asset_requests(&self) -> Vec<AssetRequest> {
        match &self.media {
            PostMedia::Image(page) => vec![AssetRequest::image(page)],
            PostMedia::Album(pages) => pages.iter().map(AssetRequest::image).collect(),
            PostMedia::Video(ugoira) => vec![AssetRequest {
                url: ugoira.archive_url.clone(),
                kind: MediaKind::Animation,
                file_name: format!("{}_ugoira.zip", self.id),
                width: None,
                height: None,
                frame_delays: ugoira.frame_delays.clone(),
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Animation,
    Document,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    pub url: String,
    pub kind: MediaKind,
    pub file_name: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Per-frame delays in ms; only set for ugoira archives.
    pub frame_delays: Vec<u32>,
}

impl AssetRequest {
    fn image(page: &Page) -> Self {
        Self {
            url: page.url.clone(),
            kind: MediaKind::Image,
            file_name: file_name_from_url(&page.url),
            width: page.width,
            height: page.height,
            frame_delays: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub source_url: String,
    pub kind: MediaKind,
    pub file_name: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub data: Vec<u8>,
}

impl MediaAsset {
    pub fn from_request(request: &AssetRequest, data: Vec<u8>) -> Self {
        Self {
            source_url: request.url.clone(),
            kind: request.kind,
            file_name: request.file_name.clone(),
            width: request.width,
            height: request.height,
            data,
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

fn file_name_from_url(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("image.jpg")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: u32) -> Page {
        Page {
            url: format!("https://i.pximg.net/img-original/img/2024/01/01/00/00/00/7_p{n}.png"),
            width: Some(1000),
            height: Some(800),
        }
    }

    fn album(pages: u32) -> Post {
        Post {
            id: 7,
            title: "t".into(),
            author: "a".into(),
            media: PostMedia::Album((0..pages).map(page).collect()),
        }
    }

    #[test]
    fn selecting_a_page_keeps_only_that_page() {
        let post = album(3).select_page(Some(2)).expect("page exists");
        assert_eq!(post.media, PostMedia::Image(page(1)));
        assert_eq!(post.page_count(), 1);
    }

    #[test]
    fn selecting_missing_page_fails() {
        let err = album(3).select_page(Some(4)).unwrap_err();
        assert!(matches!(
            err,
            RelayError::PageOutOfRange { post_id: 7, page: 4, pages: 3 }
        ));
        assert!(album(3).select_page(Some(0)).is_err());
    }

    #[test]
    fn asset_requests_follow_page_order() {
        let names: Vec<_> = album(3)
            .asset_requests()
            .into_iter()
            .map(|r| r.file_name)
            .collect();
        assert_eq!(names, vec!["7_p0.png", "7_p1.png", "7_p2.png"]);
    }

    #[test]
    fn ugoira_is_requested_as_animation_with_delays() {
        let post = Post {
            id: 99,
            title: "anim".into(),
            author: "a".into(),
            media: PostMedia::Video(Ugoira {
                archive_url: "https://i.pximg.net/img-zip-ugoira/img/99_ugoira1920x1080.zip".into(),
                frame_delays: vec![100, 50, 60],
            }),
        };
        let requests = post.asset_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind, MediaKind::Animation);
        assert_eq!(requests[0].file_name, "99_ugoira.zip");
        assert_eq!(requests[0].frame_delays, vec![100, 50, 60]);
        if let PostMedia::Video(ugoira) = &post.media {
            assert_eq!(ugoira.mean_delay_ms(), Some(70));
        }
    }

    #[test]
    fn link_prefers_source_url() {
        let mut reference = PostReference::from_id(12345);
        assert_eq!(reference.link(), "https://www.pixiv.net/en/artworks/12345");
        reference.source_url = Some("https://pixiv.net/artworks/12345".into());
        assert_eq!(reference.link(), "https://pixiv.net/artworks/12345");
        assert_eq!(user_link(7), "https://www.pixiv.net/en/users/7");
    }
}
