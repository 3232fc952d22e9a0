use reqwest::StatusCode;
use thiserror::Error;

use super::post::{PostId, UserId};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("post {post_id} was not found or is not accessible")]
    NotFound { post_id: PostId },
    #[error("user {user_id} was not found")]
    UserNotFound { user_id: UserId },
    #[error("post {post_id} has {pages} page(s); page {page} does not exist")]
    PageOutOfRange {
        post_id: PostId,
        page: u32,
        pages: usize,
    },
    #[error("transient failure: {reason}")]
    Transient { reason: String },
    #[error("asset {url} is {size} bytes, above the {limit} byte limit")]
    TooLarge { url: String, size: u64, limit: u64 },
    #[error("unexpected response from pixiv: {reason}")]
    Upstream { reason: String },
    #[error("telegram rejected the upload: {reason}")]
    Delivery { reason: String },
    #[error("could not prepare media: {reason}")]
    Media { reason: String },
}

impl RelayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::Transient { .. })
    }

    pub fn from_status(status: StatusCode, context: &str) -> Self {
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            RelayError::Transient {
                reason: format!("{context} returned {status}"),
            }
        } else {
            RelayError::Upstream {
                reason: format!("{context} returned {status}"),
            }
        }
    }

    /// `link` must already be HTML-safe.
    pub fn user_message(&self, post_id: PostId, link: &str) -> String {
        let post = format!("<a href=\"{link}\">{post_id}</a>");
        match self {
            RelayError::NotFound { .. } | RelayError::UserNotFound { .. } => {
                format!("Post {post} not found. It may have been deleted or made private.")
            }
            RelayError::PageOutOfRange { page, pages, .. } => {
                format!("Post {post} has {pages} page(s), there is no page {page}.")
            }
            RelayError::TooLarge { size, limit, .. } => format!(
                "Post {post} is too large to send: a file is {:.1} MB, the limit is {:.1} MB.",
                megabytes(*size),
                megabytes(*limit)
            ),
            RelayError::Transient { .. } | RelayError::Upstream { .. } => {
                format!("Could not fetch post {post}, please try again later.")
            }
            RelayError::Delivery { .. } => format!("Could not send post {post}."),
            RelayError::Media { .. } => format!("Could not prepare post {post} for sending."),
        }
    }

    pub fn user_listing_message(&self, user_id: UserId, link: &str) -> String {
        let user = format!("<a href=\"{link}\">{user_id}</a>");
        match self {
            RelayError::UserNotFound { .. } | RelayError::NotFound { .. } => {
                format!("User {user} not found.")
            }
            _ => format!("Could not collect the works of user {user}, please try again later."),
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return RelayError::from_status(status, "request");
        }
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            RelayError::Transient {
                reason: err.to_string(),
            }
        } else {
            RelayError::Upstream {
                reason: err.to_string(),
            }
        }
    }
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_rate_limits_are_transient() {
        assert!(RelayError::from_status(StatusCode::BAD_GATEWAY, "detail").is_transient());
        assert!(RelayError::from_status(StatusCode::TOO_MANY_REQUESTS, "detail").is_transient());
        assert!(!RelayError::from_status(StatusCode::FORBIDDEN, "detail").is_transient());
    }

    #[test]
    fn user_messages_name_the_post() {
        let link = "https://www.pixiv.net/en/artworks/5";
        let not_found = RelayError::NotFound { post_id: 5 }.user_message(5, link);
        assert!(not_found.contains("not found"));
        assert!(not_found.contains(link));

        let too_large = RelayError::TooLarge {
            url: "u".into(),
            size: 60 * 1024 * 1024,
            limit: 50 * 1024 * 1024,
        }
        .user_message(5, link);
        assert!(too_large.contains("60.0 MB"));
        assert!(too_large.contains("50.0 MB"));
    }

    #[test]
    fn user_listing_messages_name_the_user() {
        let link = "https://www.pixiv.net/en/users/9";
        let missing = RelayError::UserNotFound { user_id: 9 }.user_listing_message(9, link);
        assert_eq!(missing, format!("User <a href=\"{link}\">9</a> not found."));
        let flaky = RelayError::Transient {
            reason: "timeout".into(),
        }
        .user_listing_message(9, link);
        assert!(flaky.starts_with("Could not collect"));
    }
}
