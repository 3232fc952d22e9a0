pub mod error;
pub mod message;
pub mod post;
pub mod types;

pub use error::RelayError;
pub use message::IncomingMessage;
pub use post::{
    canonical_link, user_link, AssetRequest, MediaAsset, MediaKind, Page, Post, PostId, PostMedia,
    PostReference, Ugoira, UserId, UserReference,
};
pub use types::PostOutcome;
