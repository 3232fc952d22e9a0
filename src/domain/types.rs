use super::{error::RelayError, post::PostId};

#[derive(Debug)]
pub enum PostOutcome {
    Delivered { post_id: PostId, assets: usize },
    Failed { post_id: PostId, error: RelayError },
}

impl PostOutcome {
    pub fn post_id(&self) -> PostId {
        match self {
            PostOutcome::Delivered { post_id, .. } | PostOutcome::Failed { post_id, .. } => {
                *post_id
            }
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, PostOutcome::Delivered { .. })
    }
}
