mod auth;
mod client;
pub mod links;
mod models;

pub use client::PixivClient;
pub use links::{extract_post_refs, extract_user_refs};
