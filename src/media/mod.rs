pub mod archive;
mod fetcher;
pub mod ugoira;

pub use fetcher::MediaFetcher;
