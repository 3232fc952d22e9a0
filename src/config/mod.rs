pub mod env;
mod loader;

pub use env::{AppConfig, DirectoryConfig, MediaConfig, PixivConfig};
pub use loader::load_config;
