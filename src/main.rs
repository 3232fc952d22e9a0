mod app;
mod config;
mod domain;
mod infrastructure;
mod media;
mod pixiv;
mod tasks;
mod telegram;

use anyhow::Result;
use infrastructure::{directories, logging, shutdown};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config()?;
    let paths = directories::ensure_directories(&config.directories)?;
    logging::init_tracing(&config, &paths)?;

    let (shutdown, _) = shutdown::Shutdown::new();
    shutdown::install_signal_handlers(shutdown.clone());

    let app = app::PixivRelayApp::initialize(config, paths, shutdown.clone()).await?;
    app.run().await
}
