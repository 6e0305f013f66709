use streamgate::{config, server};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    info!("starting streamgate on port {}", config.port);

    if let Err(e) = server::start(config).await {
        error!("server exited with error: {e}");
        std::process::exit(1);
    }
}
