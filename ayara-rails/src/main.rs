//! ayara-rails
//!
//! HTTP service for the Ayara controllers of a local chain network.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ayara_rails::{main_entry::run_server, RailsConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Read .env before the filter so RUST_LOG can come from it
    let config = RailsConfig::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ayara_rails=info,ayara_controller=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    run_server(config).await
}
