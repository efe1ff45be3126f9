//! Room Relay - Entry Point
//!
//! Reads configuration, binds the listener and runs the supervisor until Ctrl-C.

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use room_relay::{RelayConfig, Supervisor};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=room_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("room_relay=info")),
        )
        .init();

    let config = RelayConfig::from_env();

    // Start TCP listener
    let listener = TcpListener::bind(config.listen_addr()).await?;
    info!("Live at ws://{}", listener.local_addr()?);
    info!(
        "Outbound queue capacity {}, overflow policy {}",
        config.queue_capacity, config.overflow_policy
    );

    let supervisor = Supervisor::new(&config);
    supervisor
        .run(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
