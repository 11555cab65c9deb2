//! # Block Deserializer Binary
//!
//! Loads configuration from the environment and consumes the worker's block
//! queue until interrupted.

use anyhow::{Context, Result};
use tracing::{error, info};

use block_deserializer::{BlockDeserializer, DeserializerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with environment filter
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("block_deserializer=info".parse()?),
        )
        .init();

    info!("🌟 Starting Block Deserializer");

    let config = DeserializerConfig::from_env().context("Failed to load configuration")?;
    info!(
        "Chain {} worker {} consuming {}",
        config.chain, config.worker_id, config.worker_queue
    );

    let deserializer = BlockDeserializer::new(config)
        .await
        .context("Failed to create block deserializer")?;

    tokio::select! {
        result = deserializer.run() => {
            if let Err(e) = &result {
                error!("Block deserializer stopped: {}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("👋 Block Deserializer shutdown complete");
    Ok(())
}
