mod abi;
mod cache;
mod config;
mod decoder;
mod errors;
mod event_source;
mod executor;
mod logging;
mod metadata;
mod orchestrator;
mod types;

use anyhow::{Context, Result};
use config::AgentConfig;
use orchestrator::Agent;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("reflex_agent=info".parse()?),
        )
        .init();

    info!("🚀 Starting Reflex backrun agent");

    let config = AgentConfig::from_env();
    if let Err(e) = config.validate() {
        tracing::error!("❌ invalid configuration: {}", e);
        std::process::exit(1);
    }
    info!(
        "✅ configuration loaded: chain_id={} top_pools={} max_concurrent_txs={}",
        config.chain_id, config.top_pools_count, config.max_concurrent_txs
    );

    let agent = Agent::bootstrap(config)
        .await
        .context("failed to bootstrap agent")?;

    agent.run().await?;

    Ok(())
}
