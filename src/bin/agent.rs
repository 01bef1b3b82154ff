use anyhow::Context;
use tracing::info;

use metrics_relay::config::AgentConfig;
use metrics_relay::{agent, observability, shutdown};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init().map_err(|e| anyhow::anyhow!(e))?;

    let config = AgentConfig::load().context("loading configuration")?;
    info!(
        address = %config.address,
        grpc = ?config.grpc_address,
        rate_limit = config.rate_limit,
        "starting metrics agent"
    );

    agent::run(config, shutdown::channel()).await
}
