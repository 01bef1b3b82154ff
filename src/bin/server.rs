use anyhow::Context;
use tracing::info;

use metrics_relay::config::ServerConfig;
use metrics_relay::{observability, server, shutdown};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init().map_err(|e| anyhow::anyhow!(e))?;

    let config = ServerConfig::load().context("loading configuration")?;
    info!(
        address = %config.address,
        grpc = ?config.grpc_address,
        store_interval = ?config.store_interval,
        store_file = ?config.store_file,
        restore = config.restore,
        database = config.database_dsn.is_some(),
        "starting metrics server"
    );

    server::run(config, shutdown::channel()).await
}
