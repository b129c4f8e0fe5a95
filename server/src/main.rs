//! radiocast server binary.

use radiocast_server::{init_logging, run, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let config = ServerConfig::load()?;
    run(config).await
}
