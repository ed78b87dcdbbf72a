use clawserve::types::config::GatewayConfig;
use clawserve::{gateway, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    server::init_tracing();

    let config = GatewayConfig::from_env()?;
    gateway::serve(config).await
}
