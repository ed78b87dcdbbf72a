use clawserve::types::config::DirectConfig;
use clawserve::{direct, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    server::init_tracing();

    let config = DirectConfig::from_env()?;
    direct::serve(config).await
}
