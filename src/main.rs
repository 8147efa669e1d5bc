use std::sync::Arc;

use sip_signal::config::Config;
use sip_signal::server::Server;
use sip_signal::store::MemoryStore;
use sip_signal::transport::UdpTransport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    tracing::info!(host = %config.host, port = config.port, "starting signaling server");

    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(UdpTransport::bind(&config.host, config.port).await?);
    let mut server = Server::new(config, store, transport);

    server.run().await?;
    Ok(())
}
