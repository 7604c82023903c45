//! Tank Rooms Server
//!
//! Loads configuration from the environment (and `.env`, if present), then
//! serves WebSocket connections until the process is stopped.

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use tank_rooms::{AuthConfig, GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    let auth = AuthConfig::from_env();

    info!("Tank Rooms Server v{}", VERSION);
    info!("Max connections: {}", config.max_connections);
    info!("Strict room codes: {}", config.strict_room_codes);

    let server = GameServer::new(config, auth);
    server.run().await?;

    Ok(())
}
