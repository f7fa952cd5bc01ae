//! botticelli: an NDT-compatible network diagnostic server
//!
//! Clients log in over a TCP control channel, negotiate which sub-tests
//! to run and then execute them:
//! - S2C: server-to-client throughput over a secondary data connection
//! - META: client metadata exchange
//!
//! Features:
//! - Length-prefixed JSON control protocol (NDT v3.7 compatible)
//! - One task per client connection
//! - Configuration via CLI arguments or TOML file

mod config;
mod connection;
mod error;
mod protocol;
mod server;
mod subtests;

use config::Config;
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        s2c_port = config.s2c.port,
        s2c_duration_secs = config.s2c.duration.as_secs(),
        s2c_fill = ?config.s2c.fill,
        version = %protocol::server_version(),
        "Starting botticelli server"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let server = Server::new(config);
        server.run().await
    })
}
