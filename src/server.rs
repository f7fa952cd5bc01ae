//! TCP server for NDT control connections.
//!
//! The accept loop does nothing but accept and dispatch: every connection
//! gets its own task that owns the socket until the protocol sequence ends.

use crate::config::{Config, S2cSettings};
use crate::connection::handle_connection;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, info_span, Instrument};

/// Server instance
pub struct Server {
    config: Config,
    settings: Arc<S2cSettings>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let settings = Arc::new(config.s2c.clone());
        Server { config, settings }
    }

    /// Bind the control listener and serve forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.listen).await?;
        info!(
            address = %self.config.listen,
            s2c_port = self.settings.port,
            "Server listening"
        );
        self.serve(listener).await;
        Ok(())
    }

    /// Accept connections on an already bound listener.
    ///
    /// Tasks are spawned and never joined, and nothing bounds how many are
    /// alive at once.
    pub async fn serve(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");

                    let settings = Arc::clone(&self.settings);
                    let span = info_span!("connection", peer = %addr);

                    tokio::spawn(
                        async move {
                            // Errors are logged inside; the socket closes on drop
                            let _ = handle_connection(stream, settings).await;
                        }
                        .instrument(span),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}
