//! Plaintext TCP trigger for broadcasts.
//!
//! A client connects, sends the trigger command, and disconnects. Connections
//! are served one at a time and read until EOF or the payload limit; anything
//! other than an exact match of the command is dropped. The socket is unauthenticated, so keep it
//! on loopback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::TriggerConfig;
use crate::relay::BroadcastRelay;

pub struct TriggerListener {
    listener: TcpListener,
    config: TriggerConfig,
    relay: Arc<BroadcastRelay>,
}

impl TriggerListener {
    pub async fn bind(config: TriggerConfig, relay: Arc<BroadcastRelay>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind trigger socket: {}", config.bind_addr))?;

        if !config.bind_addr.ip().is_loopback() {
            warn!(
                "Trigger socket {} is not loopback and accepts unauthenticated commands",
                config.bind_addr
            );
        }

        Ok(Self {
            listener,
            config,
            relay,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read trigger socket address")
    }

    /// Run the accept loop on its own task until `shutdown` changes or its
    /// sender is dropped.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = self.local_addr() {
            info!("Trigger listener on {}", addr);
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Trigger listener stopping");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        match self.handle_connection(stream).await {
                            Ok(true) => info!("Broadcast triggered by {}", peer),
                            Ok(false) => debug!("Ignored trigger payload from {}", peer),
                            Err(e) => debug!("Dropped trigger connection from {}: {:#}", peer, e),
                        }
                    }
                    Err(e) => {
                        error!("Trigger socket accept error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    /// Read the payload up to EOF (capped at `max_payload_bytes`) and
    /// broadcast on an exact command match. The stream is closed when it goes
    /// out of scope, after any broadcast completes.
    async fn handle_connection(&self, mut stream: TcpStream) -> Result<bool> {
        let mut buf = Vec::with_capacity(self.config.max_payload_bytes);

        let mut limited = (&mut stream).take(self.config.max_payload_bytes as u64);
        let read = limited.read_to_end(&mut buf);
        let result = if self.config.read_timeout_secs > 0 {
            tokio::time::timeout(Duration::from_secs(self.config.read_timeout_secs), read)
                .await
                .context("Timed out waiting for trigger payload")?
        } else {
            read.await
        };
        result.context("Failed to read trigger payload")?;

        let payload = std::str::from_utf8(&buf).context("Trigger payload is not UTF-8")?;
        if payload != self.config.command {
            return Ok(false);
        }

        self.relay.broadcast(&self.config.broadcast_message).await;
        Ok(true)
    }
}
