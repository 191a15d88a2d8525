//! Construction, lifecycle, and the websocket upgrade hook that ties an
//! accepted transport to the hub. The HTTP server that would route static
//! UI assets and proxy `/tail` requests here is an external collaborator
//! (§1 OUT OF SCOPE); this module supplies only the minimal accept loop
//! needed to exercise the hook end to end.

use crate::client::client::{self, Registration};
use crate::helpers::load_config::Config;
use crate::hub::hub::{Hub, HubHandle};
use crate::tail_service::tail_service::TailService;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("root path {0:?} does not exist or is not a directory")]
    InvalidRoot(PathBuf),
    #[error("failed to canonicalize root path {0:?}: {1}")]
    Canonicalize(PathBuf, std::io::Error),
}

/// The broker façade: owns the hub task and exposes the narrow surface an
/// external caller (binary, or an embedding HTTP server) needs.
pub struct Service {
    handle: HubHandle,
    hub_join: Option<JoinHandle<()>>,
    client_buffer_size: usize,
    ws_config: tokio_tungstenite::tungstenite::protocol::WebSocketConfig,
}

impl Service {
    /// Validates and canonicalizes `config.general.root`, constructs the
    /// `TailService`, and spawns the hub's event loop as its own task.
    pub fn new(config: &Config) -> Result<Self, ServiceError> {
        let root = &config.general.root;
        let meta = std::fs::metadata(root).map_err(|_| ServiceError::InvalidRoot(root.clone()))?;
        if !meta.is_dir() {
            return Err(ServiceError::InvalidRoot(root.clone()));
        }
        let root = root
            .canonicalize()
            .map_err(|e| ServiceError::Canonicalize(root.clone(), e))?;

        let tail = TailService::with_poll(
            root,
            config.tail_service.bytes,
            config.tail_service.lines,
            config.tail_service.max_line_size,
            Duration::from_millis(config.indexer.poll_interval_ms),
            config.tail_service.poll,
            config.tail_service.trace,
        );
        let (hub, handle) = Hub::new(tail);
        let hub_join = tokio::spawn(hub.run());

        let ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig {
            write_buffer_size: config.general.write_buffer_size,
            max_message_size: Some(config.general.read_buffer_size),
            ..Default::default()
        };

        Ok(Self {
            handle,
            hub_join: Some(hub_join),
            client_buffer_size: config.general.client_buffer_size,
            ws_config,
        })
    }

    /// Signals `quit` and waits for the hub (and, transitively, every
    /// client/producer task it drains) to finish.
    pub async fn close(&mut self) -> Result<()> {
        let _ = self.handle.quit_tx.send(()).await;
        if let Some(join) = self.hub_join.take() {
            join.await.context("hub task panicked")?;
        }
        Ok(())
    }

    /// The upgrade hook: performs the websocket handshake on an already
    /// accepted transport, constructs a client with the configured queue
    /// capacity, registers it with the hub, and spawns its reader/writer.
    pub fn upgrade(&self, stream: TcpStream) {
        let handle = self.handle.clone();
        let client_buffer_size = self.client_buffer_size;
        let ws_config = self.ws_config.clone();
        tokio::spawn(async move {
            let ws = match tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)).await {
                Ok(ws) => ws,
                Err(err) => {
                    tracing::warn!(error = %err, "websocket upgrade failed");
                    return;
                }
            };
            let id = client::next_client_id();
            let out_tx = client::spawn(
                id,
                ws,
                client_buffer_size,
                handle.broadcast_tx.clone(),
                handle.unregister_tx.clone(),
            );
            if handle
                .register_tx
                .send(Registration { id, out_tx })
                .await
                .is_err()
            {
                tracing::warn!(client = id, "hub not accepting registrations");
            }
        });
    }

    /// Binds `listen_addr` and accepts connections until `close` tears down
    /// the hub or the listener itself errors out.
    pub async fn serve(&self, listen_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("binding websocket listener on {listen_addr}"))?;
        tracing::info!(addr = %listen_addr, "websocket transport listening");
        loop {
            let (stream, peer) = listener.accept().await.context("accepting connection")?;
            tracing::debug!(peer = %peer, "accepted connection");
            self.upgrade(stream);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::load_config::{GeneralConfig, IndexerConfig, MetricsConfig, TailServiceConfig};

    fn test_config(root: PathBuf) -> Config {
        Config {
            general: GeneralConfig {
                root,
                listen_addr: "127.0.0.1:0".to_string(),
                client_buffer_size: 16,
                read_buffer_size: 4096,
                write_buffer_size: 4096,
                log_dir: "./log".to_string(),
            },
            tail_service: TailServiceConfig {
                bytes: 0,
                lines: 10,
                max_line_size: 4096,
                poll: false,
                trace: false,
            },
            indexer: IndexerConfig {
                recursive: true,
                poll_interval_ms: 50,
            },
            metrics: MetricsConfig {
                enabled: false,
                listen_addr: "127.0.0.1:0".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn construction_rejects_missing_root() {
        let cfg = test_config(PathBuf::from("/does/not/exist/for/logtail-hub"));
        let err = Service::new(&cfg).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRoot(_)));
    }

    #[tokio::test]
    async fn construction_and_close_round_trip() {
        let dir = std::env::temp_dir().join(format!(
            "logtail-hub-service-test-{}",
            std::process::id()
        ));
        let _ = std::fs::create_dir_all(&dir);
        let cfg = test_config(dir);
        let mut service = Service::new(&cfg).expect("service constructs");
        service.close().await.expect("close completes");
    }
}
