use crate::protocol::protocol::{self, InMessage};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

pub type ClientId = u64;

/// Deadline for a single write; expiry terminates the writer.
const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Read deadline, refreshed on every successfully received frame (pongs included).
const PONG_WAIT: Duration = Duration::from_secs(60);
/// Ping period is kept below `PONG_WAIT` so a healthy peer never times out.
const PING_PERIOD: Duration = Duration::from_millis(54_000);

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_client_id() -> ClientId {
    NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// One parsed (or malformed) inbound frame, tagged with the client it came from.
#[derive(Debug)]
pub struct ClientRequest {
    pub client: ClientId,
    pub message: Result<InMessage, serde_json::Error>,
}

/// Submitted to the hub's `register` channel by the service façade's upgrade
/// hook once a client's reader/writer tasks have been spawned.
pub struct Registration {
    pub id: ClientId,
    pub out_tx: mpsc::Sender<String>,
}

/// Spawns the reader and writer tasks for one connected peer. The returned
/// sender is the client's outQueue: the hub performs a non-blocking `offer`
/// on it and, separately, may drop it outright to evict the client — either
/// way the writer observes the channel closing and sends a close frame.
pub fn spawn<S>(
    id: ClientId,
    ws: WebSocketStream<S>,
    out_capacity: usize,
    broadcast: mpsc::Sender<ClientRequest>,
    unregister: mpsc::Sender<ClientId>,
) -> mpsc::Sender<String>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::channel(out_capacity.max(1));
    let (sink, stream) = ws.split();

    tokio::spawn(run_writer(id, sink, out_rx));
    tokio::spawn(run_reader(id, stream, broadcast, unregister));

    out_tx
}

async fn run_writer<S>(
    id: ClientId,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut out_rx: mpsc::Receiver<String>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let mut ticker = tokio::time::interval(PING_PERIOD);
    ticker.tick().await;

    loop {
        tokio::select! {
            received = out_rx.recv() => {
                match received {
                    Some(first) => {
                        // Opportunistically coalesce whatever else is already
                        // queued into the same frame, newline-separated.
                        let mut batch = first;
                        while let Ok(extra) = out_rx.try_recv() {
                            batch.push('\n');
                            batch.push_str(&extra);
                        }
                        if !write_frame(&mut sink, Message::Text(batch.into())).await {
                            break;
                        }
                    }
                    None => {
                        let _ = write_frame(&mut sink, Message::Close(None)).await;
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if !write_frame(&mut sink, Message::Ping(Vec::new().into())).await {
                    break;
                }
            }
        }
    }
    tracing::debug!(client = id, "client writer exiting");
}

async fn write_frame<S>(sink: &mut SplitSink<WebSocketStream<S>, Message>, msg: Message) -> bool
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    matches!(
        tokio::time::timeout(WRITE_WAIT, sink.send(msg)).await,
        Ok(Ok(()))
    )
}

async fn run_reader<S>(
    id: ClientId,
    mut stream: SplitStream<WebSocketStream<S>>,
    broadcast: mpsc::Sender<ClientRequest>,
    unregister: mpsc::Sender<ClientId>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let next = tokio::time::timeout(PONG_WAIT, stream.next()).await;
        let Ok(Some(Ok(msg))) = next else {
            break;
        };
        match msg {
            Message::Text(text) => {
                let normalized = normalize(text.as_str());
                for parsed in protocol::parse_frame(&normalized) {
                    if broadcast
                        .send(ClientRequest {
                            client: id,
                            message: parsed,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
            Message::Close(_) => break,
            // Pong/Ping/Binary/Frame: the read deadline above already refreshed on receipt.
            _ => {}
        }
    }
    tracing::debug!(client = id, "client reader exiting");
    let _ = unregister.send(id).await;
}

/// Trims surrounding whitespace and collapses embedded newlines to spaces so
/// that a frame split oddly by the transport still parses as one JSON value.
fn normalize(text: &str) -> String {
    text.trim().replace(['\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_embedded_newlines() {
        assert_eq!(
            normalize("  {\"type\":\"attach\"\n,\"channel\":\"a\"}  \r\n"),
            "{\"type\":\"attach\" ,\"channel\":\"a\"}"
        );
    }

    #[test]
    fn client_ids_are_unique_and_increasing() {
        let a = next_client_id();
        let b = next_client_id();
        assert!(b > a);
    }
}
