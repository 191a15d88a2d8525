//! End-to-end scenarios driving the hub and `TailService` directly, bypassing
//! the websocket transport (out of scope per the core spec) by standing in
//! an in-process mpsc channel for a client's outQueue, per §8.

use logtail_hub::client::client::{ClientId, ClientRequest, Registration, next_client_id};
use logtail_hub::hub::hub::{Hub, HubHandle};
use logtail_hub::protocol::protocol::InMessage;
use logtail_hub::tail_service::tail_service::TailService;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

fn tempdir(label: &str) -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "logtail-hub-e2e-{label}-{}-{n}",
        std::process::id()
    ));
    let _ = std::fs::create_dir_all(&dir);
    dir
}

fn spawn_hub(root: PathBuf, bytes: u64, lines: usize, trace: bool) -> (tokio::task::JoinHandle<()>, HubHandle) {
    let tail = TailService::new(root, bytes, lines, 4096, Duration::from_millis(20), trace);
    let (hub, handle) = Hub::new(tail);
    let join = tokio::spawn(hub.run());
    (join, handle)
}

async fn register(handle: &HubHandle) -> (ClientId, mpsc::Receiver<String>) {
    let id = next_client_id();
    let (out_tx, out_rx) = mpsc::channel(64);
    handle
        .register_tx
        .send(Registration { id, out_tx })
        .await
        .expect("hub accepts registration");
    (id, out_rx)
}

async fn attach(handle: &HubHandle, id: ClientId, channel: &str) {
    handle
        .broadcast_tx
        .send(ClientRequest {
            client: id,
            message: Ok(InMessage::Attach {
                channel: channel.to_string(),
            }),
        })
        .await
        .unwrap();
}

async fn next(rx: &mut mpsc::Receiver<String>) -> Value {
    let raw = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("message arrives before timeout")
        .expect("outQueue still open");
    serde_json::from_str(&raw).expect("valid json frame")
}

/// Polls `rx` until a predicate matches or the timeout elapses, discarding
/// any non-matching messages along the way (cross-channel ordering is free).
async fn next_matching<F: Fn(&Value) -> bool>(rx: &mut mpsc::Receiver<String>, pred: F) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let raw = rx.recv().await.expect("outQueue still open");
            let v: Value = serde_json::from_str(&raw).expect("valid json frame");
            if pred(&v) {
                return v;
            }
        }
    })
    .await
    .expect("matching message arrives before timeout")
}

/// Sends `quit`, then unregisters every client the test registered — standing
/// in for what that client's reader task would do once the writer observes
/// its outQueue close — and waits for the hub's drain to finish. Safe to
/// pass an already-evicted id: `handle_unregister` is a no-op for an id no
/// longer in `clients`.
async fn shutdown(handle: &HubHandle, join: tokio::task::JoinHandle<()>, ids: &[ClientId]) {
    let _ = handle.quit_tx.send(()).await;
    for &id in ids {
        let _ = handle.unregister_tx.send(id).await;
    }
    let _ = join.await;
}

#[tokio::test]
async fn trace_query_and_toggle() {
    let (join, handle) = spawn_hub(tempdir("trace"), 0, 10, true);
    let (id, mut rx) = register(&handle).await;

    handle
        .broadcast_tx
        .send(ClientRequest {
            client: id,
            message: Ok(InMessage::Trace {
                channel: String::new(),
            }),
        })
        .await
        .unwrap();
    assert_eq!(next(&mut rx).await, serde_json::json!({"type":"trace","enabled":true}));

    handle
        .broadcast_tx
        .send(ClientRequest {
            client: id,
            message: Ok(InMessage::Trace {
                channel: "off".to_string(),
            }),
        })
        .await
        .unwrap();
    assert_eq!(next(&mut rx).await, serde_json::json!({"type":"trace","enabled":false}));

    handle
        .broadcast_tx
        .send(ClientRequest {
            client: id,
            message: Ok(InMessage::Trace {
                channel: "on".to_string(),
            }),
        })
        .await
        .unwrap();
    assert_eq!(next(&mut rx).await, serde_json::json!({"type":"trace","enabled":true}));

    shutdown(&handle, join, &[id]).await;
}

#[tokio::test]
async fn unknown_channel_and_double_attach() {
    let dir = tempdir("unknown-dup");
    tokio::fs::write(dir.join("f.log"), b"hello\n").await.unwrap();
    let (join, handle) = spawn_hub(dir, 0, 10, false);
    let (id, mut rx) = register(&handle).await;

    handle
        .broadcast_tx
        .send(ClientRequest {
            client: id,
            message: Ok(InMessage::Attach {
                channel: ".nope".to_string(),
            }),
        })
        .await
        .unwrap();
    let reply = next(&mut rx).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["data"], "unknown channel");
    assert_eq!(reply["channel"], ".nope");

    // Seed the index by attaching to the meta-channel first.
    attach(&handle, id, "").await;
    assert_eq!(next(&mut rx).await["type"], "attach");

    attach(&handle, id, "f.log").await;
    assert_eq!(next(&mut rx).await["type"], "attach");

    attach(&handle, id, "f.log").await;
    let dup = next(&mut rx).await;
    assert_eq!(dup["type"], "error");
    assert_eq!(dup["data"], "attached already");
    assert_eq!(dup["channel"], "f.log");

    shutdown(&handle, join, &[id]).await;
}

#[tokio::test]
async fn detach_without_subscription_is_an_error() {
    let (join, handle) = spawn_hub(tempdir("detach"), 0, 10, false);
    let (id, mut rx) = register(&handle).await;

    handle
        .broadcast_tx
        .send(ClientRequest {
            client: id,
            message: Ok(InMessage::Detach {
                channel: String::new(),
            }),
        })
        .await
        .unwrap();
    let reply = next(&mut rx).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["data"], "not subscribed");

    shutdown(&handle, join, &[id]).await;
}

/// Scenario 5 + 6 from the core spec: tail a growing file with a tight
/// `bytes` budget (discarding the partial head line), then watch the index
/// cascade a deletion.
#[tokio::test]
async fn tail_with_partial_head_discard_then_delete_cascade() {
    let dir = tempdir("tail-rotate");
    let (join, handle) = spawn_hub(dir.clone(), 20, 10, false);
    let (id, mut rx) = register(&handle).await;

    attach(&handle, id, "").await;
    assert_eq!(next(&mut rx).await["type"], "attach");

    let content = b"test log row zero\ntest log row one\ntest log row two\n";
    assert_eq!(content.len(), 52);
    tokio::fs::write(dir.join("file1.log"), content).await.unwrap();

    let created = next_matching(&mut rx, |v| {
        v["type"] == "index" && v["data"]["name"] == "file1.log" && v["data"]["deleted"] != true
    })
    .await;
    assert_eq!(created["data"]["size"], 52);

    attach(&handle, id, "file1.log").await;
    let attach_reply = next(&mut rx).await;
    assert_eq!(attach_reply["type"], "attach");
    assert_eq!(attach_reply["channel"], "file1.log");

    // bytes=20 seeks to offset 32, landing inside "test log row one" — that
    // fragment is discarded; "test log row two" is the first delivered line.
    let first_log = next_matching(&mut rx, |v| v["type"] == "log" && v["channel"] == "file1.log").await;
    assert_eq!(first_log["data"], "test log row two");

    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .open(dir.join("file1.log"))
        .await
        .unwrap();
    use tokio::io::AsyncWriteExt;
    file.write_all(b"test log row three\n").await.unwrap();
    file.flush().await.unwrap();

    let second_log = next_matching(&mut rx, |v| v["type"] == "log" && v["channel"] == "file1.log").await;
    assert_eq!(second_log["data"], "test log row three");

    tokio::fs::remove_file(dir.join("file1.log")).await.unwrap();
    let deleted = next_matching(&mut rx, |v| {
        v["type"] == "index" && v["data"]["name"] == "file1.log" && v["data"]["deleted"] == true
    })
    .await;
    assert_eq!(deleted["data"]["name"], "file1.log");

    attach(&handle, id, "file1.log").await;
    let reply = next(&mut rx).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["data"], "unknown channel");
    assert_eq!(reply["channel"], "file1.log");

    shutdown(&handle, join, &[id]).await;
}

#[tokio::test]
async fn backlog_replay_gives_new_subscriber_recent_history_without_duplication() {
    let dir = tempdir("backlog-replay");
    tokio::fs::write(dir.join("f.log"), b"").await.unwrap();
    let (join, handle) = spawn_hub(dir.clone(), 0, 10, false);

    let (writer_id, mut writer_rx) = register(&handle).await;
    attach(&handle, writer_id, "f.log").await;
    assert_eq!(next(&mut writer_rx).await["type"], "attach");

    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .open(dir.join("f.log"))
        .await
        .unwrap();
    use tokio::io::AsyncWriteExt;
    file.write_all(b"alpha\nbeta\n").await.unwrap();
    file.flush().await.unwrap();
    assert_eq!(next(&mut writer_rx).await["data"], "alpha");
    assert_eq!(next(&mut writer_rx).await["data"], "beta");

    // A second subscriber attaching afterward should see the backlog replay
    // exactly once, with no duplication against subsequent live fan-out.
    let (late_id, mut late_rx) = register(&handle).await;
    attach(&handle, late_id, "f.log").await;
    assert_eq!(next(&mut late_rx).await["type"], "attach");
    assert_eq!(next(&mut late_rx).await["data"], "alpha");
    assert_eq!(next(&mut late_rx).await["data"], "beta");

    file.write_all(b"gamma\n").await.unwrap();
    file.flush().await.unwrap();
    assert_eq!(next(&mut late_rx).await["data"], "gamma");
    assert_eq!(next(&mut writer_rx).await["data"], "gamma");

    shutdown(&handle, join, &[writer_id, late_id]).await;
}

#[tokio::test]
async fn slow_client_is_evicted_without_stalling_others() {
    let dir = tempdir("evict");
    tokio::fs::write(dir.join("f.log"), b"").await.unwrap();
    let (join, handle) = spawn_hub(dir.clone(), 0, 10, false);

    let slow_id = next_client_id();
    let (slow_out_tx, slow_out_rx) = mpsc::channel::<String>(1);
    handle
        .register_tx
        .send(Registration {
            id: slow_id,
            out_tx: slow_out_tx,
        })
        .await
        .unwrap();
    // Held but never drained — its one-slot queue saturates after the first send.
    let _slow_out_rx = slow_out_rx;

    let (fast_id, mut fast_rx) = register(&handle).await;

    attach(&handle, slow_id, "f.log").await; // fills the slow client's only slot
    attach(&handle, fast_id, "f.log").await;
    assert_eq!(next(&mut fast_rx).await["type"], "attach");

    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .open(dir.join("f.log"))
        .await
        .unwrap();
    use tokio::io::AsyncWriteExt;
    for _ in 0..8 {
        file.write_all(b"line\n").await.unwrap();
    }
    file.flush().await.unwrap();

    // The fast subscriber keeps receiving lines even though the slow one
    // was evicted for a saturated outQueue.
    let mut seen = 0;
    for _ in 0..8 {
        let msg = next(&mut fast_rx).await;
        if msg["type"] == "log" {
            seen += 1;
        }
    }
    assert!(seen >= 1);

    // slow_id was already evicted by the hub; unregistering it again is a
    // harmless no-op, so it is still safe to list here.
    shutdown(&handle, join, &[slow_id, fast_id]).await;
}
