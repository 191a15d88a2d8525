use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::{mpsc, watch};

/// One line read from a tailed file, ready for `TailService::tailer_append`.
#[derive(Debug, Clone)]
pub struct TailerLine {
    pub channel: String,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum TailerError {
    #[error("failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to stat {path:?}: {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub struct TailerHandle {
    pub quit_tx: watch::Sender<bool>,
    pub join: tokio::task::JoinHandle<()>,
}

/// Opens `path`, computing whether the tail start position lands inside an
/// existing line (`is_head_partial`), then spawns the follow task. Startup
/// failures are reported synchronously and the caller must not register a
/// producer in that case.
pub async fn start(
    channel: String,
    path: PathBuf,
    tail_bytes: u64,
    max_line_size: usize,
    poll_interval: Duration,
    out: mpsc::Sender<TailerLine>,
) -> Result<(TailerHandle, bool), TailerError> {
    let file = File::open(&path).await.map_err(|source| TailerError::Open {
        path: path.clone(),
        source,
    })?;
    let meta = file.metadata().await.map_err(|source| TailerError::Stat {
        path: path.clone(),
        source,
    })?;
    let size = meta.len();
    let seek_offset = size.saturating_sub(tail_bytes);
    let is_head_partial = tail_bytes > 0 && size > tail_bytes;

    let mut reader = BufReader::new(file);
    reader
        .seek(SeekFrom::Start(seek_offset))
        .await
        .map_err(|source| TailerError::Stat {
            path: path.clone(),
            source,
        })?;

    let (quit_tx, quit_rx) = watch::channel(false);
    let join = tokio::spawn(run(
        channel,
        path,
        reader,
        max_line_size,
        poll_interval,
        out,
        quit_rx,
    ));

    Ok((TailerHandle { quit_tx, join }, is_head_partial))
}

async fn run(
    channel: String,
    path: PathBuf,
    mut reader: BufReader<File>,
    max_line_size: usize,
    poll_interval: Duration,
    out: mpsc::Sender<TailerLine>,
    mut quit_rx: watch::Receiver<bool>,
) {
    let mut line = String::new();
    loop {
        tokio::select! {
            _ = quit_rx.changed() => {
                tracing::debug!(path = %path.display(), "tailer stopping");
                return;
            }
            result = reader.read_line(&mut line) => {
                match result {
                    Ok(0) => {
                        if let Some(reopened) = maybe_reopen(&path, &reader).await {
                            reader = reopened;
                            line.clear();
                            continue;
                        }
                        if wait_or_quit(&mut quit_rx, poll_interval).await {
                            return;
                        }
                    }
                    Ok(_) if line.ends_with('\n') => {
                        let trimmed = line.trim_end_matches(['\n', '\r']);
                        let text: String = if trimmed.len() > max_line_size {
                            trimmed.chars().take(max_line_size).collect()
                        } else {
                            trimmed.to_string()
                        };
                        line.clear();
                        if out.send(TailerLine { channel: channel.clone(), text }).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {
                        // Partial line at current end-of-file; keep accumulating on the next read.
                        if wait_or_quit(&mut quit_rx, poll_interval).await {
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "tailer read error");
                        line.clear();
                        if wait_or_quit(&mut quit_rx, poll_interval).await {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Sleeps for `dur` unless quit fires first; returns true if quit fired.
async fn wait_or_quit(quit_rx: &mut watch::Receiver<bool>, dur: Duration) -> bool {
    tokio::select! {
        _ = quit_rx.changed() => true,
        _ = tokio::time::sleep(dur) => false,
    }
}

/// Detects rotation by comparing the open file's inode against the path's
/// current inode; reopens the path under its original name if they differ.
async fn maybe_reopen(path: &Path, reader: &BufReader<File>) -> Option<BufReader<File>> {
    use std::os::unix::fs::MetadataExt;
    let current_ino = reader.get_ref().metadata().await.ok()?.ino();
    let disk_meta = tokio::fs::metadata(path).await.ok()?;
    if disk_meta.ino() == current_ino {
        return None;
    }
    let file = File::open(path).await.ok()?;
    Some(BufReader::new(file))
}
