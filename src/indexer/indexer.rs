use chrono::{DateTime, Utc};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub mtime: DateTime<Utc>,
    pub size: u64,
}

/// One translated filesystem observation, ready for `TailService::index_update`.
#[derive(Debug, Clone)]
pub struct IndexEvent {
    pub name: String,
    pub mtime: DateTime<Utc>,
    pub size: u64,
    pub deleted: bool,
}

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("failed to walk root directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("failed to start filesystem watcher: {0}")]
    Watch(#[from] notify::Error),
}

/// One-time depth-first walk of `root`. Every regular file whose mtime is
/// strictly earlier than `since` is returned for silent population of the
/// index — no event is emitted for these entries.
pub async fn initial_walk(
    root: &Path,
    since: DateTime<Utc>,
) -> Result<Vec<(String, IndexEntry)>, IndexerError> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || walk_blocking(&root, since))
        .await
        .expect("initial_walk blocking task panicked")
}

fn walk_blocking(
    root: &Path,
    since: DateTime<Utc>,
) -> Result<Vec<(String, IndexEntry)>, IndexerError> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root).into_iter() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let mtime = file_mtime(&meta);
        if mtime >= since {
            continue;
        }
        let Some(name) = relative_name(root, entry.path()) else {
            continue;
        };
        out.push((
            name,
            IndexEntry {
                mtime,
                size: meta.len(),
            },
        ));
    }
    Ok(out)
}

fn file_mtime(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified()
        .ok()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(Utc::now)
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let s = rel.to_string_lossy().replace('\\', "/");
    if s.is_empty() { None } else { Some(s) }
}

/// Last `{mtime, size}` observed for each known file, used by `reconcile` to
/// decide whether a re-walked file actually changed since it was last
/// reported — otherwise every tick would re-announce the whole tree.
type KnownState = HashMap<String, (DateTime<Utc>, u64)>;

/// Spawns the directory watch plus a periodic reconciliation backstop.
/// When `poll` is false (the default), filesystem events come from the OS
/// notification backend and the backstop only catches what it missed; when
/// `poll` is true, no OS watcher is started at all and the backstop ticker
/// is the sole source of events. Every observed change is translated into
/// exactly one `IndexEvent` sent on `out`. `initial` seeds the backstop's
/// notion of "already known" with what `initial_walk` silently populated,
/// so the first reconciliation pass doesn't re-announce it. Returns a quit
/// signal and the task handle.
pub fn spawn_watch(
    root: PathBuf,
    out: mpsc::Sender<IndexEvent>,
    poll_interval: Duration,
    poll: bool,
    initial: Vec<(String, IndexEntry)>,
) -> Result<(watch::Sender<bool>, tokio::task::JoinHandle<()>), IndexerError> {
    let (quit_tx, mut quit_rx) = watch::channel(false);
    let (notify_tx, mut notify_rx) = mpsc::channel::<notify::Result<Event>>(256);

    let watcher: Option<RecommendedWatcher> = if poll {
        None
    } else {
        let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
            let _ = notify_tx.blocking_send(res);
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        Some(watcher)
    };

    let handle = tokio::spawn(async move {
        let _watcher = watcher;
        let mut known: KnownState = initial
            .into_iter()
            .map(|(name, entry)| (name, (entry.mtime, entry.size)))
            .collect();
        reconcile(&root, &mut known, &out).await;

        let mut ticker = tokio::time::interval(poll_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = quit_rx.changed() => {
                    break;
                }
                Some(res) = notify_rx.recv(), if !poll => {
                    match res {
                        Ok(event) => handle_notify_event(&root, &event, &mut known, &out).await,
                        Err(err) => tracing::warn!(error = %err, "indexer watch error"),
                    }
                }
                _ = ticker.tick() => {
                    reconcile(&root, &mut known, &out).await;
                }
            }
        }
        tracing::debug!("indexer watch task stopped");
    });

    Ok((quit_tx, handle))
}

async fn handle_notify_event(
    root: &Path,
    event: &Event,
    known: &mut KnownState,
    out: &mpsc::Sender<IndexEvent>,
) {
    for path in &event.paths {
        let Some(name) = relative_name(root, path) else {
            continue;
        };
        match event.kind {
            EventKind::Remove(_) => emit_deleted(name, known, out).await,
            EventKind::Create(_) | EventKind::Modify(_) => {
                emit_stat(path, name, known, out).await
            }
            _ => {}
        }
    }
}

async fn emit_stat(
    path: &Path,
    name: String,
    known: &mut KnownState,
    out: &mpsc::Sender<IndexEvent>,
) {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {
            let mtime = file_mtime(&meta);
            let size = meta.len();
            known.insert(name.clone(), (mtime, size));
            let _ = out
                .send(IndexEvent {
                    name,
                    mtime,
                    size,
                    deleted: false,
                })
                .await;
        }
        _ => emit_deleted(name, known, out).await,
    }
}

async fn emit_deleted(name: String, known: &mut KnownState, out: &mpsc::Sender<IndexEvent>) {
    known.remove(&name);
    let _ = out
        .send(IndexEvent {
            name,
            mtime: Utc::now(),
            size: 0,
            deleted: true,
        })
        .await;
}

/// Re-walks the tree and diffs it against `known`, emitting a stat event
/// only for a file that is new or whose `{mtime, size}` actually changed,
/// and a deletion event for every previously-known file that has since
/// disappeared. Unchanged files produce no event.
async fn reconcile(root: &Path, known: &mut KnownState, out: &mpsc::Sender<IndexEvent>) {
    let root_owned = root.to_path_buf();
    let found = tokio::task::spawn_blocking(move || {
        let mut found = Vec::new();
        for entry in WalkDir::new(&root_owned).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if let Some(name) = relative_name(&root_owned, entry.path()) {
                    found.push((name, meta));
                }
            }
        }
        found
    })
    .await
    .unwrap_or_default();

    let mut seen_now: HashSet<String> = HashSet::with_capacity(found.len());
    for (name, meta) in found {
        let mtime = file_mtime(&meta);
        let size = meta.len();
        seen_now.insert(name.clone());
        let changed = known
            .get(&name)
            .is_none_or(|&(prev_mtime, prev_size)| prev_mtime != mtime || prev_size != size);
        if changed {
            known.insert(name.clone(), (mtime, size));
            let _ = out
                .send(IndexEvent {
                    name,
                    mtime,
                    size,
                    deleted: false,
                })
                .await;
        }
    }

    let vanished: Vec<String> = known
        .keys()
        .filter(|name| !seen_now.contains(*name))
        .cloned()
        .collect();
    for name in vanished {
        emit_deleted(name, known, out).await;
    }
}
