use crate::indexer::indexer::{self as idx, IndexEntry, IndexEvent, IndexerError};
use crate::tailer::tailer::{self, TailerError, TailerLine};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Error)]
pub enum TailServiceError {
    #[error(transparent)]
    Tailer(#[from] TailerError),
    #[error(transparent)]
    Indexer(#[from] IndexerError),
}

enum Producer {
    Tailer {
        quit_tx: watch::Sender<bool>,
        #[allow(dead_code)]
        join: tokio::task::JoinHandle<()>,
        is_head_partial: bool,
    },
    Indexer {
        quit_tx: watch::Sender<bool>,
        #[allow(dead_code)]
        join: tokio::task::JoinHandle<()>,
    },
}

/// Owns the file index, the producer table (one tailer per attached file plus
/// the single indexer), and every tailer's bounded backlog. Every method here
/// is invoked exclusively from the hub's event loop — none of it is
/// concurrency-safe on its own, by design (see hub.rs).
pub struct TailService {
    root: PathBuf,
    bytes: u64,
    lines_capacity: usize,
    max_line_size: usize,
    poll_interval: Duration,
    poll: bool,
    trace: bool,
    index: BTreeMap<String, IndexEntry>,
    producers: HashMap<String, Producer>,
    backlogs: HashMap<String, VecDeque<String>>,
}

impl TailService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        root: PathBuf,
        bytes: u64,
        lines_capacity: usize,
        max_line_size: usize,
        poll_interval: Duration,
        trace: bool,
    ) -> Self {
        Self::with_poll(root, bytes, lines_capacity, max_line_size, poll_interval, false, trace)
    }

    /// Same as `new`, but lets the caller choose polling over OS filesystem
    /// notifications for the indexer's directory watch (`[tail_service].poll`).
    #[allow(clippy::too_many_arguments)]
    pub fn with_poll(
        root: PathBuf,
        bytes: u64,
        lines_capacity: usize,
        max_line_size: usize,
        poll_interval: Duration,
        poll: bool,
        trace: bool,
    ) -> Self {
        Self {
            root,
            bytes,
            lines_capacity,
            max_line_size,
            poll_interval,
            poll,
            trace,
            index: BTreeMap::new(),
            producers: HashMap::new(),
            backlogs: HashMap::new(),
        }
    }

    pub fn channel_exists(&self, channel: &str) -> bool {
        channel.is_empty() || self.index.contains_key(channel)
    }

    pub fn worker_exists(&self, channel: &str) -> bool {
        self.producers.contains_key(channel)
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace
    }

    /// `mode` must be exactly `"on"` or `"off"`; any other value is ignored.
    pub fn set_trace(&mut self, mode: &str) {
        match mode {
            "on" => self.trace = true,
            "off" => self.trace = false,
            _ => {}
        }
    }

    pub async fn indexer_run(&mut self, out: mpsc::Sender<IndexEvent>) -> Result<(), TailServiceError> {
        let since = chrono::Utc::now();
        let entries = idx::initial_walk(&self.root, since).await?;
        for (name, entry) in &entries {
            self.index.insert(name.clone(), entry.clone());
        }
        // Seeds the backstop's "already known" state so its first reconcile
        // pass doesn't re-announce what the walk just populated silently.
        let (quit_tx, join) =
            idx::spawn_watch(self.root.clone(), out, self.poll_interval, self.poll, entries)?;
        self.producers
            .insert(String::new(), Producer::Indexer { quit_tx, join });
        Ok(())
    }

    pub async fn tailer_run(
        &mut self,
        channel: &str,
        out: mpsc::Sender<TailerLine>,
    ) -> Result<(), TailServiceError> {
        let path = self.root.join(channel);
        let (handle, is_head_partial) = tailer::start(
            channel.to_string(),
            path,
            self.bytes,
            self.max_line_size,
            self.poll_interval,
            out,
        )
        .await?;
        self.producers.insert(
            channel.to_string(),
            Producer::Tailer {
                quit_tx: handle.quit_tx,
                join: handle.join,
                is_head_partial,
            },
        );
        self.backlogs.insert(channel.to_string(), VecDeque::new());
        Ok(())
    }

    pub fn worker_stop(&mut self, channel: &str) {
        if let Some(producer) = self.producers.remove(channel) {
            match producer {
                Producer::Tailer { quit_tx, .. } => {
                    let _ = quit_tx.send(true);
                }
                Producer::Indexer { quit_tx, .. } => {
                    let _ = quit_tx.send(true);
                }
            }
        }
        self.backlogs.remove(channel);
    }

    /// Appends a freshly emitted line to `channel`'s backlog. Returns `false`
    /// if this was the tailer's one-shot discarded partial head — callers
    /// must not fan that line out to subscribers.
    pub fn tailer_append(&mut self, channel: &str, text: String) -> bool {
        if let Some(Producer::Tailer {
            is_head_partial, ..
        }) = self.producers.get_mut(channel)
        {
            if *is_head_partial {
                *is_head_partial = false;
                return false;
            }
        }
        let backlog = self.backlogs.entry(channel.to_string()).or_default();
        if self.lines_capacity > 0 {
            while backlog.len() >= self.lines_capacity {
                backlog.pop_front();
            }
        }
        backlog.push_back(text);
        true
    }

    /// Point-in-time snapshot of `channel`'s backlog, for replay on attach.
    pub fn tailer_buffer(&self, channel: &str) -> Vec<String> {
        self.backlogs
            .get(channel)
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn index_update(&mut self, ev: &IndexEvent) {
        if ev.deleted {
            self.index.remove(&ev.name);
            let prefix = format!("{}/", ev.name);
            self.index.retain(|k, _| !k.starts_with(&prefix));
        } else {
            self.index.insert(
                ev.name.clone(),
                IndexEntry {
                    mtime: ev.mtime,
                    size: ev.size,
                },
            );
        }
    }

    /// Lexicographically sorted snapshot of the index, for attach-to-"" replay.
    pub fn index_keys(&self) -> Vec<(String, IndexEntry)> {
        self.index.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn backlog_lines_total(&self) -> usize {
        self.backlogs.values().map(|b| b.len()).sum()
    }

    pub fn tailers_running(&self) -> usize {
        self.producers
            .values()
            .filter(|p| matches!(p, Producer::Tailer { .. }))
            .count()
    }
}
