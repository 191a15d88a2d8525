//! The single-threaded event loop that serializes every mutation of
//! subscription, index, and producer-table state. Nothing outside this
//! module ever touches `TailService` directly once the hub is running.

use crate::client::client::{ClientId, ClientRequest, Registration};
use crate::indexer::indexer::IndexEvent;
use crate::metrics::metrics::{
    HUB_BACKLOG_LINES_TOTAL, HUB_CHANNELS_ACTIVE, HUB_CLIENTS_CONNECTED,
    HUB_CLIENTS_EVICTED_TOTAL, HUB_LOOP_ITERATIONS_TOTAL, HUB_SUBSCRIBERS_TOTAL,
    HUB_TAILERS_RUNNING, INDEXER_EVENTS_TOTAL, TAILER_LINES_EMITTED_TOTAL,
};
use crate::protocol::protocol::{self, IndexEntryMsg, OutMessage};
use crate::tail_service::tail_service::TailService;
use crate::tailer::tailer::TailerLine;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 256;

/// Senders the service façade and client tasks use to feed the hub. Cheap to
/// clone; every field is itself a clonable `mpsc::Sender`.
#[derive(Clone)]
pub struct HubHandle {
    pub register_tx: mpsc::Sender<Registration>,
    pub unregister_tx: mpsc::Sender<ClientId>,
    pub broadcast_tx: mpsc::Sender<ClientRequest>,
    pub quit_tx: mpsc::Sender<()>,
}

pub struct Hub {
    tail: TailService,
    clients: HashSet<ClientId>,
    senders: HashMap<ClientId, mpsc::Sender<String>>,
    subscribers: HashMap<String, HashSet<ClientId>>,
    stats: BTreeMap<String, usize>,
    draining: bool,

    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<ClientId>,
    broadcast_rx: mpsc::Receiver<ClientRequest>,

    tailer_tx: mpsc::Sender<TailerLine>,
    tailer_rx: mpsc::Receiver<TailerLine>,
    index_tx: mpsc::Sender<IndexEvent>,
    index_rx: mpsc::Receiver<IndexEvent>,
    quit_rx: mpsc::Receiver<()>,
}

impl Hub {
    pub fn new(tail: TailService) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (tailer_tx, tailer_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (index_tx, index_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (quit_tx, quit_rx) = mpsc::channel(1);

        let hub = Self {
            tail,
            clients: HashSet::new(),
            senders: HashMap::new(),
            subscribers: HashMap::new(),
            stats: BTreeMap::new(),
            draining: false,
            register_rx,
            unregister_rx,
            broadcast_rx,
            tailer_tx,
            tailer_rx,
            index_tx,
            index_rx,
            quit_rx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            quit_tx,
        };
        (hub, handle)
    }

    /// Runs until drain completes: every registered client has unregistered
    /// after `quit` fired. Consumes `self` — there is exactly one hub task.
    #[tracing::instrument(name = "hub::run", skip_all, level = "debug")]
    pub async fn run(mut self) {
        self.subscribers.insert(String::new(), HashSet::new());
        if let Err(err) = self.tail.indexer_run(self.index_tx.clone()).await {
            tracing::error!(error = %err, "indexer failed to start; hub exiting");
            return;
        }

        loop {
            tokio::select! {
                Some(registration) = self.register_rx.recv() => {
                    self.handle_register(registration);
                }
                Some(id) = self.unregister_rx.recv() => {
                    self.handle_unregister(id);
                    if self.draining && self.clients.is_empty() {
                        break;
                    }
                }
                Some(req) = self.broadcast_rx.recv() => {
                    self.handle_client_request(req).await;
                }
                Some(line) = self.tailer_rx.recv() => {
                    self.handle_tailer_line(line);
                }
                Some(event) = self.index_rx.recv() => {
                    self.handle_index_event(event);
                }
                Some(()) = self.quit_rx.recv() => {
                    self.handle_quit();
                    if self.clients.is_empty() {
                        break;
                    }
                }
                else => break,
            }
            self.refresh_gauges();
            HUB_LOOP_ITERATIONS_TOTAL.inc();
        }

        self.tail.worker_stop("");
        tracing::info!("hub event loop stopped");
    }

    fn handle_register(&mut self, registration: Registration) {
        if self.draining {
            return;
        }
        self.clients.insert(registration.id);
        self.senders.insert(registration.id, registration.out_tx);
        HUB_CLIENTS_CONNECTED.inc();
    }

    fn handle_unregister(&mut self, id: ClientId) {
        if !self.clients.remove(&id) {
            return;
        }
        self.unsubscribe_everywhere(id);
        self.senders.remove(&id);
        HUB_CLIENTS_CONNECTED.dec();
    }

    fn handle_quit(&mut self) {
        self.draining = true;
        // Dropping every sender closes that client's outQueue; its writer
        // task then emits a close frame and exits, which in turn makes the
        // reader observe a closed transport and send `unregister`.
        self.senders.clear();
    }

    async fn handle_client_request(&mut self, req: ClientRequest) {
        let id = req.client;
        if !self.clients.contains(&id) {
            return;
        }
        match req.message {
            Ok(message) => self.dispatch(id, message).await,
            Err(_) => {
                self.send(id, OutMessage::Error { data: protocol::ERR_PARSE, channel: None });
            }
        }
    }

    async fn dispatch(&mut self, id: ClientId, message: crate::protocol::protocol::InMessage) {
        use crate::protocol::protocol::InMessage;
        match message {
            InMessage::Attach { channel } => self.handle_attach(id, channel).await,
            InMessage::Detach { channel } => self.handle_detach(id, channel),
            InMessage::Stats => {
                self.send(id, OutMessage::Stats { data: self.stats.clone() });
            }
            InMessage::Trace { channel } => {
                self.tail.set_trace(&channel);
                let enabled = self.tail.trace_enabled();
                self.send(id, OutMessage::Trace { enabled });
            }
        }
    }

    async fn handle_attach(&mut self, id: ClientId, channel: String) {
        if !self.tail.channel_exists(&channel) {
            self.send(
                id,
                OutMessage::Error {
                    data: protocol::ERR_UNKNOWN_CHANNEL,
                    channel: Some(channel),
                },
            );
            return;
        }

        if !self.tail.worker_exists(&channel) {
            if let Err(err) = self.tail.tailer_run(&channel, self.tailer_tx.clone()).await {
                tracing::warn!(channel = %channel, error = %err, "tailer create error");
                self.send(
                    id,
                    OutMessage::Error {
                        data: protocol::ERR_WORKER_CREATE,
                        channel: Some(channel),
                    },
                );
                return;
            }
            self.subscribers.entry(channel.clone()).or_default();
            self.stats.entry(channel.clone()).or_insert(0);
        } else if self
            .subscribers
            .get(&channel)
            .is_some_and(|set| set.contains(&id))
        {
            self.send(
                id,
                OutMessage::Error {
                    data: protocol::ERR_ATTACHED_ALREADY,
                    channel: Some(channel),
                },
            );
            return;
        }

        if !self.send(
            id,
            OutMessage::Attach {
                channel: channel.clone(),
                data: "success",
            },
        ) {
            return;
        }

        let replay_ok = if channel.is_empty() {
            self.replay_index(id)
        } else {
            self.replay_backlog(id, &channel)
        };
        if !replay_ok {
            return;
        }

        self.subscribers.entry(channel.clone()).or_default().insert(id);
        *self.stats.entry(channel).or_insert(0) += 1;
    }

    fn replay_backlog(&mut self, id: ClientId, channel: &str) -> bool {
        for line in self.tail.tailer_buffer(channel) {
            if !self.send(
                id,
                OutMessage::Log {
                    channel: channel.to_string(),
                    data: line,
                },
            ) {
                return false;
            }
        }
        true
    }

    fn replay_index(&mut self, id: ClientId) -> bool {
        for (name, entry) in self.tail.index_keys() {
            let msg = OutMessage::Index {
                data: IndexEntryMsg {
                    name,
                    mtime: entry.mtime,
                    size: entry.size,
                    deleted: false,
                },
            };
            if !self.send(id, msg) {
                return false;
            }
        }
        true
    }

    fn handle_detach(&mut self, id: ClientId, channel: String) {
        let worker_running = channel.is_empty() || self.tail.worker_exists(&channel);
        let subs_defined = self.subscribers.contains_key(&channel);
        if !subs_defined || !worker_running {
            self.send(
                id,
                OutMessage::Error {
                    data: protocol::ERR_UNKNOWN_CHANNEL,
                    channel: Some(channel),
                },
            );
            return;
        }
        let subscribed = self
            .subscribers
            .get(&channel)
            .is_some_and(|set| set.contains(&id));
        if !subscribed {
            self.send(
                id,
                OutMessage::Error {
                    data: protocol::ERR_NOT_SUBSCRIBED,
                    channel: Some(channel),
                },
            );
            return;
        }
        self.unsubscribe_one(&channel, id);
        self.send(
            id,
            OutMessage::Detach {
                channel,
                data: "success",
            },
        );
    }

    fn handle_tailer_line(&mut self, line: TailerLine) {
        TAILER_LINES_EMITTED_TOTAL.inc();
        if !self.tail.tailer_append(&line.channel, line.text.clone()) {
            return;
        }
        if self.tail.trace_enabled() {
            tracing::debug!(channel = %line.channel, text = %line.text, "trace: tailer line");
        }
        let Some(ids) = self.subscribers.get(&line.channel) else {
            return;
        };
        let ids: Vec<ClientId> = ids.iter().copied().collect();
        for id in ids {
            self.send(
                id,
                OutMessage::Log {
                    channel: line.channel.clone(),
                    data: line.text.clone(),
                },
            );
        }
    }

    fn handle_index_event(&mut self, event: IndexEvent) {
        INDEXER_EVENTS_TOTAL.inc();
        if self.tail.trace_enabled() {
            tracing::debug!(name = %event.name, deleted = event.deleted, "trace: index event");
        }
        self.tail.index_update(&event);
        let msg = OutMessage::Index {
            data: IndexEntryMsg {
                name: event.name,
                mtime: event.mtime,
                size: event.size,
                deleted: event.deleted,
            },
        };
        let Some(ids) = self.subscribers.get("") else {
            return;
        };
        let ids: Vec<ClientId> = ids.iter().copied().collect();
        for id in ids {
            self.send(id, msg.clone());
        }
    }

    /// Non-blocking offer onto `id`'s outQueue. A full queue means the
    /// client is too slow; it is evicted from every subscription, dropped
    /// from the client registry, and its sender is dropped, which unwinds
    /// its writer/reader tasks.
    fn send(&mut self, id: ClientId, msg: OutMessage) -> bool {
        let Some(tx) = self.senders.get(&id) else {
            return false;
        };
        match tx.try_send(msg.to_line()) {
            Ok(()) => true,
            Err(_) => {
                tracing::info!(client = id, "evicting client: outQueue saturated");
                self.unsubscribe_everywhere(id);
                self.senders.remove(&id);
                if self.clients.remove(&id) {
                    HUB_CLIENTS_CONNECTED.dec();
                }
                HUB_CLIENTS_EVICTED_TOTAL.inc();
                false
            }
        }
    }

    fn unsubscribe_everywhere(&mut self, id: ClientId) {
        let channels: Vec<String> = self
            .subscribers
            .iter()
            .filter(|(_, set)| set.contains(&id))
            .map(|(channel, _)| channel.clone())
            .collect();
        for channel in channels {
            self.unsubscribe_one(&channel, id);
        }
    }

    fn unsubscribe_one(&mut self, channel: &str, id: ClientId) {
        if let Some(set) = self.subscribers.get_mut(channel) {
            set.remove(&id);
        }
        let count = self.stats.entry(channel.to_string()).or_insert(0);
        if *count > 0 {
            *count -= 1;
        }
        if !channel.is_empty() && *count == 0 {
            self.tail.worker_stop(channel);
        }
    }

    fn refresh_gauges(&self) {
        let subscriber_total: usize = self.subscribers.values().map(HashSet::len).sum();
        let active_channels = self.subscribers.values().filter(|s| !s.is_empty()).count();
        HUB_SUBSCRIBERS_TOTAL.set(subscriber_total as i64);
        HUB_CHANNELS_ACTIVE.set(active_channels as i64);
        HUB_TAILERS_RUNNING.set(self.tail.tailers_running() as i64);
        HUB_BACKLOG_LINES_TOTAL.set(self.tail.backlog_lines_total() as i64);
    }
}
