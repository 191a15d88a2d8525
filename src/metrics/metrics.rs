use lazy_static::lazy_static;
use prometheus::{
    Counter, Gauge, IntGauge, register_counter, register_gauge, register_int_gauge,
};

lazy_static! {
    /// Number of clients currently registered with the hub.
    pub static ref HUB_CLIENTS_CONNECTED: IntGauge = register_int_gauge!(
        "hub_clients_connected",
        "Number of clients currently registered with the hub"
    )
    .unwrap();

    /// Number of clients evicted for a saturated outbound queue, cumulative.
    pub static ref HUB_CLIENTS_EVICTED_TOTAL: Counter = register_counter!(
        "hub_clients_evicted_total",
        "Total number of clients evicted for a saturated outbound queue"
    )
    .unwrap();

    /// Sum of subscriber counts across every channel.
    pub static ref HUB_SUBSCRIBERS_TOTAL: IntGauge = register_int_gauge!(
        "hub_subscribers_total",
        "Sum of subscriber counts across every channel"
    )
    .unwrap();

    /// Number of channels with at least one subscriber.
    pub static ref HUB_CHANNELS_ACTIVE: IntGauge = register_int_gauge!(
        "hub_channels_active",
        "Number of channels with at least one subscriber"
    )
    .unwrap();

    /// Number of tailer producers currently running.
    pub static ref HUB_TAILERS_RUNNING: IntGauge = register_int_gauge!(
        "hub_tailers_running",
        "Number of tailer producers currently running"
    )
    .unwrap();

    /// Sum of backlog line counts across every channel.
    pub static ref HUB_BACKLOG_LINES_TOTAL: IntGauge = register_int_gauge!(
        "hub_backlog_lines_total",
        "Sum of backlog line counts across every channel"
    )
    .unwrap();

    /// Indexer events processed, cumulative.
    pub static ref INDEXER_EVENTS_TOTAL: Counter = register_counter!(
        "indexer_events_total",
        "Total number of index events processed by the hub"
    )
    .unwrap();

    /// Lines emitted by tailers, cumulative.
    pub static ref TAILER_LINES_EMITTED_TOTAL: Counter = register_counter!(
        "tailer_lines_emitted_total",
        "Total number of lines emitted by tailers, including discarded partial heads"
    )
    .unwrap();

    /// Gauge mirroring the hub event loop's dispatch count, useful as a liveness signal.
    pub static ref HUB_LOOP_ITERATIONS_TOTAL: Gauge = register_gauge!(
        "hub_loop_iterations_total",
        "Number of events dispatched by the hub loop"
    )
    .unwrap();
}
