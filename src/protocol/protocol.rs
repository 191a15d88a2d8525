use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One client -> server request frame. Unknown fields are ignored; a frame
/// that fails to deserialize produces an `OutMessage::Error` reply, it is
/// never fatal to the connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InMessage {
    Attach {
        #[serde(default)]
        channel: String,
    },
    Detach {
        #[serde(default)]
        channel: String,
    },
    Stats,
    Trace {
        #[serde(default)]
        channel: String,
    },
}

/// One server -> client reply or push frame. A single transport frame may
/// carry several of these newline-separated (writer coalescing).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutMessage {
    Attach { channel: String, data: &'static str },
    Detach { channel: String, data: &'static str },
    Error {
        data: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
    Log { channel: String, data: String },
    Index { data: IndexEntryMsg },
    Stats { data: BTreeMap<String, usize> },
    Trace { enabled: bool },
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexEntryMsg {
    pub name: String,
    pub mtime: DateTime<Utc>,
    pub size: u64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

pub const ERR_PARSE: &str = "parse error";
pub const ERR_UNKNOWN_CHANNEL: &str = "unknown channel";
pub const ERR_ATTACHED_ALREADY: &str = "attached already";
pub const ERR_NOT_SUBSCRIBED: &str = "not subscribed";
pub const ERR_WORKER_CREATE: &str = "worker create error";

impl OutMessage {
    /// Serializes to a single-line JSON frame body (no trailing newline).
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","data":"parse error"}"#.to_string()
        })
    }
}

/// Parses one inbound frame. A frame may embed several newline-separated
/// JSON objects (mirrors the writer's own coalescing); every line is parsed
/// independently and malformed lines are reported individually by the caller.
pub fn parse_frame(frame: &str) -> Vec<Result<InMessage, serde_json::Error>> {
    frame
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(serde_json::from_str)
        .collect()
}
