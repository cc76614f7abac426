//! Real-time notifications.
//!
//! [`hub::EventHub`] fans messages out to every connected SSE client;
//! [`bridge::ActiveBridge`] forwards structured pipeline messages to the one
//! bridge session that is currently registered; [`ingest::Ingestor`] applies
//! the database side effects of pipeline messages.

pub mod bridge;
pub mod hub;
pub mod ingest;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message shape shared by the pipeline, the SSE stream and the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl BroadcastMessage {
    /// New message stamped with the current time in milliseconds.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self { kind: kind.into(), timestamp: now_millis(), data }
    }
}

pub fn now_millis() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64
}

/// Event names broadcast by the backend itself.
pub mod kinds {
    pub const CONNECTED: &str = "connected";
    pub const SYMLINK_CREATED: &str = "symlink_created";
    pub const FILE_PROCESSED: &str = "file_processed";
    pub const DASHBOARD_STATS_CHANGED: &str = "dashboard_stats_changed";
    pub const FILE_OPERATION_CHANGED: &str = "file_operation_changed";
}
