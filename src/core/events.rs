//! Asynchronous port notifications
//!
//! Every event carries the connection id of the session that produced it so a
//! consumer can drop events from a superseded session.

use crate::core::codec::{decode_text, encode_hex};
use crate::core::session::{ConnectionId, SessionInfo};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Notification emitted by an open (or closing) session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SerialEvent {
    /// Bytes arrived from the device
    #[serde(rename_all = "camelCase")]
    Data {
        /// Port path
        path: String,
        /// Owning connection
        connection_id: ConnectionId,
        /// Chunk decoded as UTF-8 (lossy)
        data: String,
        /// Chunk length in bytes
        bytes: usize,
        /// Chunk exactly as read
        #[serde(skip)]
        raw: Bytes,
        /// Unix time in milliseconds
        ts: i64,
    },
    /// The port reported an I/O error
    #[serde(rename_all = "camelCase")]
    Error {
        /// Port path
        path: String,
        /// Owning connection
        connection_id: ConnectionId,
        /// Error text
        message: String,
        /// Unix time in milliseconds
        ts: i64,
    },
    /// The port closed, explicitly or not
    #[serde(rename_all = "camelCase")]
    Closed {
        /// Port path
        path: String,
        /// Owning connection
        connection_id: ConnectionId,
        /// Unix time in milliseconds
        ts: i64,
    },
}

impl SerialEvent {
    pub(crate) fn data(info: &SessionInfo, chunk: Bytes) -> Self {
        Self::Data {
            path: info.path.clone(),
            connection_id: info.connection_id,
            data: decode_text(&chunk),
            bytes: chunk.len(),
            raw: chunk,
            ts: now_millis(),
        }
    }

    pub(crate) fn error(info: &SessionInfo, message: impl Into<String>) -> Self {
        Self::Error {
            path: info.path.clone(),
            connection_id: info.connection_id,
            message: message.into(),
            ts: now_millis(),
        }
    }

    pub(crate) fn closed(info: &SessionInfo) -> Self {
        Self::Closed {
            path: info.path.clone(),
            connection_id: info.connection_id,
            ts: now_millis(),
        }
    }

    /// Received bytes as uppercase hex, for data events
    pub fn data_hex(&self) -> Option<String> {
        match self {
            Self::Data { raw, .. } => Some(encode_hex(raw)),
            Self::Error { .. } | Self::Closed { .. } => None,
        }
    }

    /// Connection that produced this event
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Self::Data { connection_id, .. }
            | Self::Error { connection_id, .. }
            | Self::Closed { connection_id, .. } => *connection_id,
        }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Fan-out of [`SerialEvent`]s to any number of consumers
///
/// Delivery is fire-and-forget: with no subscriber attached, events are dropped.
#[derive(Debug, Clone)]
pub struct EventRelay {
    tx: broadcast::Sender<SerialEvent>,
}

impl EventRelay {
    /// Create a relay with no subscribers
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SerialEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: SerialEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventRelay {
    fn default() -> Self {
        Self::new()
    }
}
