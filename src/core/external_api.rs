//! JSON request/response binding of the core operations
//!
//! A front end (window shell, script, test harness) drives the core with JSON
//! requests such as `{"id": 1, "op": "connect", "path": "COM3"}` and receives
//! `{"id": 1, "ok": true, "path": "COM3", "connectionId": 1}`. Failures reply
//! with `{"ok": false, "error": "<kind>", "message": "..."}`.

use super::capture::{CaptureRequest, CaptureResult};
use super::events::SerialEvent;
use super::ports::{list_ports, PortDescriptor};
use super::session::{ConnectionId, ConnectionManager};
use super::transport::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::debug;

/// Source of the port list
pub type PortLister = fn() -> Result<Vec<PortDescriptor>, TransportError>;

/// API request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ApiRequest {
    /// Enumerate serial ports
    ListPorts,
    /// Open a port
    Connect {
        /// Port path
        #[serde(default)]
        path: String,
    },
    /// Close the current port
    Disconnect,
    /// Send a payload and capture the reply
    WriteAndCapture(CaptureRequest),
}

impl ApiRequest {
    /// Does this request open or close the session?
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Disconnect)
    }
}

/// A parsed request line and the `id` to echo back
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    /// Caller-chosen correlation id
    pub id: Option<Value>,
    /// Operation
    pub request: ApiRequest,
}

impl ApiCall {
    /// Parse one JSON request line; failures come back as a ready error reply
    pub fn parse(line: &str) -> Result<Self, Value> {
        let raw: Value = serde_json::from_str(line)
            .map_err(|e| error_reply(None, "InvalidRequest", &e.to_string()))?;
        let id = raw.get("id").cloned();

        match ApiRequest::deserialize(&raw) {
            Ok(request) => Ok(Self { id, request }),
            Err(e) => Err(error_reply(id, "InvalidRequest", &e.to_string())),
        }
    }
}

/// Reply to `connect`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectReply {
    /// Always true
    pub ok: bool,
    /// Port path
    pub path: String,
    /// Connection id
    pub connection_id: ConnectionId,
}

/// Reply to `disconnect`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectReply {
    /// Always true
    pub ok: bool,
    /// Port of the closed session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Id of the closed session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<ConnectionId>,
}

/// Reply to `writeAndCapture`
#[derive(Debug, Clone, Serialize)]
pub struct CaptureReply {
    /// Always true
    pub ok: bool,
    /// Capture outcome
    #[serde(flatten)]
    pub result: CaptureResult,
}

/// Dispatches JSON requests to a [`ConnectionManager`]
#[derive(Clone)]
pub struct ExternalApi {
    manager: Arc<ConnectionManager>,
    lister: PortLister,
}

impl ExternalApi {
    /// Create an API over `manager` using the OS port list
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self::with_lister(manager, list_ports)
    }

    /// Create an API with a custom port source
    pub fn with_lister(manager: Arc<ConnectionManager>, lister: PortLister) -> Self {
        Self { manager, lister }
    }

    /// Underlying manager
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Execute a request
    pub async fn handle(&self, request: ApiRequest) -> Result<Value, TransportError> {
        let reply = match request {
            ApiRequest::ListPorts => serde_json::to_value((self.lister)()?),
            ApiRequest::Connect { path } => {
                let info = self.manager.connect(&path).await?;
                serde_json::to_value(ConnectReply {
                    ok: true,
                    path: info.path,
                    connection_id: info.connection_id,
                })
            }
            ApiRequest::Disconnect => {
                let closed = self.manager.disconnect().await;
                serde_json::to_value(DisconnectReply {
                    ok: true,
                    path: closed.as_ref().map(|info| info.path.clone()),
                    connection_id: closed.map(|info| info.connection_id),
                })
            }
            ApiRequest::WriteAndCapture(capture) => {
                let result = self.manager.write_and_capture(&capture).await?;
                serde_json::to_value(CaptureReply { ok: true, result })
            }
        };

        // plain data structs always serialize
        Ok(reply.unwrap_or(Value::Null))
    }

    /// Execute a parsed call and render the JSON reply
    pub async fn dispatch(&self, call: ApiCall) -> Value {
        debug!(request = ?call.request, "api request");
        match self.handle(call.request).await {
            Ok(reply) => with_id(reply, call.id),
            Err(e) => error_reply(call.id, e.kind(), &e.to_string()),
        }
    }

    /// Execute one JSON request line and render the JSON reply
    pub async fn handle_line(&self, line: &str) -> Value {
        match ApiCall::parse(line) {
            Ok(call) => self.dispatch(call).await,
            Err(reply) => reply,
        }
    }

    /// Serve JSON request lines from `input` until it ends.
    ///
    /// `connect` and `disconnect` run to completion in arrival order before
    /// the next line is read; other requests run concurrently. Returns once
    /// every reply has been queued on `replies`.
    pub async fn serve<R>(&self, input: R, replies: mpsc::Sender<Value>) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut inflight = JoinSet::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let call = match ApiCall::parse(&line) {
                Ok(call) => call,
                Err(reply) => {
                    let _ = replies.send(reply).await;
                    continue;
                }
            };

            if call.request.is_lifecycle() {
                let reply = self.dispatch(call).await;
                let _ = replies.send(reply).await;
            } else {
                let api = self.clone();
                let reply_tx = replies.clone();
                inflight.spawn(async move {
                    let reply = api.dispatch(call).await;
                    let _ = reply_tx.send(reply).await;
                });
            }

            while inflight.try_join_next().is_some() {}
        }

        while inflight.join_next().await.is_some() {}
        Ok(())
    }
}

/// Render an event notification
pub fn event_message(event: &SerialEvent) -> Value {
    serde_json::to_value(event).unwrap_or(Value::Null)
}

fn with_id(reply: Value, id: Option<Value>) -> Value {
    match (reply, id) {
        (Value::Object(mut map), Some(id)) => {
            map.insert("id".to_string(), id);
            Value::Object(map)
        }
        (Value::Array(items), Some(id)) => json!({ "id": id, "ok": true, "ports": items }),
        (Value::Array(items), None) => json!({ "ok": true, "ports": items }),
        (reply, _) => reply,
    }
}

fn error_reply(id: Option<Value>, kind: &str, message: &str) -> Value {
    let mut reply = json!({ "ok": false, "error": kind, "message": message });
    if let (Some(id), Value::Object(map)) = (id, &mut reply) {
        map.insert("id".to_string(), id);
    }
    reply
}
