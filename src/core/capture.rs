//! Write-then-listen capture cycle
//!
//! Sends one payload on the open session and collects every byte the device
//! returns during a fixed listening window. Response content is not inspected.

use super::codec::{decode_hex, decode_text, encode_hex, encode_text};
use super::session::ConnectionManager;
use super::transport::TransportError;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Listening window used when the requested one is missing or invalid
pub const DEFAULT_WINDOW_MS: u64 = 1000;

/// Parameters of one capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureRequest {
    /// Text, or hex digits when `send_as_hex` is set
    pub message: String,
    /// Listening window in milliseconds
    #[serde(deserialize_with = "lenient_millis")]
    pub duration_ms: Option<f64>,
    /// Append CR-LF to text payloads
    #[serde(rename = "appendCRLF")]
    pub append_crlf: bool,
    /// Decode `message` as hex and send the bytes verbatim
    pub send_as_hex: bool,
}

/// Accept numbers and numeric strings; anything else counts as missing
fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(f64::from(u8::from(b))),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }))
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            message: String::new(),
            duration_ms: None,
            append_crlf: true,
            send_as_hex: false,
        }
    }
}

impl CaptureRequest {
    /// Text request
    pub fn text(message: impl Into<String>, duration_ms: u64, append_crlf: bool) -> Self {
        Self {
            message: message.into(),
            duration_ms: Some(duration_ms as f64),
            append_crlf,
            send_as_hex: false,
        }
    }

    /// Hex request
    pub fn hex(digits: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            message: digits.into(),
            duration_ms: Some(duration_ms as f64),
            append_crlf: false,
            send_as_hex: true,
        }
    }

    /// Listening window after coercion.
    ///
    /// Missing, non-finite and zero values fall back to [`DEFAULT_WINDOW_MS`];
    /// negative values clamp to zero.
    pub fn window(&self) -> Duration {
        let ms = match self.duration_ms {
            Some(ms) if ms.is_finite() && ms != 0.0 => ms.max(0.0),
            _ => DEFAULT_WINDOW_MS as f64,
        };
        Duration::from_millis(ms.round() as u64)
    }
}

/// Payload resolved to wire bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapturePayload {
    /// UTF-8 text, terminator included
    Text(String),
    /// Bytes decoded from hex, sent exactly as decoded
    Raw(Vec<u8>),
}

impl CapturePayload {
    /// Resolve a request into bytes; hex mode ignores the CR-LF flag
    pub fn resolve(request: &CaptureRequest) -> Result<Self, TransportError> {
        if request.send_as_hex {
            Ok(Self::Raw(decode_hex(&request.message)?))
        } else {
            Ok(Self::Text(encode_text(&request.message, request.append_crlf)))
        }
    }

    /// Wire bytes
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Raw(bytes) => bytes,
        }
    }
}

/// Outcome of one capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    /// Text sent (empty in hex mode)
    pub sent: String,
    /// Bytes sent, uppercase hex
    pub sent_hex: String,
    /// Received bytes decoded as UTF-8 (lossy)
    pub received: String,
    /// Received bytes, uppercase hex
    pub received_hex: String,
    /// Number of bytes received
    pub received_bytes: usize,
    /// Listening window in milliseconds
    pub duration_ms: u64,
}

impl CaptureResult {
    fn new(payload: &CapturePayload, received: &[u8], window: Duration) -> Self {
        let sent = match payload {
            CapturePayload::Text(text) => text.clone(),
            CapturePayload::Raw(_) => String::new(),
        };

        Self {
            sent,
            sent_hex: encode_hex(payload.as_bytes()),
            received: decode_text(received),
            received_hex: encode_hex(received),
            received_bytes: received.len(),
            duration_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl ConnectionManager {
    /// Write a payload and collect everything received during the window.
    ///
    /// A write or drain failure discards whatever was received so far.
    pub async fn write_and_capture(
        &self,
        request: &CaptureRequest,
    ) -> Result<CaptureResult, TransportError> {
        let session = self.open_session()?;
        let window = request.window();

        let mut listener = session.subscribe();
        let payload = CapturePayload::resolve(request)?;

        debug!(
            connection = %session.connection_id(),
            bytes = payload.as_bytes().len(),
            window_ms = window.as_millis() as u64,
            "capture started"
        );
        session.write(payload.as_bytes()).await?;

        let received = collect_window(&mut listener, window).await;
        drop(listener);

        debug!(connection = %session.connection_id(), bytes = received.len(), "capture finished");
        Ok(CaptureResult::new(&payload, &received, window))
    }
}

/// Accumulate chunks, in arrival order, until `window` elapses
async fn collect_window(listener: &mut broadcast::Receiver<Bytes>, window: Duration) -> BytesMut {
    let deadline = Instant::now() + window;
    let mut received = BytesMut::new();

    loop {
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => break,
            chunk = listener.recv() => match chunk {
                Ok(chunk) => received.extend_from_slice(&chunk),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "capture listener lagged, chunks lost");
                }
                Err(RecvError::Closed) => {
                    tokio::time::sleep_until(deadline).await;
                    break;
                }
            },
        }
    }

    // chunks delivered before the deadline but not yet polled
    while let Ok(chunk) = listener.try_recv() {
        received.extend_from_slice(&chunk);
    }

    received
}
