//! Session management for the single serial connection
//!
//! The [`ConnectionManager`] owns one session slot. Connecting always closes the
//! previous session first, and every connect attempt consumes a fresh
//! [`ConnectionId`] so results and events from superseded sessions are
//! recognizable.

use super::events::{EventRelay, SerialEvent};
use super::transport::{
    NativeSerialBackend, SerialBackend, SerialConfig, SerialIo, TransportError,
};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Grace period between a successful open and the settle check
pub const SETTLE_GRACE: Duration = Duration::from_millis(150);

const READ_BUFFER_SIZE: usize = 4096;
const DATA_CHANNEL_CAPACITY: usize = 1024;

/// Generation counter for connect attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Port path
    pub path: String,
    /// Connection id assigned at connect time
    pub connection_id: ConnectionId,
}

/// Connection manager state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session
    Idle,
    /// Open in progress or waiting for the settle check
    Opening,
    /// Session open and settled
    Open,
    /// Close handshake in progress
    Closing,
}

/// One open serial connection
///
/// A background task reads the device and feeds both the per-session data
/// channel (capture listeners) and the [`EventRelay`].
pub struct Session {
    info: SessionInfo,
    writer: tokio::sync::Mutex<Option<WriteHalf<Box<dyn SerialIo>>>>,
    data_tx: broadcast::Sender<Bytes>,
    open: Arc<AtomicBool>,
    settled: AtomicBool,
    relay: EventRelay,
    reader: JoinHandle<()>,
}

impl Session {
    fn start(info: SessionInfo, io: Box<dyn SerialIo>, relay: EventRelay) -> Self {
        let (reader, writer) = tokio::io::split(io);
        let (data_tx, _) = broadcast::channel(DATA_CHANNEL_CAPACITY);
        let open = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(read_loop(
            reader,
            info.clone(),
            data_tx.clone(),
            relay.clone(),
            open.clone(),
        ));

        Self {
            info,
            writer: tokio::sync::Mutex::new(Some(writer)),
            data_tx,
            open,
            settled: AtomicBool::new(false),
            relay,
            reader: task,
        }
    }

    /// Session identity
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Connection id
    pub fn connection_id(&self) -> ConnectionId {
        self.info.connection_id
    }

    /// Is the underlying stream still open?
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }

    /// Subscribe to bytes read from now on; dropping the receiver unsubscribes
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.data_tx.subscribe()
    }

    /// Write and flush `data`
    pub async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;

        writer.write_all(data).await.map_err(TransportError::WriteFailed)?;
        writer.flush().await.map_err(TransportError::DrainFailed)?;
        Ok(())
    }

    /// Close the stream. Close-time errors are logged and swallowed.
    async fn close(&self) {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        self.reader.abort();

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!(connection = %self.info.connection_id, "ignoring close error: {}", e);
            }
        }

        if was_open {
            self.relay.emit(SerialEvent::closed(&self.info));
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    mut reader: ReadHalf<Box<dyn SerialIo>>,
    info: SessionInfo,
    data_tx: broadcast::Sender<Bytes>,
    relay: EventRelay,
    open: Arc<AtomicBool>,
) {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => {
                debug!(connection = %info.connection_id, "end of stream on {}", info.path);
                break;
            }
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buffer[..n]);
                relay.emit(SerialEvent::data(&info, chunk.clone()));
                let _ = data_tx.send(chunk);
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(connection = %info.connection_id, "read error on {}: {}", info.path, e);
                relay.emit(SerialEvent::error(&info, e.to_string()));
                break;
            }
        }
    }

    if open.swap(false, Ordering::SeqCst) {
        relay.emit(SerialEvent::closed(&info));
    }
}

/// Owner of the single session slot
pub struct ConnectionManager {
    backend: Arc<dyn SerialBackend>,
    relay: EventRelay,
    slot: Mutex<Option<Arc<Session>>>,
    lifecycle: tokio::sync::Mutex<()>,
    phase: Mutex<ConnectionState>,
    last_id: AtomicU64,
}

impl ConnectionManager {
    /// Create a manager that opens devices through `backend`
    pub fn new(backend: Arc<dyn SerialBackend>, relay: EventRelay) -> Self {
        Self {
            backend,
            relay,
            slot: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            phase: Mutex::new(ConnectionState::Idle),
            last_id: AtomicU64::new(0),
        }
    }

    /// Create a manager for real serial ports
    pub fn native() -> Self {
        Self::new(Arc::new(NativeSerialBackend), EventRelay::new())
    }

    /// Event relay fed by every session of this manager
    pub fn relay(&self) -> &EventRelay {
        &self.relay
    }

    /// Subscribe to port events
    pub fn subscribe(&self) -> broadcast::Receiver<SerialEvent> {
        self.relay.subscribe()
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        let phase = *self.phase.lock();
        if phase != ConnectionState::Idle {
            return phase;
        }

        match self.slot.lock().as_ref() {
            Some(session) if session.is_open() && session.is_settled() => ConnectionState::Open,
            Some(session) if session.is_open() => ConnectionState::Opening,
            _ => ConnectionState::Idle,
        }
    }

    /// Identity of the session in the slot, if any
    pub fn current(&self) -> Option<SessionInfo> {
        self.slot.lock().as_ref().map(|s| s.info().clone())
    }

    /// The open session, for one operation's use
    pub(crate) fn open_session(&self) -> Result<Arc<Session>, TransportError> {
        self.slot
            .lock()
            .as_ref()
            .filter(|s| s.is_open())
            .cloned()
            .ok_or(TransportError::NotConnected)
    }

    /// Open `path`, replacing any existing session
    pub async fn connect(&self, path: &str) -> Result<SessionInfo, TransportError> {
        if path.is_empty() {
            return Err(TransportError::InvalidArgument(
                "select a port before connecting".to_string(),
            ));
        }

        let session = {
            let _guard = self.lifecycle.lock().await;
            self.disconnect_locked().await;

            let connection_id = ConnectionId(self.last_id.fetch_add(1, Ordering::SeqCst) + 1);
            let info = SessionInfo {
                path: path.to_string(),
                connection_id,
            };
            *self.phase.lock() = ConnectionState::Opening;

            info!(connection = %connection_id, "connecting to {}", path);
            let config = SerialConfig::new(path);
            let io = match self.backend.open(&config).await {
                Ok(io) => io,
                Err(source) => {
                    *self.phase.lock() = ConnectionState::Idle;
                    warn!(connection = %connection_id, "open failed for {}: {}", path, source);
                    return Err(TransportError::OpenFailed {
                        path: path.to_string(),
                        source,
                    });
                }
            };

            let session = Arc::new(Session::start(info, io, self.relay.clone()));
            *self.slot.lock() = Some(session.clone());
            *self.phase.lock() = ConnectionState::Idle;
            session
        };

        tokio::time::sleep(SETTLE_GRACE).await;

        let connection_id = session.connection_id();
        let settled = self
            .slot
            .lock()
            .as_ref()
            .is_some_and(|current| current.connection_id() == connection_id && current.is_open());

        if !settled {
            let ours = {
                let mut slot = self.slot.lock();
                if slot.as_ref().is_some_and(|s| s.connection_id() == connection_id) {
                    slot.take()
                } else {
                    None
                }
            };
            if let Some(ours) = ours {
                ours.close().await;
            }
            warn!(connection = %connection_id, "{} closed during the settle period", path);
            return Err(TransportError::ImmediateClose {
                path: path.to_string(),
            });
        }

        session.settled.store(true, Ordering::SeqCst);
        info!(connection = %connection_id, "connected to {}", path);
        Ok(session.info().clone())
    }

    /// Close the current session, if any, and return its identity
    pub async fn disconnect(&self) -> Option<SessionInfo> {
        let _guard = self.lifecycle.lock().await;
        self.disconnect_locked().await
    }

    /// Close everything on teardown
    pub async fn shutdown(&self) {
        if let Some(info) = self.disconnect().await {
            debug!(connection = %info.connection_id, "closed on shutdown");
        }
    }

    async fn disconnect_locked(&self) -> Option<SessionInfo> {
        let session = self.slot.lock().take()?;

        *self.phase.lock() = ConnectionState::Closing;
        session.close().await;
        *self.phase.lock() = ConnectionState::Idle;

        info!(connection = %session.connection_id(), "disconnected from {}", session.info().path);
        Some(session.info().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::MockSerialBackend;

    fn manager(backend: MockSerialBackend) -> ConnectionManager {
        ConnectionManager::new(Arc::new(backend), EventRelay::new())
    }

    /// A device that stays open as long as the returned peer lives
    fn live_device() -> (Box<dyn SerialIo>, tokio::io::DuplexStream) {
        let (ours, peer) = tokio::io::duplex(256);
        (Box::new(ours), peer)
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_path() {
        let mgr = manager(MockSerialBackend::new());
        let err = mgr.connect("").await.unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
        assert_eq!(mgr.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_open_failure_is_surfaced() {
        let mut backend = MockSerialBackend::new();
        backend.expect_open().times(1).returning(|_| {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such device"))
        });
        let mgr = manager(backend);

        let err = mgr.connect("/dev/cu.missing").await.unwrap_err();
        assert!(matches!(err, TransportError::OpenFailed { ref path, .. } if path == "/dev/cu.missing"));
        assert!(mgr.current().is_none());
        assert_eq!(mgr.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_failed_attempt_consumes_an_id() {
        let (io, _peer) = live_device();
        let mut pending = Some(io);
        let mut attempts = 0;
        let mut backend = MockSerialBackend::new();
        backend.expect_open().times(2).returning(move |_| {
            attempts += 1;
            if attempts == 1 {
                return Err(std::io::ErrorKind::PermissionDenied.into());
            }
            pending.take().ok_or_else(|| std::io::ErrorKind::Other.into())
        });
        let mgr = manager(backend);

        assert_eq!(mgr.connect("COM3").await.unwrap_err().kind(), "OpenFailed");
        let info = mgr.connect("COM3").await.unwrap();
        assert_eq!(info.connection_id, ConnectionId(2));
    }

    #[tokio::test]
    async fn test_connect_then_disconnect() {
        let (io, _peer) = live_device();
        let mut pending = Some(io);
        let mut backend = MockSerialBackend::new();
        backend
            .expect_open()
            .withf(|config| config.port == "COM3" && config.baud_rate == 9600)
            .returning(move |_| pending.take().ok_or_else(|| std::io::ErrorKind::Other.into()));
        let mgr = manager(backend);
        let mut events = mgr.subscribe();

        let info = mgr.connect("COM3").await.unwrap();
        assert_eq!(mgr.state(), ConnectionState::Open);
        assert_eq!(mgr.current(), Some(info.clone()));

        assert_eq!(mgr.disconnect().await, Some(info.clone()));
        assert_eq!(mgr.state(), ConnectionState::Idle);
        assert!(matches!(
            events.recv().await.unwrap(),
            SerialEvent::Closed { connection_id, .. } if connection_id == info.connection_id
        ));
    }

    #[tokio::test]
    async fn test_disconnect_without_session() {
        let mgr = manager(MockSerialBackend::new());
        assert_eq!(mgr.disconnect().await, None);
        assert_eq!(mgr.disconnect().await, None);
    }

    #[tokio::test]
    async fn test_immediate_close_is_detected() {
        let mut backend = MockSerialBackend::new();
        backend.expect_open().returning(|_| {
            let (ours, peer) = tokio::io::duplex(64);
            drop(peer);
            Ok(Box::new(ours) as Box<dyn SerialIo>)
        });
        let mgr = manager(backend);

        let err = mgr.connect("/dev/tty.BS1C").await.unwrap_err();
        assert_eq!(err.kind(), "ImmediateClose");
        assert!(err.to_string().contains("/dev/cu.BS1C"));
        assert!(mgr.current().is_none());
        assert_eq!(mgr.disconnect().await, None);
    }

    #[tokio::test]
    async fn test_shutdown_closes_session() {
        let (io, _peer) = live_device();
        let mut pending = Some(io);
        let mut backend = MockSerialBackend::new();
        backend
            .expect_open()
            .returning(move |_| pending.take().ok_or_else(|| std::io::ErrorKind::Other.into()));
        let mgr = manager(backend);

        mgr.connect("COM9").await.unwrap();
        mgr.shutdown().await;
        assert!(mgr.current().is_none());
        assert!(matches!(mgr.open_session(), Err(TransportError::NotConnected)));
    }
}
