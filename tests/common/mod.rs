//! In-memory serial devices for integration tests

#![allow(dead_code)] // Test utilities may not all be used in every test file

use async_trait::async_trait;
use parking_lot::Mutex;
use spp_capture::{ConnectionManager, EventRelay, SerialBackend, SerialConfig, SerialIo};
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

/// Behaviour of a fake device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// Writes every received byte straight back
    Echo,
    /// Stays open and silent until [`FakeBackend::hang_up`]
    Silent,
    /// Like `Silent`, but hanging up surfaces as a read error
    ResetOnHangUp,
    /// Reports open, then drops the line at once
    DropOnOpen,
    /// Every write fails
    BrokenWriter,
    /// Writes succeed, flushing fails
    StuckDrain,
}

/// Backend serving fake devices by path
#[derive(Default)]
pub struct FakeBackend {
    devices: Mutex<HashMap<String, Device>>,
    peers: Mutex<HashMap<String, DuplexStream>>,
    opened: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(self: &Arc<Self>, path: &str, device: Device) -> Arc<Self> {
        self.devices.lock().insert(path.to_string(), device);
        self.clone()
    }

    /// Paths opened so far, in order
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    /// Drop the device side of a silent or resetting device
    pub fn hang_up(&self, path: &str) {
        self.peers.lock().remove(path);
    }

    pub fn manager(self: &Arc<Self>) -> ConnectionManager {
        ConnectionManager::new(self.clone(), EventRelay::new())
    }
}

#[async_trait]
impl SerialBackend for FakeBackend {
    async fn open(&self, config: &SerialConfig) -> io::Result<Box<dyn SerialIo>> {
        let device = self
            .devices
            .lock()
            .get(&config.port)
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such device"))?;
        self.opened.lock().push(config.port.clone());

        let (ours, peer) = tokio::io::duplex(1024);
        match device {
            Device::Echo => {
                tokio::spawn(async move {
                    let (mut reader, mut writer) = tokio::io::split(peer);
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                });
            }
            Device::Silent => {
                self.peers.lock().insert(config.port.clone(), peer);
            }
            Device::ResetOnHangUp => {
                self.peers.lock().insert(config.port.clone(), peer);
                return Ok(Box::new(ResetOnEof(ours)));
            }
            Device::DropOnOpen => drop(peer),
            Device::BrokenWriter => return Ok(Box::new(Faulty { fail_write: true })),
            Device::StuckDrain => return Ok(Box::new(Faulty { fail_write: false })),
        }

        Ok(Box::new(ours))
    }
}

/// Stream that never yields data and fails on write or flush
struct Faulty {
    fail_write: bool,
}

impl AsyncRead for Faulty {
    fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for Faulty {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.fail_write {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "link lost")))
        } else {
            Poll::Ready(Ok(buf.len()))
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.fail_write {
            Poll::Ready(Ok(()))
        } else {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::TimedOut, "drain timed out")))
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "already broken")))
    }
}

/// Stream that turns end of stream into a connection reset
struct ResetOnEof(DuplexStream);

impl AsyncRead for ResetOnEof {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.0).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() == before && buf.remaining() > 0 => Poll::Ready(Err(
                io::Error::new(io::ErrorKind::ConnectionReset, "device reset"),
            )),
            other => other,
        }
    }
}

impl AsyncWrite for ResetOnEof {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}
