//! Transport layer for the serial link
//!
//! Provides:
//! - The error taxonomy shared by connect, disconnect and capture
//! - The [`SerialBackend`] seam that opens a byte stream for a port path
//! - The native tokio-serial backend

mod serial;

pub use serial::{NativeSerialBackend, SerialConfig, NOMINAL_BAUD_RATE};

use crate::core::codec::HexError;
use crate::core::ports::callout_counterpart;
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Missing or malformed argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Hex payload failed validation
    #[error("Invalid argument: {0}")]
    InvalidHex(#[from] HexError),

    /// No open session
    #[error("Not connected. Connect to a port first.")]
    NotConnected,

    /// The underlying open call was rejected
    #[error("Failed to open {path}: {source}")]
    OpenFailed {
        /// Port path
        path: String,
        /// Cause reported by the OS layer
        #[source]
        source: std::io::Error,
    },

    /// The port reported open, then dropped within the settle period
    #[error("{}", immediate_close_message(.path))]
    ImmediateClose {
        /// Port path
        path: String,
    },

    /// Writing the payload failed
    #[error("Write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    /// Flushing the payload to the device failed
    #[error("Drain failed: {0}")]
    DrainFailed(#[source] std::io::Error),

    /// The OS port enumeration call failed
    #[error("Failed to list serial ports: {0}")]
    ListFailed(#[source] std::io::Error),
}

impl TransportError {
    /// Stable category name, independent of the message text
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) | Self::InvalidHex(_) => "InvalidArgument",
            Self::NotConnected => "NotConnected",
            Self::OpenFailed { .. } => "OpenFailed",
            Self::ImmediateClose { .. } => "ImmediateClose",
            Self::WriteFailed(_) => "WriteFailed",
            Self::DrainFailed(_) => "DrainFailed",
            Self::ListFailed(_) => "ListFailed",
        }
    }
}

fn immediate_close_message(path: &str) -> String {
    match callout_counterpart(path) {
        Some(callout) => format!(
            "The port opened and closed immediately ({path}). Prefer the call-up node {callout} over the dial-in node."
        ),
        None => format!("The port opened and closed immediately ({path})."),
    }
}

/// Byte stream to a serial device
pub trait SerialIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> SerialIo for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Opens serial devices
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SerialBackend: Send + Sync {
    /// Open the device described by `config`
    async fn open(&self, config: &SerialConfig) -> std::io::Result<Box<dyn SerialIo>>;
}
