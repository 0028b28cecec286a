//! # SPP Capture Core Library
//!
//! Talks to one external device over a serial link (typically RS232 carried
//! over Bluetooth SPP):
//! - Port enumeration
//! - Guarded connect/disconnect of a single session
//! - Write-then-listen capture with a fixed window
//! - Text or raw-byte (hex) payloads
//! - Data/error/closed notifications tagged with the connection id
//!
//! ## Example
//!
//! ```rust,no_run
//! use spp_capture::{CaptureRequest, ConnectionManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = ConnectionManager::native();
//!     let session = manager.connect("/dev/cu.BS1C-SPP").await?;
//!     println!("connected as {}", session.connection_id);
//!
//!     let result = manager
//!         .write_and_capture(&CaptureRequest::text("TEST", 200, true))
//!         .await?;
//!     println!("{} bytes: {}", result.received_bytes, result.received_hex);
//!
//!     manager.disconnect().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;
pub mod utils;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::capture::{CapturePayload, CaptureRequest, CaptureResult};
pub use crate::core::codec::{decode_hex, encode_hex, HexError};
pub use crate::core::events::{EventRelay, SerialEvent};
pub use crate::core::external_api::{ApiCall, ApiRequest, ExternalApi};
pub use crate::core::ports::{list_ports, PortDescriptor};
pub use crate::core::session::{
    ConnectionId, ConnectionManager, ConnectionState, Session, SessionInfo, SETTLE_GRACE,
};
pub use crate::core::transport::{
    NativeSerialBackend, SerialBackend, SerialConfig, SerialIo, TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
