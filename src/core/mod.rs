//! Core module containing the main functionality of SPP Capture
//!
//! This module provides:
//! - Port enumeration with normalized metadata
//! - Hex/text payload codecs
//! - Transport layer (error taxonomy, serial backend)
//! - Connection manager owning the single serial session
//! - Write-then-listen capture cycle
//! - Event relay for data/error/closed notifications
//! - JSON binding of the core operations

pub mod capture;
pub mod codec;
pub mod events;
pub mod external_api;
pub mod ports;
pub mod session;
pub mod transport;
