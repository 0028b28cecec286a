//! Serial port transport implementation

use super::{SerialBackend, SerialIo};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tracing::debug;

/// Baud rate handed to the OS layer.
///
/// Over Bluetooth SPP the RS232 speed is configured on the remote device, so
/// this value only satisfies the driver.
pub const NOMINAL_BAUD_RATE: u32 = 9600;

/// Serial port configuration
///
/// Framing is fixed at 8 data bits, 1 stop bit, no parity, no flow control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/cu.BS1C-SPP)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
}

impl SerialConfig {
    /// Create a configuration for `port` with the nominal baud rate
    pub fn new(port: &str) -> Self {
        Self {
            port: port.to_string(),
            baud_rate: NOMINAL_BAUD_RATE,
        }
    }

    /// Human readable summary, e.g. `COM3 @ 9600 baud (8N1)`
    pub fn connection_info(&self) -> String {
        format!("{} @ {} baud (8N1)", self.port, self.baud_rate)
    }
}

/// Opens real devices through tokio-serial
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSerialBackend;

#[async_trait]
impl SerialBackend for NativeSerialBackend {
    async fn open(&self, config: &SerialConfig) -> std::io::Result<Box<dyn SerialIo>> {
        debug!(port = %config.port, "opening {}", config.connection_info());

        let stream = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(std::io::Error::from)?;

        Ok(Box::new(stream))
    }
}
