//! Serial port enumeration
//!
//! Lists the serial endpoints the OS currently exposes. Every metadata field is
//! a plain string, empty when the OS layer does not know it.

use crate::core::transport::TransportError;
use serde::{Deserialize, Serialize};
use serialport::{SerialPortInfo, SerialPortType};

const DIAL_IN_PREFIX: &str = "/dev/tty.";
const CALL_UP_PREFIX: &str = "/dev/cu.";

/// One OS-visible serial endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDescriptor {
    /// Device path or name (e.g., COM3, /dev/cu.BS1C-SPP)
    pub path: String,
    /// Manufacturer
    pub manufacturer: String,
    /// Serial number
    pub serial_number: String,
    /// USB vendor id, 4 lowercase hex digits
    pub vendor_id: String,
    /// USB product id, 4 lowercase hex digits
    pub product_id: String,
    /// Display name
    pub friendly_name: String,
    /// Plug-and-play id
    pub pnp_id: String,
}

impl PortDescriptor {
    fn bare(path: String) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }

    /// Is this a dial-in (`/dev/tty.*`) node?
    pub fn is_dial_in(&self) -> bool {
        callout_counterpart(&self.path).is_some()
    }
}

impl From<SerialPortInfo> for PortDescriptor {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                path: info.port_name,
                manufacturer: usb.manufacturer.unwrap_or_default(),
                serial_number: usb.serial_number.unwrap_or_default(),
                vendor_id: format!("{:04x}", usb.vid),
                product_id: format!("{:04x}", usb.pid),
                friendly_name: usb.product.unwrap_or_default(),
                pnp_id: String::new(),
            },
            SerialPortType::BluetoothPort | SerialPortType::PciPort | SerialPortType::Unknown => {
                Self::bare(info.port_name)
            }
        }
    }
}

/// Call-up sibling of a macOS dial-in node (`/dev/tty.X` -> `/dev/cu.X`)
pub fn callout_counterpart(path: &str) -> Option<String> {
    path.strip_prefix(DIAL_IN_PREFIX)
        .filter(|name| !name.is_empty())
        .map(|name| format!("{CALL_UP_PREFIX}{name}"))
}

/// List every call-up (`/dev/cu.*`) node first, each group sorted by path
pub fn prefer_callout(ports: &mut [PortDescriptor]) {
    ports.sort_by(|a, b| {
        let a_cu = a.path.contains(CALL_UP_PREFIX);
        let b_cu = b.path.contains(CALL_UP_PREFIX);
        b_cu.cmp(&a_cu).then_with(|| a.path.cmp(&b.path))
    });
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<PortDescriptor>, TransportError> {
    let ports = serialport::available_ports().map_err(|e| TransportError::ListFailed(e.into()))?;
    let mut ports: Vec<PortDescriptor> = ports.into_iter().map(PortDescriptor::from).collect();
    prefer_callout(&mut ports);
    Ok(ports)
}
