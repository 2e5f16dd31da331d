use serde::{Deserialize, Serialize};
use tokio_serial::{SerialPortBuilderExt, SerialPortInfo, SerialPortType, SerialStream};
use tracing::{debug, info, trace};

use crate::{
    config::{DeviceFilter, LineSettings},
    serial::error::SerialPortError,
};

/// Builder for an opened [`SerialStream`].
#[derive(Debug, Default)]
pub(crate) struct SerialPortBuilder {
    path: String,
    line: LineSettings,
}

impl SerialPortBuilder {
    /// Start a new builder.
    /// The tty should likely be along the lines of `/tty/ACMx` on unix, and `COMx` on Windows.
    pub(crate) fn new(tty: &str) -> Self {
        Self {
            path: tty.to_string(),
            ..Default::default()
        }
    }

    /// Set the [`LineSettings`] to use.
    /// Will use the defaults (115200 8N1, no flow control) if not set.
    pub(crate) fn set_line_settings(mut self, line: LineSettings) -> Self {
        self.line = line;
        self
    }

    pub(crate) fn build(self) -> Result<SerialStream, SerialPortError> {
        let LineSettings {
            baud,
            data_bits,
            stop_bits,
            parity,
            flow_control,
        } = self.line;

        info!(%self.path, %baud, ?flow_control, "Opening serial port");

        let serial_stream = tokio_serial::new(&self.path, baud)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(flow_control)
            .open_native_async()?;

        Ok(serial_stream)
    }
}

/// A serial port which passed the device filters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortCandidate {
    /// Path to the port.
    /// Likely "/dev/ttyACMx" or "COMx".
    pub path: String,

    /// USB vendor id.
    pub vendor_id: u16,

    /// USB product id.
    pub product_id: u16,

    /// USB product name, if the device reports one.
    pub product: Option<String>,
}

fn candidate(info: SerialPortInfo, filters: &[DeviceFilter]) -> Option<PortCandidate> {
    let SerialPortType::UsbPort(usb) = info.port_type else {
        trace!(port = %info.port_name, "Not a USB port");
        return None;
    };

    if !filters
        .iter()
        .any(|filter| filter.matches(usb.vid, usb.pid))
    {
        trace!(port = %info.port_name, vid = usb.vid, pid = usb.pid, "Filtered out");
        return None;
    }

    Some(PortCandidate {
        path: info.port_name,
        vendor_id: usb.vid,
        product_id: usb.pid,
        product: usb.product,
    })
}

/// Enumerate serial ports, keeping USB ports matching any of the filters.
pub(crate) fn matching_ports(filters: &[DeviceFilter]) -> Result<Vec<PortCandidate>, SerialPortError> {
    let ports = tokio_serial::available_ports()?;
    debug!("Found {} serial port(s)", ports.len());

    Ok(ports
        .into_iter()
        .filter_map(|info| candidate(info, filters))
        .collect())
}

/// Whether the port at `path` is still enumerated by the system.
///
/// An unplugged device does not necessarily make pending reads fail, so this is polled.
pub(crate) fn is_port_present(path: &str) -> bool {
    match tokio_serial::available_ports() {
        Ok(ports) => ports.iter().any(|port| port.port_name == path),
        // Can't tell, so don't claim it's gone.
        Err(_) => true,
    }
}
