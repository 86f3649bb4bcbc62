use bytes::BytesMut;
use log::{debug, trace, warn};
use std::io::Write;
use std::path::Path;
use tokio_serial::{ClearBuffer, FlowControl, SerialPort, SerialPortType};

use super::{read_line_from, LineConfig, PortDescriptor, Transport, TransportError};

/// Serial port opened in raw mode.
///
/// The backend (termios, Win32 or IOKit) is picked by `tokio_serial`
/// at build time; everything above this type only sees [`Transport`].
pub struct SerialTransport {
    device: String,
    port: Option<Box<dyn SerialPort>>,
    pending: BytesMut,
}

impl SerialTransport {
    /// List candidate ports, sorted by device name.
    ///
    /// Enumeration failures are logged and yield an empty list.
    pub fn enumerate() -> Vec<PortDescriptor> {
        let ports = match tokio_serial::available_ports() {
            Ok(ports) => ports,
            Err(err) => {
                warn!("Port enumeration failed: {}", err);
                return Vec::new();
            }
        };

        let mut result: Vec<PortDescriptor> = ports
            .into_iter()
            .map(|info| {
                let (description, manufacturer) = match info.port_type {
                    SerialPortType::UsbPort(usb) => (
                        usb.product.unwrap_or_else(|| short_name(&info.port_name)),
                        usb.manufacturer.unwrap_or_default(),
                    ),
                    SerialPortType::PciPort => ("PCI serial port".to_string(), String::new()),
                    SerialPortType::BluetoothPort => ("Bluetooth serial port".to_string(), String::new()),
                    SerialPortType::Unknown => (short_name(&info.port_name), String::new()),
                };
                PortDescriptor {
                    device: info.port_name,
                    description,
                    manufacturer,
                }
            })
            .collect();

        result.sort_by(|a, b| a.device.cmp(&b.device));
        result
    }

    /// Open and configure `device`. Errors carry the OS reason and are
    /// never retried here.
    pub fn open(device: &str, config: &LineConfig) -> Result<Self, TransportError> {
        let open_err = |source| TransportError::Open {
            device: device.to_string(),
            source,
        };

        #[allow(unused_mut)]
        let mut port = tokio_serial::new(device, config.baud_rate)
            .data_bits(config.data_bits.into())
            .stop_bits(config.stop_bits.into())
            .parity(config.parity.into())
            .flow_control(FlowControl::None)
            .timeout(config.timeout)
            .open_native()
            .map_err(open_err)?;

        #[cfg(unix)]
        port.set_exclusive(false).map_err(open_err)?;

        port.clear(ClearBuffer::All).map_err(open_err)?;

        debug!(
            "Opened {} at {} baud ({:?} data bits, {:?} stop bits, parity {:?})",
            device, config.baud_rate, config.data_bits, config.stop_bits, config.parity
        );

        Ok(Self {
            device: device.to_string(),
            port: Some(Box::new(port)),
            pending: BytesMut::with_capacity(64),
        })
    }
}

fn short_name(device: &str) -> String {
    Path::new(device)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| device.to_string())
}

impl Transport for SerialTransport {
    fn write_byte(&mut self, byte: u8) -> Result<usize, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        let n = port.write(&[byte]).map_err(TransportError::Write)?;
        port.flush().map_err(TransportError::Write)?;
        Ok(n)
    }

    fn read_line(&mut self, terminator: u8, max_bytes: usize) -> Result<String, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        let line = read_line_from(port.as_mut(), &mut self.pending, terminator, max_bytes)?;
        trace!("{}: {:?}", self.device, line);
        Ok(line)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed {}", self.device);
        }
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}
