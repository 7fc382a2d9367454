use std::{
    fmt::Debug,
    io::{self, Read, Write},
    time::Duration,
};

use serialport::SerialPort;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, trace, warn};

use crate::serial::{error::SerialError, DeviceLink};

/// The baud rate used when none is configured.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Builder for a [`SerialLink`].
#[derive(Debug, Default)]
pub struct SerialPortBuilder {
    baud: Option<u32>,
    flow_control: Option<serialport::FlowControl>,
    path: String,
}

impl SerialPortBuilder {
    /// Start a new builder.
    /// The tty should likely be along the lines of `/tty/ACMx` on unix, and `COMx` on Windows.
    pub fn new(tty: &str) -> Self {
        Self {
            path: tty.to_string(),
            ..Default::default()
        }
    }

    /// Set the serial port builder's baud.
    /// Will use [`DEFAULT_BAUD`] if not set.
    pub fn set_baud(mut self, baud: u32) -> Self {
        self.baud = Some(baud);
        self
    }

    /// Set the flow control.
    /// Will use no flow control if not set.
    pub fn set_flow_control(mut self, flow_control: serialport::FlowControl) -> Self {
        self.flow_control = Some(flow_control);
        self
    }

    /// Open the port.
    pub fn open(self) -> Result<SerialLink, SerialError> {
        let baud = self.baud.unwrap_or(DEFAULT_BAUD);
        let flow_control = self.flow_control.unwrap_or(serialport::FlowControl::None);

        info!(path = %self.path, %baud, ?flow_control, "Opening serial port");

        let port = serialport::new(&self.path, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(flow_control)
            // Only bounds writes and reads of bytes already known to be available.
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(SerialLink {
            path: self.path,
            port: Some(port),
        })
    }
}

/// A [`DeviceLink`] backed by an actual serial port.
pub struct SerialLink {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("path", &self.path)
            .field("open", &self.port.is_some())
            .finish()
    }
}

// Port I/O blocks for up to the port timeout.
// On a multi-threaded runtime the worker is handed off while that happens.
// A current-thread runtime has no other worker, so the call is made in place.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

impl DeviceLink for SerialLink {
    fn push(&mut self, message: &str) -> Result<(), SerialError> {
        let Some(port) = self.port.as_mut() else {
            warn!(path = %self.path, "Port not connected, dropping write");
            return Ok(());
        };

        trace!(path = %self.path, "Writing `{}`", message.trim_end());

        blocking(|| {
            port.write_all(message.as_bytes())?;
            port.flush()
        })?;

        Ok(())
    }

    fn pull(&mut self) -> Result<Vec<u8>, SerialError> {
        let Some(port) = self.port.as_mut() else {
            warn!(path = %self.path, "Port not connected, nothing to read");
            return Ok(Vec::new());
        };

        let available = port.bytes_to_read()? as usize;
        if available == 0 {
            return Ok(Vec::new());
        }

        let mut buffer = vec![0; available];
        let read = match blocking(|| port.read(&mut buffer)) {
            Ok(0) => return Err(SerialError::Disconnected),
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(e.into()),
        };
        buffer.truncate(read);

        trace!(path = %self.path, "Read {read} byte(s)");

        Ok(buffer)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(path = %self.path, "Serial port closed");
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}
