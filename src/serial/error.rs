use std::io;

use thiserror::Error;

/// A fault on the serial link.
///
/// Not having any data available is not an error, see [`crate::serial::DeviceLink::pull`].
#[derive(Debug, Error)]
pub enum SerialError {
    /// IO related errors.
    #[error("Underlying IO problem: {0}")]
    IO(#[from] io::Error),

    /// The serial port driver reported a problem.
    #[error("Serial port problem: {0}")]
    Port(#[from] serialport::Error),

    /// Serial port disconnected.
    #[error("Serial port disconnected")]
    Disconnected,
}
