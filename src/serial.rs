use crate::serial::error::SerialError;

/// Serial port related errors.
pub mod error;

/// The serial port structure.
pub mod serial_port;

/// The single connection to the attached device.
///
/// Exactly one task owns an implementor of this trait at a time: the relay.
/// That is what keeps device access race-free, so implementors are not expected to
/// be shareable between tasks.
pub trait DeviceLink: Send {
    /// Write the message as-is.
    /// No framing is added, callers supply any line endings they need.
    ///
    /// Writing to a closed link is logged and otherwise ignored.
    fn push(&mut self, message: &str) -> Result<(), SerialError>;

    /// Get whatever bytes the device has sent since the last pull.
    ///
    /// Never waits for data: nothing buffered gives an empty vector.
    /// The chunk may hold zero, one, or several newline separated records,
    /// and the last record may be incomplete. Framing is up to the caller,
    /// see [`crate::codec::LinesCodec`].
    fn pull(&mut self) -> Result<Vec<u8>, SerialError>;

    /// Release the connection. Closing a closed link does nothing.
    fn close(&mut self);
}
