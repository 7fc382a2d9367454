use std::io;

use thiserror::Error;

use crate::serial::error::SerialError;

/// Errors thay may occur in this library.
#[derive(Debug, Error)]
pub enum Error {
    /// No attached device satisfied the identification strategy.
    #[error("No suitable device found: {0}")]
    DeviceNotFound(String),

    /// The configuration is not usable.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// A serial port problem, either while opening or during a session.
    #[error("Serial problem: {0}")]
    Serial(#[from] SerialError),

    /// Socket or filesystem problems.
    #[error("IO problem: {0}")]
    Io(#[from] io::Error),

    /// A task died unexpectedly.
    #[error("Internal issue: {0}")]
    InternalIssue(String),
}

impl Error {
    /// If the error is a bad configuration, get the inner problem description.
    pub fn try_into_bad_config(self) -> Option<String> {
        if let Self::BadConfig(problem) = self {
            Some(problem)
        } else {
            None
        }
    }

    /// If the error is a failed identification, get the inner reason.
    pub fn try_into_device_not_found(self) -> Option<String> {
        if let Self::DeviceNotFound(reason) = self {
            Some(reason)
        } else {
            None
        }
    }
}
