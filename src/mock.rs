//! A mock, useful to test relay functionality without an actual device attached.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace, warn};

use crate::serial::{error::SerialError, DeviceLink};

#[derive(Debug, Default)]
struct MockState {
    // What the "device" has emitted but nobody has pulled yet.
    inbound: Vec<u8>,

    // Everything pushed, in order.
    written: Vec<String>,

    // When a write contains the first string, the second is emitted by the device.
    replies: Vec<(String, String)>,

    closed: bool,
    unplugged: bool,
}

/// An in-memory [`DeviceLink`].
///
/// Clones share state, so a test can keep one clone for injecting device output and
/// inspecting writes while the relay owns another.
#[derive(Debug, Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    /// A fresh mock with nothing buffered.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("Mock state should not be poisoned")
    }

    /// Make the device emit some data.
    /// It becomes available on the next pull.
    pub fn inject<B: AsRef<[u8]>>(&self, data: B) {
        self.state().inbound.extend_from_slice(data.as_ref());
    }

    /// Whenever a written message contains `trigger`, have the device emit `reply`.
    pub fn reply_to<S: Into<String>>(&self, trigger: S, reply: S) {
        self.state().replies.push((trigger.into(), reply.into()));
    }

    /// Everything written to the device so far.
    pub fn written(&self) -> Vec<String> {
        self.state().written.clone()
    }

    /// Whether the link has been closed.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Simulate pulling the cable.
    /// Every following push or pull fails.
    pub fn unplug(&self) {
        self.state().unplugged = true;
    }
}

impl DeviceLink for MockLink {
    fn push(&mut self, message: &str) -> Result<(), SerialError> {
        let mut state = self.state();

        if state.unplugged {
            return Err(SerialError::Disconnected);
        }
        if state.closed {
            warn!("Mock closed, dropping write");
            return Ok(());
        }

        trace!("Mock got `{}`", message.trim_end());
        state.written.push(message.to_owned());

        let replies = state
            .replies
            .iter()
            .filter(|(trigger, _)| message.contains(trigger.as_str()))
            .map(|(_, reply)| reply.clone())
            .collect::<Vec<_>>();

        for reply in replies {
            debug!("Mock replying with {} byte(s)", reply.len());
            state.inbound.extend_from_slice(reply.as_bytes());
        }

        Ok(())
    }

    fn pull(&mut self) -> Result<Vec<u8>, SerialError> {
        let mut state = self.state();

        if state.unplugged {
            return Err(SerialError::Disconnected);
        }
        if state.closed {
            return Ok(Vec::new());
        }

        Ok(std::mem::take(&mut state.inbound))
    }

    fn close(&mut self) {
        self.state().closed = true;
    }
}
