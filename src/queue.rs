//! The queue commands wait in before the relay puts them on the wire.
//!
//! Any number of client readers enqueue, only the relay dequeues.

use tokio::sync::mpsc;

/// Create the command queue.
///
/// Meant to be called once, by whoever wires the bridge together.
pub fn command_queue() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();

    (CommandSender(tx), CommandReceiver(rx))
}

/// The producing end. Cheap to clone, one per client reader.
#[derive(Debug, Clone)]
pub struct CommandSender(mpsc::UnboundedSender<String>);

/// The relay is gone, so the command could not be queued.
#[derive(Debug, PartialEq, Eq)]
pub struct QueueClosed(pub String);

impl CommandSender {
    /// Put a command at the back of the queue.
    /// Ownership passes to the queue; the command is handed back if the relay is gone.
    pub fn enqueue(&self, command: String) -> Result<(), QueueClosed> {
        self.0.send(command).map_err(|e| QueueClosed(e.0))
    }
}

/// The consuming end, owned by the relay.
#[derive(Debug)]
pub struct CommandReceiver(mpsc::UnboundedReceiver<String>);

impl CommandReceiver {
    /// Take the oldest command, if there is one. Never waits.
    pub fn try_dequeue(&mut self) -> Option<String> {
        self.0.try_recv().ok()
    }
}
