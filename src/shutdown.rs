//! Coordinated teardown.
//!
//! Anything may ask for a shutdown: the Ctrl-C watcher, a client sending [`EXIT_COMMAND`],
//! or the relay after losing the device. The sequence is run once, in order:
//!
//! 1. The signal is set. Client readers and the accept loop observe it and stop.
//! 2. The relay finishes what it is doing, releases the serial port and reports [`RelayState::Stopped`].
//! 3. Teardown is marked finished, which lets the server return.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::relay::RelayState;

/// The message a client sends to shut the bridge down.
pub const EXIT_COMMAND: &str = "exit";

/// A handle to the shutdown coordinator. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    signal: CancellationToken,
    finished: CancellationToken,
    triggered: Arc<AtomicBool>,
    relay_state: watch::Receiver<RelayState>,
}

impl Shutdown {
    /// Coordinate shutdown of the relay reporting on `relay_state`.
    pub fn new(relay_state: watch::Receiver<RelayState>) -> Self {
        Self {
            signal: CancellationToken::new(),
            finished: CancellationToken::new(),
            triggered: Arc::new(AtomicBool::new(false)),
            relay_state,
        }
    }

    /// Whether shutdown has begun.
    pub fn is_signalled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Resolves once shutdown has begun.
    pub async fn signalled(&self) {
        self.signal.cancelled().await
    }

    /// Resolves once the whole teardown sequence has run.
    pub async fn finished(&self) {
        self.finished.cancelled().await
    }

    /// Shut everything down, see the module docs for the order.
    ///
    /// Safe to call any number of times from anywhere.
    /// Every call returns once teardown is finished,
    /// but only one of them performs it; that one gets `true`.
    pub async fn trigger(&self) -> bool {
        if self.triggered.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already in progress");
            self.finished().await;
            return false;
        }

        info!("Shutdown: signalling all tasks");
        self.signal.cancel();

        info!("Shutdown: waiting for relay to stop");
        let mut relay_state = self.relay_state.clone();
        if relay_state
            .wait_for(|state| *state == RelayState::Stopped)
            .await
            .is_err()
        {
            warn!("Relay went away without reporting that it stopped");
        }

        info!("Shutdown: relay stopped, no longer accepting clients");
        self.finished.cancel();

        info!("Shutdown: complete");
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn trigger_waits_for_relay() {
        let (state_tx, state_rx) = watch::channel(RelayState::Running);
        let shutdown = Shutdown::new(state_rx);

        let trigger = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { shutdown.trigger().await }
        });

        timeout(Duration::from_secs(1), shutdown.signalled())
            .await
            .expect("Signal should be set right away");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!trigger.is_finished());

        state_tx.send_replace(RelayState::Stopped);

        assert!(timeout(Duration::from_secs(1), trigger)
            .await
            .unwrap()
            .unwrap());
    }

    #[tokio::test]
    async fn concurrent_triggers_tear_down_once() {
        let (state_tx, state_rx) = watch::channel(RelayState::Running);
        let shutdown = Shutdown::new(state_rx);

        let triggers = (0..2)
            .map(|_| {
                let shutdown = shutdown.clone();
                tokio::spawn(async move { shutdown.trigger().await })
            })
            .collect::<Vec<_>>();

        shutdown.signalled().await;
        state_tx.send_replace(RelayState::Stopped);

        let mut performed = 0;
        for trigger in triggers {
            if timeout(Duration::from_secs(1), trigger).await.unwrap().unwrap() {
                performed += 1;
            }
        }

        assert_eq!(performed, 1);

        // Late callers don't redo anything either.
        assert!(!shutdown.trigger().await);
    }

    #[tokio::test]
    async fn relay_gone_counts_as_stopped() {
        let (state_tx, state_rx) = watch::channel(RelayState::Running);
        let shutdown = Shutdown::new(state_rx);
        drop(state_tx);

        assert!(timeout(Duration::from_secs(1), shutdown.trigger())
            .await
            .unwrap());
    }
}
