//! The relay owns the serial link.
//!
//! Every tick it drains whatever the device has printed, then puts at most one queued
//! command on the wire. Nothing else touches the link.
//!
//! Device output is only translated once a whole line has arrived.
//! An unfinished line waits in the relay until the rest shows up.

use std::{fmt::Display, path::PathBuf, time::Duration};

use bytes::BytesMut;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio_util::codec::Decoder;
use tracing::{debug, error, info, trace, warn};

use crate::{
    codec::LinesCodec,
    error::Error,
    locator::{DeviceIdentity, NodeId},
    queue::CommandReceiver,
    serial::{error::SerialError, DeviceLink},
    shutdown::Shutdown,
    translator::{export_topology, to_payload, Envelope, Payload, Translator, EMPTY_PAYLOAD},
};

/// Asks the bridge for the node id of the attached device. Never reaches the device.
pub const MIRROR_COMMAND: &str = "mirror-mirror";

/// Asks the device for its view of the mesh topology, which is written to file.
pub const CAPTURE_COMMAND: &str = "capture-topology";

/// Where the relay is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Ticking.
    Running,

    /// Shutdown was requested. No new commands are taken.
    Draining,

    /// The link is closed.
    Stopped,
}

/// Things the relay reports to whoever is listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// The device said something. Already translated for display.
    Device(String),

    /// Answer to [`MIRROR_COMMAND`].
    NodeId(Option<NodeId>),

    /// A topology capture was written to this file.
    TopologyExported(PathBuf),

    /// A topology capture was requested, but the device sent nothing usable.
    CaptureFailed,

    /// A command could not be translated. The empty payload was sent instead.
    CommandRejected(String),
}

impl Display for RelayEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayEvent::Device(text) => write!(f, "{text}"),
            RelayEvent::NodeId(Some(node_id)) => write!(f, "Node ID: {node_id}"),
            RelayEvent::NodeId(None) => write!(f, "Node ID: unknown"),
            RelayEvent::TopologyExported(path) => {
                write!(f, "Topology exported to {}", path.display())
            }
            RelayEvent::CaptureFailed => write!(f, "No topology found in capture"),
            RelayEvent::CommandRejected(command) => write!(f, "Rejected command: {command}"),
        }
    }
}

/// See the module docs.
#[derive(Debug)]
pub struct Relay<L> {
    link: L,
    inbound: BytesMut,
    lines: LinesCodec,
    identity: DeviceIdentity,
    commands: CommandReceiver,
    translator: Translator,
    poll_interval: Duration,
    capture_settle: Duration,
    state: watch::Sender<RelayState>,
    events: broadcast::Sender<RelayEvent>,
}

impl<L: DeviceLink> Relay<L> {
    /// A relay on an open link, taking commands from the given queue.
    pub fn new(
        link: L,
        identity: DeviceIdentity,
        commands: CommandReceiver,
        translator: Translator,
    ) -> Self {
        let (state, _) = watch::channel(RelayState::Running);
        let (events, _) = broadcast::channel(1024);

        Self {
            link,
            inbound: BytesMut::new(),
            lines: LinesCodec::new(),
            identity,
            commands,
            translator,
            poll_interval: Duration::from_millis(500),
            capture_settle: Duration::from_millis(500),
            state,
            events,
        }
    }

    /// Time between ticks.
    pub fn set_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// How long a topology dump is given before it is read back.
    pub fn set_capture_settle(mut self, capture_settle: Duration) -> Self {
        self.capture_settle = capture_settle;
        self
    }

    /// Who the relay is talking to.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Observe the relay's lifecycle.
    pub fn state(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    /// Receive what the relay reports from here on.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    /// Run until shutdown is signalled or the link fails.
    ///
    /// The link is closed on the way out either way.
    /// A link failure starts shutdown for everyone else, and is returned.
    pub async fn run(mut self, shutdown: Shutdown) -> Result<(), Error> {
        info!(identity = %self.identity, "Relay running");

        let outcome = self.serve(&shutdown).await;

        self.set_state(RelayState::Draining);
        self.link.close();
        self.set_state(RelayState::Stopped);
        info!("Relay stopped, link closed");

        if let Err(e) = outcome {
            error!(%e, "Serial link failed, shutting down");
            tokio::spawn(async move {
                shutdown.trigger().await;
            });
            return Err(e.into());
        }

        Ok(())
    }

    async fn serve(&mut self, shutdown: &Shutdown) -> Result<(), SerialError> {
        loop {
            if shutdown.is_signalled() {
                break;
            }

            self.tick().await?;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.signalled() => break,
            }
        }

        debug!("Shutdown signalled, draining");
        self.set_state(RelayState::Draining);

        Ok(())
    }

    fn pull_lines(&mut self) -> Result<Vec<String>, SerialError> {
        let chunk = self.link.pull()?;
        self.inbound.extend_from_slice(&chunk);

        let mut lines = vec![];
        while let Some(line) = self.lines.decode(&mut self.inbound)? {
            lines.push(line);
        }

        if !self.inbound.is_empty() {
            trace!(bytes = self.inbound.len(), "Holding unfinished line");
        }

        Ok(lines)
    }

    async fn tick(&mut self) -> Result<(), SerialError> {
        for line in self.pull_lines()? {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            let text = self.translator.from_payload(line);
            self.publish(RelayEvent::Device(text));
        }

        if let Some(command) = self.commands.try_dequeue() {
            self.dispatch(command).await?;
        }

        Ok(())
    }

    async fn dispatch(&mut self, command: String) -> Result<(), SerialError> {
        debug!(%command, "Dispatching");

        match command.trim() {
            MIRROR_COMMAND => {
                info!(node_id = ?self.identity.node_id, "Mirror, mirror");
                self.publish(RelayEvent::NodeId(self.identity.node_id));
            }
            CAPTURE_COMMAND => self.capture_topology().await?,
            command_line => {
                let wire = to_payload(command_line);
                if wire == EMPTY_PAYLOAD {
                    self.publish(RelayEvent::CommandRejected(command_line.to_owned()));
                }
                self.link.push(&format!("{wire}\n"))?;
            }
        }

        Ok(())
    }

    async fn capture_topology(&mut self) -> Result<(), SerialError> {
        let request = Envelope::command(Payload::CaptureTopology).serialize();
        self.link.push(&format!("{request}\n"))?;

        tokio::time::sleep(self.capture_settle).await;

        let capture = self.pull_lines()?;
        debug!(lines = capture.len(), "Capture read back");

        // Devices may log before the dump, so skip anything which isn't JSON.
        let Some(topology) = capture
            .iter()
            .find_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
        else {
            warn!("No topology found in capture");
            self.publish(RelayEvent::CaptureFailed);
            return Ok(());
        };

        let path = self.translator.topology_file().to_owned();
        match export_topology(&path, &topology) {
            Ok(()) => {
                info!(?path, "Topology exported");
                self.publish(RelayEvent::TopologyExported(path));
            }
            Err(e) => {
                error!(?e, ?path, "Could not export topology");
                self.publish(RelayEvent::CaptureFailed);
            }
        }

        Ok(())
    }

    fn set_state(&self, state: RelayState) {
        self.state.send_replace(state);
    }

    fn publish(&self, event: RelayEvent) {
        if self.events.send(event).is_err() {
            trace!("Nobody listening for relay events");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{env, fs};

    use pretty_assertions::assert_eq;
    use tokio::{task::JoinHandle, time::timeout};

    use super::*;
    use crate::{
        locator::Strategy,
        mock::MockLink,
        queue::{command_queue, CommandSender},
    };

    struct Harness {
        device: MockLink,
        commands: CommandSender,
        events: broadcast::Receiver<RelayEvent>,
        state: watch::Receiver<RelayState>,
        shutdown: Shutdown,
        relay: JoinHandle<Result<(), Error>>,
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            strategy: Strategy::AutoDetect,
            serial_number: Some("A1:B2:C3:D4:E5:F6".into()),
            node_id: NodeId::from_serial_number("A1:B2:C3:D4:E5:F6"),
            hardware_index: None,
            port: "/dev/mock".into(),
        }
    }

    fn scratch_file(name: &str) -> PathBuf {
        env::temp_dir().join(format!("mesh-bridge-relay-{}-{name}.json", std::process::id()))
    }

    fn start(topology_file: PathBuf) -> Harness {
        let device = MockLink::new();
        let (commands, receiver) = command_queue();

        let relay = Relay::new(device.clone(), identity(), receiver, Translator::new(topology_file))
            .set_poll_interval(Duration::from_millis(10))
            .set_capture_settle(Duration::from_millis(20));

        let events = relay.subscribe();
        let state = relay.state();
        let shutdown = Shutdown::new(relay.state());
        let relay = tokio::spawn(relay.run(shutdown.clone()));

        Harness {
            device,
            commands,
            events,
            state,
            shutdown,
            relay,
        }
    }

    async fn next_event(events: &mut broadcast::Receiver<RelayEvent>) -> RelayEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("Relay event should arrive")
            .expect("Relay should still be publishing")
    }

    async fn wait_for_writes(device: &MockLink, count: usize) -> Vec<String> {
        for _ in 0..200 {
            let written = device.written();
            if written.len() >= count {
                return written;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Expected {count} write(s), got {:?}", device.written());
    }

    #[tokio::test]
    async fn commands_are_sent_in_order() {
        let h = start(scratch_file("order"));

        h.commands.enqueue("get_topology".into()).unwrap();
        h.commands.enqueue("ping_node 7 0 hi".into()).unwrap();

        let written = wait_for_writes(&h.device, 2).await;

        assert_eq!(
            written,
            vec![
                "{\"payload_type\":\"cmd\",\"payload\":{\"cmd\":\"topology\"}}\n".to_owned(),
                "{\"payload_type\":\"cmd\",\"payload\":{\"cmd\":\"ping\",\"to_node_id\":\"7\",\"HEX\":\"0\",\"msg\":\"hi\"}}\n".to_owned(),
            ]
        );

        h.shutdown.trigger().await;
    }

    #[tokio::test]
    async fn device_output_is_published_line_by_line() {
        let mut h = start(scratch_file("lines"));

        h.device.inject("booting\r\n{\"payload\":{\"ok\":true}}\n\n");

        assert_eq!(
            next_event(&mut h.events).await,
            RelayEvent::Device("booting".into())
        );
        assert_eq!(
            next_event(&mut h.events).await,
            RelayEvent::Device("{\n  \"ok\": true\n}".into())
        );

        h.shutdown.trigger().await;
    }

    #[tokio::test]
    async fn record_split_across_ticks_is_joined() {
        let mut h = start(scratch_file("split"));

        h.device
            .inject("{\"payload_type\":\"cmd\",\"payload\":{\"cmd\":\"topology\",");
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.device.inject("\"response\":{\"nodes\":3}}}\n");

        assert_eq!(
            next_event(&mut h.events).await,
            RelayEvent::Device("{\n  \"nodes\": 3\n}".into())
        );

        h.shutdown.trigger().await;
    }

    #[tokio::test]
    async fn unfinished_line_is_held_back() {
        let mut h = start(scratch_file("held"));

        h.device.inject("done\nhalf a li");
        assert_eq!(
            next_event(&mut h.events).await,
            RelayEvent::Device("done".into())
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.events.try_recv().is_err());

        h.device.inject("ne\n");
        assert_eq!(
            next_event(&mut h.events).await,
            RelayEvent::Device("half a line".into())
        );

        h.shutdown.trigger().await;
    }

    #[tokio::test]
    async fn mirror_never_reaches_device() {
        let mut h = start(scratch_file("mirror"));

        h.commands.enqueue(MIRROR_COMMAND.into()).unwrap();

        assert_eq!(
            next_event(&mut h.events).await,
            RelayEvent::NodeId(Some(NodeId(0xC3D4E5F7)))
        );
        assert!(h.device.written().is_empty());

        h.shutdown.trigger().await;
    }

    #[tokio::test]
    async fn bad_command_sends_empty_payload() {
        let mut h = start(scratch_file("bad"));

        h.commands.enqueue("ping_node 5".into()).unwrap();

        assert_eq!(
            next_event(&mut h.events).await,
            RelayEvent::CommandRejected("ping_node 5".into())
        );
        assert_eq!(wait_for_writes(&h.device, 1).await, vec!["{}\n".to_owned()]);

        h.shutdown.trigger().await;
    }

    #[tokio::test]
    async fn capture_skips_noise() {
        let path = scratch_file("capture");
        let _ = fs::remove_file(&path);

        let mut h = start(path.clone());
        h.device.reply_to(
            "capture-topology",
            "noise\n{\"nodes\":[1,2]}\n{\"ignored\":true}\n",
        );

        h.commands.enqueue(CAPTURE_COMMAND.into()).unwrap();

        assert_eq!(
            next_event(&mut h.events).await,
            RelayEvent::TopologyExported(path.clone())
        );
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "{\n    \"nodes\": [\n        1,\n        2\n    ]\n}\n"
        );

        let written = h.device.written();
        assert_eq!(written.len(), 1);
        assert!(written[0].contains("\"cmd\":\"capture-topology\""));
        assert!(written[0].ends_with('\n'));

        h.shutdown.trigger().await;
        let _ = fs::remove_file(&path);
    }

    #[tokio::test]
    async fn capture_without_json_writes_nothing() {
        let path = scratch_file("capture-nothing");
        let _ = fs::remove_file(&path);

        let mut h = start(path.clone());
        h.device.reply_to("capture-topology", "just logs\n");

        h.commands.enqueue(CAPTURE_COMMAND.into()).unwrap();

        assert_eq!(next_event(&mut h.events).await, RelayEvent::CaptureFailed);
        assert!(!path.exists());

        h.shutdown.trigger().await;
    }

    #[tokio::test]
    async fn shutdown_closes_link() {
        let mut h = start(scratch_file("shutdown"));

        assert!(h.shutdown.trigger().await);

        assert_eq!(*h.state.borrow_and_update(), RelayState::Stopped);
        assert!(h.device.is_closed());
        timeout(Duration::from_secs(1), h.relay)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn link_failure_shuts_everything_down() {
        let h = start(scratch_file("fault"));

        h.device.unplug();

        let result = timeout(Duration::from_secs(2), h.relay)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            result,
            Err(Error::Serial(SerialError::Disconnected))
        ));

        timeout(Duration::from_secs(2), h.shutdown.finished())
            .await
            .expect("Relay should have triggered shutdown");
        assert!(h.device.is_closed());
    }
}
