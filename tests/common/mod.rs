#![allow(dead_code)]

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use color_eyre::Result;
use mesh_bridge::{
    config::Config,
    error::Error,
    locator::{DeviceIdentity, NodeId, Strategy},
    logging,
    mock::MockLink,
    relay::RelayEvent,
    server::Server,
    shutdown::Shutdown,
};
use tokio::{sync::broadcast, task::JoinHandle, time::timeout};
use tracing::{info, Level};

pub const SERIAL_NUMBER: &str = "A1:B2:C3:D4:E5:F6";

pub struct Bridge {
    pub addr: SocketAddr,
    pub device: MockLink,
    pub events: broadcast::Receiver<RelayEvent>,
    pub shutdown: Shutdown,
    pub server: JoinHandle<Result<(), Error>>,
}

pub fn scratch_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "mesh-bridge-it-{}-{name}.json",
        std::process::id()
    ))
}

pub fn identity() -> DeviceIdentity {
    DeviceIdentity {
        strategy: Strategy::SerialNumber(SERIAL_NUMBER.into()),
        serial_number: Some(SERIAL_NUMBER.into()),
        node_id: NodeId::from_serial_number(SERIAL_NUMBER),
        hardware_index: None,
        port: "/dev/mock".into(),
    }
}

/// Start a bridge on any free port, with a mock device attached.
pub async fn start(topology_file: PathBuf) -> Result<Bridge> {
    start_with_poll_interval(topology_file, 10).await
}

/// Like [`start`], but the relay sleeps `poll_interval_ms` between ticks.
pub async fn start_with_poll_interval(topology_file: PathBuf, poll_interval_ms: u64) -> Result<Bridge> {
    logging::init(Level::DEBUG, None).await;

    let config = Config {
        listen: "127.0.0.1:0".parse()?,
        topology_file,
        poll_interval_ms,
        capture_settle_ms: 20,
        ..Default::default()
    };

    let device = MockLink::new();
    let server = Server::bind(&config, identity(), device.clone()).await?;

    let addr = server.local_addr()?;
    let events = server.subscribe();
    let shutdown = server.shutdown_handle();

    info!("Bridge on {addr}");
    let server = tokio::spawn(server.run());

    Ok(Bridge {
        addr,
        device,
        events,
        shutdown,
        server,
    })
}

pub async fn next_event(events: &mut broadcast::Receiver<RelayEvent>) -> Result<RelayEvent> {
    Ok(timeout(Duration::from_secs(5), events.recv()).await??)
}

/// Wait until the device has been written to at least `count` times.
pub async fn written(device: &MockLink, count: usize) -> Result<Vec<String>> {
    timeout(Duration::from_secs(5), async {
        loop {
            let written = device.written();
            if written.len() >= count {
                return written;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| {
        color_eyre::eyre::eyre!(
            "Expected {count} write(s), got {:?}",
            device.written()
        )
    })
}

/// Wait for the server task to return.
pub async fn stopped(server: JoinHandle<Result<(), Error>>) -> Result<Result<(), Error>> {
    Ok(timeout(Duration::from_secs(5), server).await??)
}
