use std::time::Duration;

use color_eyre::Result;
use mesh_bridge::{
    client::{self, Client},
    error::Error,
    serial::error::SerialError,
};
use pretty_assertions::assert_eq;
use tokio::io::AsyncReadExt;

mod common;
use common::{scratch_file, start, start_with_poll_interval, stopped, written};

#[tokio::test]
async fn exit_shuts_down() -> Result<()> {
    let bridge = start(scratch_file("exit")).await?;

    client::stop(bridge.addr).await?;

    stopped(bridge.server).await??;

    assert!(bridge.device.is_closed());
    assert!(!client::is_available(bridge.addr).await);

    Ok(())
}

#[tokio::test]
async fn exit_interrupts_long_poll_sleep() -> Result<()> {
    let bridge = start_with_poll_interval(scratch_file("long-sleep"), 60_000).await?;

    // Let the relay finish its first tick and go to sleep.
    tokio::time::sleep(Duration::from_millis(100)).await;

    client::stop(bridge.addr).await?;

    tokio::time::timeout(Duration::from_secs(2), bridge.server).await???;

    assert!(bridge.device.is_closed());

    Ok(())
}

#[tokio::test]
async fn commands_before_exit_are_sent() -> Result<()> {
    let bridge = start(scratch_file("before-exit")).await?;

    let mut client = Client::connect(bridge.addr).await?;
    client.send("get_topology").await?;
    written(&bridge.device, 1).await?;
    client.send("exit").await?;

    stopped(bridge.server).await??;

    assert_eq!(bridge.device.written().len(), 1);

    Ok(())
}

#[tokio::test]
async fn other_clients_are_disconnected() -> Result<()> {
    let bridge = start(scratch_file("disconnected")).await?;

    let mut bystander = tokio::net::TcpStream::connect(bridge.addr).await?;
    client::stop(bridge.addr).await?;

    stopped(bridge.server).await??;

    let mut buf = [0; 8];
    let read = tokio::time::timeout(Duration::from_secs(5), bystander.read(&mut buf)).await?;
    assert!(matches!(read, Ok(0) | Err(_)));

    Ok(())
}

#[tokio::test]
async fn repeated_triggers_are_harmless() -> Result<()> {
    let bridge = start(scratch_file("repeated")).await?;

    let (first, second) = tokio::join!(bridge.shutdown.trigger(), bridge.shutdown.trigger());
    assert_eq!(u8::from(first) + u8::from(second), 1);

    stopped(bridge.server).await??;

    Ok(())
}

#[tokio::test]
async fn serial_fault_stops_the_bridge() -> Result<()> {
    let bridge = start(scratch_file("fault")).await?;

    bridge.device.unplug();

    let result = stopped(bridge.server).await?;
    assert!(matches!(
        result,
        Err(Error::Serial(SerialError::Disconnected))
    ));

    assert!(bridge.device.is_closed());
    assert!(!client::is_available(bridge.addr).await);

    Ok(())
}
