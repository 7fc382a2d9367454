//! Talking to a running bridge from the outside.

use std::{net::SocketAddr, time::Duration};

use tokio::{io::AsyncWriteExt, net::TcpStream, time::timeout};
use tracing::debug;

use crate::{error::Error, shutdown::EXIT_COMMAND};

/// How long [`is_available`] waits for the bridge to answer.
pub const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(2);

/// A connection to a bridge, for sending several commands.
#[derive(Debug)]
pub struct Client {
    stream: TcpStream,
}

impl Client {
    /// Connect to the bridge at `addr`.
    pub async fn connect(addr: SocketAddr) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr).await?;
        debug!(%addr, "Connected");

        Ok(Self { stream })
    }

    /// Send one command, newline terminated.
    pub async fn send(&mut self, command: &str) -> Result<(), Error> {
        self.stream
            .write_all(format!("{command}\n").as_bytes())
            .await?;
        self.stream.flush().await?;

        Ok(())
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<(), Error> {
        Ok(self.stream.shutdown().await?)
    }
}

/// Connect, send one command, and disconnect.
pub async fn send(addr: SocketAddr, command: &str) -> Result<(), Error> {
    let mut client = Client::connect(addr).await?;
    client.send(command).await?;
    client.close().await
}

/// Ask the bridge at `addr` to shut down.
pub async fn stop(addr: SocketAddr) -> Result<(), Error> {
    send(addr, EXIT_COMMAND).await
}

/// Whether a bridge accepts connections at `addr`.
pub async fn is_available(addr: SocketAddr) -> bool {
    matches!(
        timeout(AVAILABILITY_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}
