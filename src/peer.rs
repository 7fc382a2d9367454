use std::net::SocketAddr;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::{
    codec::LinesCodec,
    queue::CommandSender,
    shutdown::{Shutdown, EXIT_COMMAND},
};

/// Reads commands from one connected client until it leaves or shutdown begins.
///
/// Commands are newline separated, and may arrive split over several reads.
/// When the client closes the connection, anything after the last newline is the final command.
/// Every non-empty command is queued, except [`EXIT_COMMAND`] which shuts the bridge down.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    commands: CommandSender,
    shutdown: Shutdown,
) {
    info!("Client connected");
    let mut reader = FramedRead::new(stream, LinesCodec::new());

    loop {
        let line = tokio::select! {
            line = reader.next() => line,
            _ = shutdown.signalled() => {
                debug!("Shutdown, dropping connection");
                break;
            }
        };

        let line = match line {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                warn!(?e, "Connection problem");
                break;
            }
            None => {
                debug!("Client closed the connection");
                break;
            }
        };

        let command = line.trim();
        if command.is_empty() {
            continue;
        }

        if command == EXIT_COMMAND {
            info!("Client {addr} asked us to exit");
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                shutdown.trigger().await;
            });
            return;
        }

        debug!(%command, "Queueing");
        if let Err(e) = commands.enqueue(command.to_owned()) {
            warn!(command = %e.0, "Relay is gone, command dropped");
            return;
        }
    }

    info!("Client disconnected");
}
