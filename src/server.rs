use std::net::SocketAddr;

use tokio::{
    net::TcpListener,
    sync::{broadcast, watch},
};
use tracing::{info, info_span, warn, Instrument};

use crate::{
    config::Config,
    error::Error,
    locator::{self, DeviceIdentity},
    peer,
    queue::{command_queue, CommandSender},
    relay::{Relay, RelayEvent, RelayState},
    serial::{serial_port::SerialLink, DeviceLink},
    shutdown::Shutdown,
    translator::Translator,
};

/// The bridge: a command socket in front of a relay owning the device link.
#[derive(Debug)]
pub struct Server<L> {
    listener: TcpListener,
    relay: Relay<L>,
    commands: CommandSender,
    shutdown: Shutdown,
}

impl Server<SerialLink> {
    /// Find the device the configuration asks for, connect to it, and bind the command socket.
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        config.validate()?;

        let (identity, link) = locator::locate(&config.locate_options()).await?;

        Self::bind(config, identity, link).await
    }
}

impl<L: DeviceLink + 'static> Server<L> {
    /// Bind the command socket in front of an already open link.
    ///
    /// Port zero in the listen address picks any free port, see [`Server::local_addr`].
    pub async fn bind(config: &Config, identity: DeviceIdentity, link: L) -> Result<Self, Error> {
        let (commands, queue) = command_queue();

        let relay = Relay::new(link, identity, queue, Translator::new(&config.topology_file))
            .set_poll_interval(config.poll_interval())
            .set_capture_settle(config.capture_settle());

        let shutdown = Shutdown::new(relay.state());

        let listener = TcpListener::bind(config.listen).await?;
        info!("listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            relay,
            commands,
            shutdown,
        })
    }

    /// Where clients should connect.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// A handle for shutting the server down from elsewhere.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Receive relay events, such as device output.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.relay.subscribe()
    }

    /// Observe the relay's lifecycle.
    pub fn relay_state(&self) -> watch::Receiver<RelayState> {
        self.relay.state()
    }

    /// Serve clients until shutdown has finished.
    ///
    /// Returns the relay's error if the device link failed.
    pub async fn run(self) -> Result<(), Error> {
        let Self {
            listener,
            relay,
            commands,
            shutdown,
        } = self;

        let span = info_span!("relay", port = %relay.identity().port);
        let relay = tokio::spawn(relay.run(shutdown.clone()).instrument(span));

        accept_clients(listener, commands, shutdown.clone()).await;

        shutdown.finished().await;
        info!("Server closed");

        relay
            .await
            .map_err(|e| Error::InternalIssue(format!("Relay task failed: {e}")))?
    }
}

async fn accept_clients(listener: TcpListener, commands: CommandSender, shutdown: Shutdown) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.signalled() => {
                info!("No longer accepting clients");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tokio::spawn(
                        peer::handle_connection(stream, addr, commands.clone(), shutdown.clone())
                            .instrument(info_span!("peer", %addr)),
                    );
                }
                Err(e) => warn!(?e, "Could not accept client"),
            }
        }
    }
}
