use std::io;

use clap::Parser;
use color_eyre::Result;
use mesh_bridge::{cli, config::Config, locator::Strategy, logging, server::Server};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

async fn interrupted() -> io::Result<()> {
    #[cfg(unix)]
    {
        let mut hangup = signal(SignalKind::hangup())?;
        let mut terminate = signal(SignalKind::terminate())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Ctrl-C, quitting");
            }
            _ = hangup.recv() => info!("Told to hang up, quitting"),
            _ = terminate.recv() => info!("Terminated, quitting"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Ctrl-C, quitting");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    if let Some(command) = cli.command {
        return cli::handle_command(command).await;
    }

    let mut config = if let Some(config_path) = &cli.config {
        Config::new_from_path(config_path)?
    } else {
        Config::default()
    };

    if let Some(port) = cli.port {
        config.device.strategy = Strategy::Port(port);
    }

    logging::init(
        cli.log_level,
        config.log_dir.clone().map(|dir| (cli.log_level, dir)),
    )
    .await;
    debug!(config_path = ?cli.config, ?config, "Configured");

    let server = match Server::connect(&config).await {
        Ok(server) => server,
        Err(e) => {
            error!(%e, "Could not start the bridge");
            info!("Check that the device is plugged in, and that no other program has its port open");
            return Err(e.into());
        }
    };

    let mut events = server.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{event}"),
                Err(RecvError::Lagged(skipped)) => warn!(%skipped, "Output too fast, skipped some"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match interrupted().await {
            Ok(()) => {
                shutdown.trigger().await;
            }
            Err(e) => error!(?e, "Could not listen for signals"),
        }
    });

    server.run().await?;

    Ok(())
}
