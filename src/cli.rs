use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing::Level;

use crate::{
    client,
    config::{Config, DEFAULT_PORT},
    locator,
    translator::to_payload,
};

fn default_address() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT))
}

/// The command line interface for the mesh bridge.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// Connect to the device on this serial port, regardless of the configured strategy
    #[arg(long)]
    pub port: Option<String>,

    /// Log level for stdout, unless `RUST_LOG` says otherwise
    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),

    /// List serial ports, with the node id of any device on them.
    ListPorts,

    /// Send a message to a running bridge.
    Send {
        /// Where the bridge listens
        #[arg(long, default_value_t = default_address())]
        address: SocketAddr,

        /// The message, for example `get_topology`
        #[arg(required = true)]
        message: Vec<String>,
    },

    /// Ask a running bridge to shut down.
    Stop {
        /// Where the bridge listens
        #[arg(long, default_value_t = default_address())]
        address: SocketAddr,
    },
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show the payload a command is translated to before it is sent to the device.
    Payload {
        /// The command, for example `ping_node 42 #00ff00 hello`
        #[arg(required = true)]
        command: Vec<String>,
    },
}

/// Run a subcommand to completion.
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Examples(Examples::Config) => {
            println!("{}", Config::example().serialize_pretty());
        }
        Commands::Examples(Examples::Payload { command }) => {
            println!("{}", to_payload(&command.join(" ")));
        }
        Commands::ListPorts => {
            for candidate in locator::list_ports()? {
                let serial_number = candidate.serial_number.as_deref().unwrap_or("-");
                match candidate.node_id() {
                    Some(node_id) => println!("{}\t{serial_number}\tnode {node_id}", candidate.port),
                    None => println!("{}\t{serial_number}", candidate.port),
                }
            }
        }
        Commands::Send { address, message } => {
            if !client::is_available(address).await {
                return Err(color_eyre::eyre::eyre!("No bridge available at {address}"));
            }
            client::send(address, &message.join(" ")).await?;
        }
        Commands::Stop { address } => {
            client::stop(address).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn send_joins_words() {
        let cli = Cli::parse_from(["mesh-bridge", "send", "ping_node", "7", "false", "hi"]);

        let Some(Commands::Send { address, message }) = cli.command else {
            panic!("Expected the send subcommand");
        };

        assert_eq!(address, default_address());
        assert_eq!(message.join(" "), "ping_node 7 false hi");
    }

    #[test]
    fn port_override_and_log_level() {
        let cli = Cli::parse_from([
            "mesh-bridge",
            "bridge.ron",
            "--port",
            "/dev/ttyACM0",
            "--log-level",
            "debug",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("bridge.ron")));
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.log_level, Level::DEBUG);
    }
}
