#![deny(missing_docs)]

//! This crate bridges a local TCP command socket to one mesh node attached over serial.
//!
//! At startup the node is located among the serial ports, either by port name,
//! by serial number, by auto-detection or from an allow-list of node ids.
//!
//! Any number of clients may connect and send newline separated commands.
//! Commands are queued, translated into JSON envelopes and written to the node one at a time
//! by the relay, which also reads everything the node prints and publishes it as [`relay::RelayEvent`]s.
//!
//! Some commands never reach the node as written:
//! - `mirror-mirror` reports the node id of the attached node.
//! - `capture-topology` has the node dump its view of the mesh, which is saved to file.
//! - `exit` shuts the bridge down.
//!
//! A [`mock::MockLink`] stands in for the node, which allows testing the bridge without hardware.

/// The ways the mesh messages may be encrypted.
pub mod cipher;

/// The command line interface.
pub mod cli;

/// Newline framing for device output and client input.
pub mod codec;

/// Talking to a running bridge.
pub mod client;

/// Configuration of the bridge.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// Finding the device to connect to.
pub mod locator;

/// Logging setup.
pub mod logging;

/// An in-memory device.
pub mod mock;

/// The queue between clients and the relay.
pub mod queue;

/// The relay between the command queue and the device.
pub mod relay;

/// Serial port communication.
pub mod serial;

/// Setting up the bridge.
pub mod server;

/// Coordinated shutdown.
pub mod shutdown;

/// Commands to payloads, and responses to display text.
pub mod translator;

mod peer;
