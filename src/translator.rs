//! Translation between operator commands and the node's JSON payloads.
//!
//! Outbound, a command line such as `ping_node 87654321 #fafafa Hello there` becomes
//!
//! ```json
//! {"payload_type":"cmd","payload":{"cmd":"ping","to_node_id":"87654321","HEX":"#fafafa","msg":"Hello there"}}
//! ```
//!
//! Inbound, response envelopes are unwrapped into something worth displaying.

use std::{
    fmt::Display,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::{ser::PrettyFormatter, Value};
use tracing::{debug, error, info, warn};

use crate::cipher::{Cipher, Passthrough};

/// What is sent instead of a payload when a command can't be translated.
pub const EMPTY_PAYLOAD: &str = "{}";

/// Commands an operator may issue, as parsed from a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `export_topology`: have the node dump the mesh topology for saving.
    ExportTopology,

    /// `get_topology`: have the node report the mesh topology.
    GetTopology,

    /// `ping_node <node id> <color hex or false> <message...>`
    PingNode {
        /// Which node to ping.
        to_node_id: String,

        /// Color to light up in, like `#ff0000`, or `false`.
        hex: String,

        /// The message body.
        msg: String,
    },

    /// Anything else.
    Unrecognized {
        /// The offending command line.
        line: String,

        /// What was wrong with it.
        problem: String,
    },
}

impl Command {
    /// Parse a command line. Never fails, see [`Command::Unrecognized`].
    pub fn parse(line: &str) -> Self {
        let tokens = line.split_whitespace().collect::<Vec<_>>();

        let unrecognized = |problem: &str| Self::Unrecognized {
            line: line.to_owned(),
            problem: problem.to_owned(),
        };

        let Some(verb) = tokens.first() else {
            return unrecognized("empty command");
        };

        match (verb.to_lowercase().as_str(), &tokens[1..]) {
            ("export_topology", []) => Self::ExportTopology,
            ("export_topology", _) => unrecognized("`export_topology` takes no arguments"),
            ("get_topology", []) => Self::GetTopology,
            ("get_topology", _) => unrecognized("`get_topology` takes no arguments"),
            ("ping_node", [to_node_id, hex, msg @ ..]) if !msg.is_empty() => Self::PingNode {
                to_node_id: to_node_id.to_string(),
                hex: hex.to_string(),
                msg: msg.join(" "),
            },
            ("ping_node", _) => unrecognized("`ping_node` needs a node id, a color and a message"),
            (other, _) => unrecognized(&format!("unknown command `{other}`")),
        }
    }

    /// The wire payload for this command, if it has one.
    pub fn payload(&self) -> Option<Payload> {
        match self {
            Command::ExportTopology => Some(Payload::CaptureTopology),
            Command::GetTopology => Some(Payload::Topology),
            Command::PingNode {
                to_node_id,
                hex,
                msg,
            } => Some(Payload::Ping {
                to_node_id: to_node_id.clone(),
                hex: hex.clone(),
                msg: msg.clone(),
            }),
            Command::Unrecognized { .. } => None,
        }
    }

    /// How to use the known commands.
    pub fn usage() -> &'static str {
        "Usage: `get_topology` | `export_topology` | `ping_node <node id> <color hex OR false> <message>`"
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::ExportTopology => write!(f, "export topology"),
            Command::GetTopology => write!(f, "get topology"),
            Command::PingNode { to_node_id, .. } => write!(f, "ping node {to_node_id}"),
            Command::Unrecognized { line, problem } => write!(f, "`{line}`: {problem}"),
        }
    }
}

/// The `payload` part of a command envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum Payload {
    /// Dump the topology, meant to be saved.
    CaptureTopology,

    /// Report the topology.
    Topology,

    /// Ping a node.
    Ping {
        /// Target node.
        to_node_id: String,

        /// Color hex or `false`.
        #[serde(rename = "HEX")]
        hex: String,

        /// Message body.
        msg: String,
    },
}

/// Which kind of payload an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    /// Commands, and responses to them.
    Cmd,

    /// Messages relayed over the mesh.
    Mesh,
}

/// What goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// See [`PayloadType`].
    pub payload_type: PayloadType,

    /// See [`Payload`].
    pub payload: Payload,
}

impl Envelope {
    /// Wrap a command payload.
    pub fn command(payload: Payload) -> Self {
        Self {
            payload_type: PayloadType::Cmd,
            payload,
        }
    }

    /// Serialize to the single-line wire form.
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).expect("Serialize should work")
    }
}

/// Translate a command line into its wire payload.
///
/// Commands that can't be translated are reported, and give [`EMPTY_PAYLOAD`].
pub fn to_payload(command_line: &str) -> String {
    let command = Command::parse(command_line);

    match command.payload() {
        Some(payload) => Envelope::command(payload).serialize(),
        None => {
            warn!(%command, "Invalid command or incorrect parameters");
            info!("{}", Command::usage());
            EMPTY_PAYLOAD.to_owned()
        }
    }
}

/// Overwrite `path` with `contents` as pretty-printed JSON.
pub fn export_topology<P: AsRef<Path>>(path: P, contents: &Value) -> io::Result<()> {
    let mut output = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut output, PrettyFormatter::with_indent(b"    "));
    contents.serialize(&mut serializer)?;
    output.push(b'\n');

    fs::write(path, output)
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).expect("Serializing a JSON value should work")
}

/// Turns device responses into display text.
#[derive(Debug, Clone)]
pub struct Translator {
    topology_file: PathBuf,
    cipher: Arc<dyn Cipher>,
}

impl Translator {
    /// A translator which exports topology captures to the given file,
    /// and leaves mesh messages as they are.
    pub fn new<P: Into<PathBuf>>(topology_file: P) -> Self {
        Self::with_cipher(topology_file, Arc::new(Passthrough))
    }

    /// A translator with a specific [`Cipher`] for mesh messages.
    pub fn with_cipher<P: Into<PathBuf>>(topology_file: P, cipher: Arc<dyn Cipher>) -> Self {
        Self {
            topology_file: topology_file.into(),
            cipher,
        }
    }

    /// Where topology captures are written.
    pub fn topology_file(&self) -> &Path {
        &self.topology_file
    }

    /// Turn a response envelope into display text.
    ///
    /// Anything which isn't a JSON object is returned as-is, devices also print plain log lines.
    pub fn from_payload(&self, wire: &str) -> String {
        let mut data = match serde_json::from_str::<Value>(wire) {
            Ok(Value::Object(data)) => data,
            Ok(_) | Err(_) => {
                debug!("Not a JSON envelope, passing through");
                return wire.to_owned();
            }
        };

        let is_mesh = data.get("payload_type").and_then(Value::as_str) == Some("mesh");
        let mut payload = data
            .remove("payload")
            .unwrap_or_else(|| Value::Object(Default::default()));

        // Responses win over mesh detection, a captured topology may nest anything.
        if let Some(response) = payload.get("response") {
            if payload.get("cmd").and_then(Value::as_str) == Some("capture-topology") {
                match export_topology(&self.topology_file, response) {
                    Ok(()) => info!(path = ?self.topology_file, "Topology exported"),
                    Err(e) => error!(?e, path = ?self.topology_file, "Could not export topology"),
                }
            }
            return pretty(response);
        }

        if is_mesh {
            let Some(ciphertext) = payload.get("msg").and_then(Value::as_str) else {
                warn!("Mesh payload without a message, passing through");
                return wire.to_owned();
            };
            let plaintext = self.cipher.decrypt(ciphertext);
            payload["msg"] = Value::String(plaintext);
        }

        pretty(&payload)
    }
}
