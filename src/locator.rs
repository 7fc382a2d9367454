//! Finding the attached mesh node, and connecting to it.

use std::{collections::BTreeMap, fmt::Display, time::Duration};

use serde::{Deserialize, Serialize};
use serialport::SerialPortType;
use tracing::{debug, info, warn};

use crate::{
    error::Error,
    serial::serial_port::{SerialLink, SerialPortBuilder},
};

/// The mesh identity of a node.
///
/// Derived from the trailing four octets of the hardware serial number
/// (which is the node's MAC address), plus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Derive the node id from a colon separated hardware serial number,
    /// such as `A1:B2:C3:D4:E5:F6`.
    ///
    /// Gives `None` if the trailing octets aren't hex, don't fit in 32 bits,
    /// or if the id would overflow.
    pub fn from_serial_number(serial_number: &str) -> Option<Self> {
        let octets = serial_number.split(':').collect::<Vec<_>>();
        let trailing = &octets[octets.len().saturating_sub(4)..];

        if trailing
            .iter()
            .any(|octet| octet.is_empty() || !octet.chars().all(|c| c.is_ascii_hexdigit()))
        {
            return None;
        }

        let value = u32::from_str_radix(&trailing.concat(), 16).ok()?;

        value.checked_add(1).map(Self)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How to pick the device to connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Strategy {
    /// The port with this name, e.g. `/dev/ttyACM0` or `COM3`.
    Port(String),

    /// The port whose USB serial number is exactly this.
    SerialNumber(String),

    /// The only port there is.
    /// Ambiguous if there are several.
    #[default]
    AutoDetect,

    /// The first port whose node id is in the allow-list.
    FromList,
}

impl Strategy {
    /// The string the strategy matches against, if any.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Strategy::Port(identifier) | Strategy::SerialNumber(identifier) => {
                Some(identifier.as_str())
            }
            Strategy::AutoDetect | Strategy::FromList => None,
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Port(port) => write!(f, "port `{port}`"),
            Strategy::SerialNumber(serial_number) => write!(f, "serial number `{serial_number}`"),
            Strategy::AutoDetect => write!(f, "auto-detect"),
            Strategy::FromList => write!(f, "allow-list"),
        }
    }
}

/// Who we are connected to.
///
/// Fixed for the lifetime of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    /// How the device was found.
    pub strategy: Strategy,

    /// The device's hardware serial number, if it reports one.
    pub serial_number: Option<String>,

    /// The device's node id, if it could be derived.
    pub node_id: Option<NodeId>,

    /// The number operators use for the device, when found via the allow-list.
    pub hardware_index: Option<u32>,

    /// The serial port the device is on.
    pub port: String,
}

impl Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.port)?;
        if let Some(node_id) = self.node_id {
            write!(f, " (node {node_id}")?;
            if let Some(index) = self.hardware_index {
                write!(f, ", hardware index {index}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// A serial port which might be the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    /// The port name.
    pub port: String,

    /// The USB serial number, if any.
    pub serial_number: Option<String>,
}

impl PortCandidate {
    /// The node id this candidate would have.
    pub fn node_id(&self) -> Option<NodeId> {
        self.serial_number
            .as_deref()
            .and_then(NodeId::from_serial_number)
    }
}

impl From<serialport::SerialPortInfo> for PortCandidate {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let serial_number = match info.port_type {
            SerialPortType::UsbPort(usb) => usb.serial_number,
            _ => None,
        };

        Self {
            port: info.port_name,
            serial_number,
        }
    }
}

/// All serial ports on this machine.
pub fn list_ports() -> Result<Vec<PortCandidate>, Error> {
    let ports = serialport::available_ports().map_err(|e| {
        Error::DeviceNotFound(format!("Could not list serial ports, problem: {e}"))
    })?;

    Ok(ports.into_iter().map(Into::into).collect())
}

/// Connection settings for [`locate`].
#[derive(Debug, Clone)]
pub struct LocateOptions {
    /// How to pick the device.
    pub strategy: Strategy,

    /// Node id to hardware index, see [`Strategy::FromList`].
    pub allowed_devices: BTreeMap<u32, u32>,

    /// Baud rate to open the port with.
    pub baud: u32,

    /// Flow control to open the port with.
    pub flow_control: serialport::FlowControl,

    /// How long to let the device boot after opening the port.
    pub warm_up: Duration,
}

fn identify(
    candidates: &[PortCandidate],
    strategy: &Strategy,
    allowed_devices: &BTreeMap<u32, u32>,
) -> Result<DeviceIdentity, Error> {
    let identity = |candidate: &PortCandidate, hardware_index: Option<u32>| DeviceIdentity {
        strategy: strategy.clone(),
        serial_number: candidate.serial_number.clone(),
        node_id: candidate.node_id(),
        hardware_index,
        port: candidate.port.clone(),
    };

    if candidates.is_empty() {
        return Err(Error::DeviceNotFound("No serial devices found".into()));
    }

    match strategy {
        Strategy::Port(port) => candidates
            .iter()
            .find(|candidate| &candidate.port == port)
            .map(|candidate| identity(candidate, None))
            .ok_or_else(|| Error::DeviceNotFound(format!("No serial device at port `{port}`"))),

        Strategy::SerialNumber(serial_number) => candidates
            .iter()
            .find(|candidate| candidate.serial_number.as_ref() == Some(serial_number))
            .map(|candidate| identity(candidate, None))
            .ok_or_else(|| {
                Error::DeviceNotFound(format!(
                    "No serial device with serial number `{serial_number}`"
                ))
            }),

        Strategy::AutoDetect => match candidates {
            [only] => Ok(identity(only, None)),
            many => Err(Error::DeviceNotFound(format!(
                "Multiple serial devices found ({}), pick one by port or serial number",
                many.len()
            ))),
        },

        Strategy::FromList => {
            for candidate in candidates {
                // Only potential MAC addresses are node serial numbers.
                let Some(serial_number) = candidate
                    .serial_number
                    .as_deref()
                    .filter(|serial_number| serial_number.contains(':'))
                else {
                    debug!(%candidate.port, "Skipping port without a node serial number");
                    continue;
                };

                let Some(node_id) = NodeId::from_serial_number(serial_number) else {
                    warn!(%candidate.port, %serial_number, "Invalid serial number");
                    continue;
                };

                match allowed_devices.get(&node_id.0) {
                    Some(&hardware_index) => return Ok(identity(candidate, Some(hardware_index))),
                    None => {
                        warn!(%candidate.port, %serial_number, %node_id, "Node not in allow-list")
                    }
                }
            }

            Err(Error::DeviceNotFound(
                "No serial device is in the allow-list".into(),
            ))
        }
    }
}

/// Find the device the strategy describes, then connect to it.
///
/// Connecting is part of locating: there is no sensible way to handle a device which
/// matches but can't be opened, other than reporting it.
/// After opening, waits for the configured warm-up so the device can finish booting.
pub async fn locate(options: &LocateOptions) -> Result<(DeviceIdentity, SerialLink), Error> {
    let candidates = list_ports()?;
    debug!(count = candidates.len(), "Enumerated serial ports");

    let identity = identify(&candidates, &options.strategy, &options.allowed_devices)?;

    let link = SerialPortBuilder::new(&identity.port)
        .set_baud(options.baud)
        .set_flow_control(options.flow_control)
        .open()?;

    debug!(warm_up = ?options.warm_up, "Waiting for device to boot");
    tokio::time::sleep(options.warm_up).await;

    info!(%identity, serial_number = ?identity.serial_number, "Device connected");

    Ok((identity, link))
}
