use std::{
    collections::BTreeMap,
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serialport::FlowControl;

use crate::{
    error::Error,
    locator::{LocateOptions, Strategy},
    serial::serial_port::DEFAULT_BAUD,
};

/// The port the command socket listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 65432;

/// How to find and talk to the attached device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// How to pick the device among the serial ports.
    pub strategy: Strategy,

    /// Baud rate.
    pub baud: u32,

    /// Milliseconds to let the device boot after the port is opened.
    pub warm_up_ms: u64,

    /// Flow control on the serial line.
    pub flow_control: FlowControl,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            baud: DEFAULT_BAUD,
            warm_up_ms: 2000,
            flow_control: FlowControl::None,
        }
    }
}

/// The configuration used for running the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// See [`DeviceConfig`].
    pub device: DeviceConfig,

    /// Node ids of the devices we may connect to, and their hardware index.
    /// Only used with [`Strategy::FromList`].
    pub allowed_devices: BTreeMap<u32, u32>,

    /// Where clients connect.
    pub listen: SocketAddr,

    /// Where topology captures are written.
    pub topology_file: PathBuf,

    /// Milliseconds between relay ticks.
    pub poll_interval_ms: u64,

    /// Milliseconds to let the device finish a topology dump before reading it.
    pub capture_settle_ms: u64,

    /// If set, logs are also written to daily files in this directory.
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            allowed_devices: BTreeMap::new(),
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            topology_file: PathBuf::from("topology.json"),
            poll_interval_ms: 500,
            capture_settle_ms: 500,
            log_dir: None,
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(format!("Could not parse configuration: {e}")))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            device: DeviceConfig {
                strategy: Strategy::FromList,
                ..Default::default()
            },
            allowed_devices: BTreeMap::from([(0xC3D4E5F7, 1), (0x0A0B0C0E, 2)]),
            log_dir: Some(PathBuf::from("logs")),
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .expect("Config should serialize")
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let s = std::fs::read_to_string(p)?;

        Self::deserialize(&s)
    }

    /// The poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The capture settle time as a [`Duration`].
    pub fn capture_settle(&self) -> Duration {
        Duration::from_millis(self.capture_settle_ms)
    }

    /// What the device locator needs.
    pub fn locate_options(&self) -> LocateOptions {
        LocateOptions {
            strategy: self.device.strategy.clone(),
            allowed_devices: self.allowed_devices.clone(),
            baud: self.device.baud,
            flow_control: self.device.flow_control,
            warm_up: Duration::from_millis(self.device.warm_up_ms),
        }
    }

    fn check_strategy(&self) -> Result<(), Error> {
        if let Some(identifier) = self.device.strategy.identifier() {
            if identifier.trim().is_empty() {
                return Err(Error::BadConfig(format!(
                    "The device strategy {} needs a non-empty identifier",
                    self.device.strategy
                )));
            }
        }

        if self.device.strategy == Strategy::FromList && self.allowed_devices.is_empty() {
            return Err(Error::BadConfig(
                "The allow-list strategy is used, but no allowed devices are configured".into(),
            ));
        }

        Ok(())
    }

    fn check_allowed_devices(&self) -> Result<(), Error> {
        if self.allowed_devices.contains_key(&0) {
            return Err(Error::BadConfig(
                "Node id 0 can't be in the allow-list, node ids are never zero".into(),
            ));
        }

        // Operators refer to devices by hardware index, so it must be unambiguous.
        let duplicates = self
            .allowed_devices
            .values()
            .duplicates()
            .collect::<Vec<_>>();

        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(Error::BadConfig(format!("Several allowed devices share a hardware index. Duplicates: {duplicates:?}")))
        }
    }

    fn check_timings(&self) -> Result<(), Error> {
        if self.poll_interval_ms == 0 {
            return Err(Error::BadConfig(
                "The poll interval must be at least one millisecond".into(),
            ));
        }
        if self.device.baud == 0 {
            return Err(Error::BadConfig("The baud rate can't be zero".into()));
        }

        Ok(())
    }

    /// Check the configuration makes sense.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_strategy()?;
        self.check_allowed_devices()?;
        self.check_timings()?;

        Ok(())
    }
}
