//! TOML settings for the driver and the command line tool.
//!
//! ```toml
//! default_driver = "prologix"
//! read_buffer_size = 1048576
//!
//! [prologix]
//! baud = 9600
//! timeout_ms = 1000
//!
//! [[prologix.ports]]
//! board = 0
//! path = "/dev/ttyUSB0"
//!
//! [sim]
//! sweep_points = 401
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::address::{BusAddress, DEFAULT_DRIVER};
use crate::analyzer::SpectrumAnalyzer;
use crate::inventory::Inventory;
use crate::session::{Session, DEFAULT_READ_BUFFER_SIZE};
use crate::transport::prologix::{PrologixBus, DEFAULT_BAUD, DEFAULT_TIMEOUT};
use crate::transport::sim::SimBus;
use crate::Error;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default_driver: String,
    pub read_buffer_size: usize,
    pub prologix: PrologixSettings,
    pub sim: SimSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrologixSettings {
    pub baud: u32,
    pub timeout_ms: u64,
    pub ports: Vec<PortSettings>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortSettings {
    pub board: u32,
    pub path: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimSettings {
    pub sweep_points: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_driver: DEFAULT_DRIVER.to_string(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            prologix: Default::default(),
            sim: Default::default(),
        }
    }
}

impl Default for PrologixSettings {
    fn default() -> Self {
        Self {
            baud: DEFAULT_BAUD,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            ports: Vec::new(),
        }
    }
}

impl Default for SimSettings {
    fn default() -> Self {
        Self { sweep_points: 401 }
    }
}

impl Settings {
    pub fn from_toml(data: &str) -> crate::Result<Self> {
        let mut ret: Settings =
            toml::from_str(data).map_err(|err| Error::argument(anyhow!("Invalid settings: {}", err)))?;
        ret.default_driver = ret.default_driver.trim().to_lowercase();
        if ret.default_driver.is_empty() {
            return Err(Error::argument(anyhow!("`default_driver` must not be empty")));
        }
        ret.read_buffer_size = ret.read_buffer_size.max(DEFAULT_READ_BUFFER_SIZE);
        Ok(ret)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        log::debug!("Loading settings from {}", path.display());
        let data = fs::read_to_string(path)
            .map_err(|err| Error::argument(anyhow!("Cannot read {}: {}", path.display(), err)))?;
        Self::from_toml(&data)
    }

    pub fn prologix_bus(&self) -> PrologixBus {
        let mut bus = PrologixBus::new(
            self.prologix.baud,
            Duration::from_millis(self.prologix.timeout_ms),
        );
        for port in &self.prologix.ports {
            bus.add_port(port.board, port.path.as_str());
        }
        bus
    }

    /// A registry with the `prologix` and `sim` transports.
    pub fn inventory(&self) -> Inventory {
        let inventory = Inventory::new();
        inventory.register("prologix", self.prologix_bus());
        inventory.register("sim", SimBus::new(self.sim.sweep_points));
        inventory
    }

    /// A closed session on `inventory` using the configured read buffer.
    pub fn session(&self, inventory: Inventory, addr: BusAddress) -> Session {
        Session::new(inventory, addr).with_read_buffer_size(self.read_buffer_size)
    }

    pub fn analyzer(&self, addr: BusAddress) -> SpectrumAnalyzer {
        SpectrumAnalyzer::from_session(self.session(self.inventory(), addr))
    }
}
