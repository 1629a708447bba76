//! # Driver for GPIB-attached swept spectrum analyzers
//!
//! A [`session::Session`] manages the connection to one instrument identified
//! by a [`address::BusAddress`]. Connection handles are created by the
//! transports registered in an [`inventory::Inventory`] and shared between
//! sessions talking to the same address. [`analyzer::SpectrumAnalyzer`]
//! implements the SCPI command set on top of a session.
//!
//! ```no_run
//! use specan::analyzer::SpectrumAnalyzer;
//! use specan::address::BusAddress;
//! use specan::config::Settings;
//!
//! # fn main() -> specan::Result<()> {
//! let settings = Settings::load("specan.toml")?;
//! let addr = BusAddress::new(0, 18)?;
//! let mut analyzer = SpectrumAnalyzer::new(settings.inventory(), addr);
//! analyzer.open()?;
//! analyzer.set_center_frequency(1e9)?;
//! let trace = analyzer.get_trace()?;
//! println!("{} points", trace.len());
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod analyzer;
pub mod config;
pub mod inventory;
pub mod session;
pub mod transport;

pub use specan_protocol as protocol;
pub use specan_protocol::{Error, Result};
