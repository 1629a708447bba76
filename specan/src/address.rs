/// This module implements `BusAddress` which is used for parsing
/// address strings of the form "prologix::0::18" or "GPIB0::18::INSTR"
use std::fmt;
use std::fmt::{Display, Formatter};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Driver used when an address does not name one.
pub const DEFAULT_DRIVER: &str = "prologix";

/// Highest primary address on a GPIB bus.
pub const MAX_PRIMARY_ADDRESS: u8 = 30;

/// Identifies one instrument: the transport driver, the board (bus controller)
/// index and the primary GPIB address of the device on that board.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusAddress {
    driver: String,
    board: u32,
    primary_address: u8,
}

fn parse_board(board: &str) -> crate::Result<u32> {
    board
        .trim()
        .parse()
        .map_err(|_| Error::argument(anyhow!("Invalid board index `{}`", board)))
}

fn parse_primary_address(addr: &str) -> crate::Result<u8> {
    addr.trim()
        .parse()
        .map_err(|_| Error::argument(anyhow!("Invalid primary address `{}`", addr)))
}

impl BusAddress {
    pub fn new(board: u32, primary_address: u8) -> crate::Result<Self> {
        Self::with_driver(DEFAULT_DRIVER, board, primary_address)
    }

    pub fn with_driver<T: Into<String>>(driver: T, board: u32, primary_address: u8) -> crate::Result<Self> {
        let driver = driver.into().trim().to_lowercase();
        if driver.is_empty() {
            return Err(Error::argument(anyhow!("Driver name must not be empty")));
        }
        if primary_address > MAX_PRIMARY_ADDRESS {
            return Err(Error::argument(anyhow!(
                "Primary address {} out of range [0, {}]",
                primary_address,
                MAX_PRIMARY_ADDRESS
            )));
        }
        Ok(Self {
            driver,
            board,
            primary_address,
        })
    }

    /// Builds an address from either `(board, address)` or
    /// `(driver, board, address)`.
    pub fn from_args<S: AsRef<str>>(args: &[S], default_driver: &str) -> crate::Result<Self> {
        match args {
            [board, addr] => Self::with_driver(
                default_driver,
                parse_board(board.as_ref())?,
                parse_primary_address(addr.as_ref())?,
            ),
            [driver, board, addr] => Self::with_driver(
                driver.as_ref(),
                parse_board(board.as_ref())?,
                parse_primary_address(addr.as_ref())?,
            ),
            _ => Err(Error::argument(anyhow!(
                "Expected (board, address) or (driver, board, address), got {} arguments",
                args.len()
            ))),
        }
    }

    pub fn parse(addr: &str, default_driver: &str) -> crate::Result<Self> {
        let splits: Vec<&str> = addr.trim().split("::").collect();
        let first = splits[0].to_lowercase();
        if let Some(board) = first.strip_prefix("gpib") {
            // GPIB0::18 or GPIB0::18::INSTR
            let board = if board.is_empty() { 0 } else { parse_board(board)? };
            match splits.len() {
                2 => {}
                3 if splits[2].eq_ignore_ascii_case("instr") => {}
                _ => return Err(Error::argument(anyhow!("Invalid address `{}`", addr))),
            }
            let primary_address = parse_primary_address(splits[1])?;
            Self::with_driver(default_driver, board, primary_address)
        } else if splits.len() == 3 {
            // prologix::0::18
            Self::from_args(&splits, default_driver)
        } else {
            Err(Error::argument(anyhow!("Invalid address `{}`", addr)))
        }
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn board(&self) -> u32 {
        self.board
    }

    pub fn primary_address(&self) -> u8 {
        self.primary_address
    }

    pub fn handle_id(&self) -> HandleId {
        HandleId::new(self.to_string())
    }
}

impl Display for BusAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.driver, self.board, self.primary_address)
    }
}

/// Represents an identifier for an exclusive hardware resource. There can be
/// only one open connection handle per `HandleId`.
#[derive(Hash, Clone, PartialEq, Eq, Debug)]
pub struct HandleId {
    inner: String,
}

impl HandleId {
    pub fn new(inner: String) -> Self {
        Self { inner }
    }
}

impl Display for HandleId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}
