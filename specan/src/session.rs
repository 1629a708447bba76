//! Connection lifecycle of one instrument.
//!
//! A [`Session`] owns the bus address of an instrument and, while open, a
//! handle obtained from the [`Inventory`]. Handles are shared: a session
//! adopts a live handle for its address instead of creating a second one.
//! Closing a session closes that handle for every session sharing it.

use specan_protocol::{ScpiRequest, ScpiResponse};

use crate::address::BusAddress;
use crate::inventory::{lock, Inventory, SharedHandle};
use crate::transport::Status;
use crate::Error;

/// Read buffer installed on every handle a session opens. Large enough for a
/// full trace reply.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1 << 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
}

pub struct Session {
    inventory: Inventory,
    address: BusAddress,
    handle: Option<SharedHandle>,
    read_buffer_size: usize,
}

impl Session {
    pub fn new(inventory: Inventory, address: BusAddress) -> Self {
        Self {
            inventory,
            address,
            handle: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    /// Sets the read buffer used by the next `open()`. Values below
    /// [`DEFAULT_READ_BUFFER_SIZE`] are raised to it.
    pub fn with_read_buffer_size(mut self, bytes: usize) -> Self {
        self.read_buffer_size = bytes.max(DEFAULT_READ_BUFFER_SIZE);
        self
    }

    pub fn address(&self) -> &BusAddress {
        &self.address
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    /// Adopts `address`. An open connection to a different address is closed.
    pub fn configure(&mut self, address: BusAddress) -> crate::Result<()> {
        if address == self.address {
            return Ok(());
        }
        self.close()?;
        log::debug!("Session reconfigured from {} to {}", self.address, address);
        self.address = address;
        Ok(())
    }

    pub fn open(&mut self, address: Option<BusAddress>) -> crate::Result<()> {
        if let Some(address) = address {
            self.configure(address)?;
        }
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => match self.inventory.discover(&self.address) {
                Some(handle) => handle,
                None => self.inventory.create(&self.address)?,
            },
        };
        {
            let mut guard = lock(&handle);
            if guard.status() != Status::Open {
                log::debug!("Opening {}", self.address);
                // on failure the handle is dropped here, leaving the session closed
                guard.set_read_buffer_size(self.read_buffer_size)?;
                guard.open()?;
            }
        }
        self.handle = Some(handle);
        Ok(())
    }

    /// Closes the connection and releases the handle. Closing a closed
    /// session does nothing.
    pub fn close(&mut self) -> crate::Result<()> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return Ok(()),
        };
        let mut guard = lock(&handle);
        if guard.status() == Status::Open {
            log::debug!("Closing {}", self.address);
            guard.close()?;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        match &self.handle {
            Some(handle) => lock(handle).status() == Status::Open,
            None => false,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.is_open() {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }

    /// Performs one transaction. A query holds the handle for the write and
    /// the subsequent read.
    pub fn request(&mut self, req: ScpiRequest) -> crate::Result<ScpiResponse> {
        let handle = match &self.handle {
            Some(handle) => handle,
            None => return Err(Error::NotConnected),
        };
        let mut guard = lock(handle);
        if guard.status() != Status::Open {
            return Err(Error::NotConnected);
        }
        log::debug!("{} <- {}", self.address, req.command());
        match req {
            ScpiRequest::Write(cmd) => {
                guard.write_line(&cmd)?;
                Ok(ScpiResponse::Done)
            }
            ScpiRequest::QueryString(cmd) => {
                let reply = guard.query_line(&cmd)?;
                log::debug!("{} -> {}", self.address, reply);
                Ok(ScpiResponse::String(reply))
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("Failed to close {}: {}", self.address, err);
        }
    }
}
