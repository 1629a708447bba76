//! Connection handles to instruments and the buses that create them.
//!
//! A [`Bus`] is registered per driver name in the [`crate::inventory::Inventory`].
//! It creates one [`Handle`] per bus address. Handles are line oriented: each
//! written command is terminated by exactly one newline and each reply is read
//! up to its newline.

use crate::address::BusAddress;

pub mod loopback;
pub mod prologix;
pub mod sim;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Open,
    Closed,
}

pub trait Handle: Send {
    /// Upper bound for a single reply in bytes.
    fn set_read_buffer_size(&mut self, bytes: usize) -> crate::Result<()>;

    fn open(&mut self) -> crate::Result<()>;

    fn close(&mut self) -> crate::Result<()>;

    fn status(&self) -> Status;

    /// Writes `text` followed by a single newline.
    fn write_line(&mut self, text: &str) -> crate::Result<()>;

    /// Reads one reply without its line terminator.
    fn read_line(&mut self) -> crate::Result<String>;

    /// Writes `text` and reads its reply as one transaction.
    fn query_line(&mut self, text: &str) -> crate::Result<String> {
        self.write_line(text)?;
        self.read_line()
    }
}

pub trait Bus: Send {
    fn create(&mut self, addr: &BusAddress) -> crate::Result<Box<dyn Handle>>;
}
