//! A scripted transport for wire level tests of instrument drivers.
//!
//! Every line written through a handle is recorded verbatim (including its
//! terminator) and every read pops the next queued reply. All handles created
//! from one [`Loopback`] share its state, so a test can keep a clone to
//! inspect the traffic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;

use crate::address::BusAddress;
use crate::inventory::lock;
use crate::transport::{Bus, Handle, Status};
use crate::Error;

struct LoopbackState {
    written: Vec<String>,
    replies: VecDeque<String>,
    status: Status,
    read_buffer_size: usize,
    fail_open: bool,
    created: usize,
    opened: usize,
}

#[derive(Clone)]
pub struct Loopback(Arc<Mutex<LoopbackState>>);

impl Default for Loopback {
    fn default() -> Self {
        Self::new()
    }
}

impl Loopback {
    pub fn new() -> Self {
        let state = LoopbackState {
            written: Vec::new(),
            replies: VecDeque::new(),
            status: Status::Closed,
            read_buffer_size: 0,
            fail_open: false,
            created: 0,
            opened: 0,
        };
        Self(Arc::new(Mutex::new(state)))
    }

    pub fn push_reply<T: Into<String>>(&self, reply: T) {
        lock(&self.0).replies.push_back(reply.into());
    }

    /// Everything written so far, one entry per line.
    pub fn written(&self) -> Vec<String> {
        lock(&self.0).written.clone()
    }

    pub fn clear_written(&self) {
        lock(&self.0).written.clear();
    }

    pub fn status(&self) -> Status {
        lock(&self.0).status
    }

    pub fn read_buffer_size(&self) -> usize {
        lock(&self.0).read_buffer_size
    }

    /// Makes subsequent `open` calls fail as if the device was absent.
    pub fn fail_open(&self, fail: bool) {
        lock(&self.0).fail_open = fail;
    }

    pub fn created(&self) -> usize {
        lock(&self.0).created
    }

    pub fn opened(&self) -> usize {
        lock(&self.0).opened
    }

    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            inner: self.clone(),
        }
    }
}

impl Bus for Loopback {
    fn create(&mut self, _addr: &BusAddress) -> crate::Result<Box<dyn Handle>> {
        lock(&self.0).created += 1;
        Ok(Box::new(self.handle()))
    }
}

pub struct LoopbackHandle {
    inner: Loopback,
}

impl Handle for LoopbackHandle {
    fn set_read_buffer_size(&mut self, bytes: usize) -> crate::Result<()> {
        lock(&self.inner.0).read_buffer_size = bytes;
        Ok(())
    }

    fn open(&mut self) -> crate::Result<()> {
        let mut state = lock(&self.inner.0);
        if state.fail_open {
            return Err(Error::connection(anyhow!("Loopback device absent")));
        }
        state.status = Status::Open;
        state.opened += 1;
        Ok(())
    }

    fn close(&mut self) -> crate::Result<()> {
        lock(&self.inner.0).status = Status::Closed;
        Ok(())
    }

    fn status(&self) -> Status {
        lock(&self.inner.0).status
    }

    fn write_line(&mut self, text: &str) -> crate::Result<()> {
        let mut state = lock(&self.inner.0);
        if state.status != Status::Open {
            return Err(Error::transport(anyhow!("Loopback handle is closed")));
        }
        state.written.push(format!("{}\n", text));
        Ok(())
    }

    fn read_line(&mut self) -> crate::Result<String> {
        let mut state = lock(&self.inner.0);
        if state.status != Status::Open {
            return Err(Error::transport(anyhow!("Loopback handle is closed")));
        }
        let reply = state.replies.pop_front().ok_or_else(Error::protocol_timeout)?;
        let reply = reply
            .strip_suffix("\r\n")
            .or_else(|| reply.strip_suffix('\n'))
            .unwrap_or(reply.as_str())
            .to_string();
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_replays() {
        let loopback = Loopback::new();
        let mut handle = loopback.handle();
        handle.open().unwrap();
        loopback.push_reply("42\n");
        handle.write_line("*IDN?").unwrap();
        assert_eq!(handle.read_line().unwrap(), "42");
        assert_eq!(loopback.written(), vec!["*IDN?\n".to_string()]);
        assert!(matches!(handle.read_line(), Err(Error::Transport(_))));
    }

    #[test]
    fn failing_open() {
        let loopback = Loopback::new();
        loopback.fail_open(true);
        let mut handle = loopback.handle();
        assert!(matches!(handle.open(), Err(Error::Connection(_))));
        assert_eq!(handle.status(), Status::Closed);
        assert!(handle.write_line("x").is_err());
    }
}
