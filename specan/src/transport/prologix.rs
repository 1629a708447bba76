/// This module implements GPIB access through the Prologix USB to GPIB dongle.
/// http://prologix.biz/gpib-usb-controller.html
///
/// The dongle shows up as a serial port. Each board index of a `BusAddress`
/// maps to one configured serial port. All instruments on a board share that
/// port, the primary address is selected with `++addr` before every write.
/// The port is opened with the first handle and closed with the last one.
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use specan_protocol::ParseError;

use crate::address::BusAddress;
use crate::inventory::lock;
use crate::transport::{Bus, Handle, Status};
use crate::Error;

pub const DEFAULT_BAUD: u32 = 9600;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

const ESC: u8 = 0x1B;

/// Byte stream to a Prologix controller.
pub trait Port: Read + Write + Send {
    /// Discards received but unread bytes.
    fn clear_input(&mut self) -> io::Result<()>;
}

impl Port for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))
    }
}

/// Opens the port at `path` with the given baud rate and read timeout.
pub type Opener = Arc<dyn Fn(&str, u32, Duration) -> crate::Result<Box<dyn Port>> + Send + Sync>;

fn open_serial(path: &str, baud: u32, timeout: Duration) -> crate::Result<Box<dyn Port>> {
    let port = serialport::new(path, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(timeout)
        .open()
        .map_err(|err| Error::connection(anyhow!("Cannot open {}: {}", path, err)))?;
    Ok(Box::new(port))
}

struct PortState {
    path: String,
    port: Option<Box<dyn Port>>,
    users: usize,
}

type SharedPort = Arc<Mutex<PortState>>;

#[derive(Clone)]
pub struct PrologixBus {
    ports: HashMap<u32, SharedPort>,
    baud: u32,
    timeout: Duration,
    opener: Opener,
}

impl Default for PrologixBus {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD, DEFAULT_TIMEOUT)
    }
}

impl PrologixBus {
    pub fn new(baud: u32, timeout: Duration) -> Self {
        Self::with_opener(baud, timeout, Arc::new(open_serial))
    }

    pub fn with_opener(baud: u32, timeout: Duration, opener: Opener) -> Self {
        Self {
            ports: HashMap::new(),
            baud,
            timeout,
            opener,
        }
    }

    /// Assigns the serial port of the dongle acting as `board`.
    pub fn add_port<T: Into<String>>(&mut self, board: u32, path: T) {
        let state = PortState {
            path: path.into(),
            port: None,
            users: 0,
        };
        self.ports.insert(board, Arc::new(Mutex::new(state)));
    }
}

impl Bus for PrologixBus {
    fn create(&mut self, addr: &BusAddress) -> crate::Result<Box<dyn Handle>> {
        let port = self.ports.get(&addr.board()).ok_or_else(|| {
            Error::connection(anyhow!("No serial port configured for board {}", addr.board()))
        })?;
        Ok(Box::new(PrologixHandle {
            port: port.clone(),
            gpib_addr: addr.primary_address(),
            baud: self.baud,
            timeout: self.timeout,
            opener: self.opener.clone(),
            read_buffer_size: usize::MAX,
            open: false,
        }))
    }
}

/// Serial ports present on this machine.
pub fn list_ports() -> crate::Result<Vec<String>> {
    let ports = serialport::available_ports().map_err(|err| Error::transport(anyhow!("{}", err)))?;
    Ok(ports.into_iter().map(|x| x.port_name).collect())
}

/// One instrument on a Prologix board.
pub struct PrologixHandle {
    port: SharedPort,
    gpib_addr: u8,
    baud: u32,
    timeout: Duration,
    opener: Opener,
    read_buffer_size: usize,
    open: bool,
}

impl PrologixHandle {
    /// Runs `f` on the board's port while holding it, so no other instrument
    /// on the board interleaves.
    fn with_port<R, F>(&self, f: F) -> crate::Result<R>
    where
        F: FnOnce(&mut Box<dyn Port>) -> crate::Result<R>,
    {
        if !self.open {
            return Err(Error::NotConnected);
        }
        let mut state = lock(&self.port);
        let port = state.port.as_mut().ok_or(Error::NotConnected)?;
        f(port)
    }

    fn release(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let mut state = lock(&self.port);
        state.users = state.users.saturating_sub(1);
        if state.users == 0 && state.port.take().is_some() {
            log::debug!("Closed {}", state.path);
        }
    }
}

impl Drop for PrologixHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl Handle for PrologixHandle {
    fn set_read_buffer_size(&mut self, bytes: usize) -> crate::Result<()> {
        self.read_buffer_size = bytes;
        Ok(())
    }

    fn open(&mut self) -> crate::Result<()> {
        if self.open {
            return Ok(());
        }
        let mut state = lock(&self.port);
        if state.port.is_none() {
            log::debug!("Opening {}", state.path);
            let mut port = (self.opener)(&state.path, self.baud, self.timeout)?;
            init_prologix(&mut port).map_err(|err| Error::connection(anyhow!("{}", err)))?;
            state.port = Some(port);
        }
        state.users += 1;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> crate::Result<()> {
        self.release();
        Ok(())
    }

    fn status(&self) -> Status {
        if self.open && lock(&self.port).port.is_some() {
            Status::Open
        } else {
            Status::Closed
        }
    }

    fn write_line(&mut self, text: &str) -> crate::Result<()> {
        let gpib_addr = self.gpib_addr;
        self.with_port(|port| {
            // drop stale replies of earlier, unread queries
            port.clear_input().map_err(Error::transport)?;
            write_prologix(port, gpib_addr, text)
        })
    }

    fn read_line(&mut self) -> crate::Result<String> {
        let timeout = self.timeout;
        let max_len = self.read_buffer_size;
        self.with_port(|port| read_prologix(port, timeout, max_len))
    }

    fn query_line(&mut self, text: &str) -> crate::Result<String> {
        let gpib_addr = self.gpib_addr;
        let timeout = self.timeout;
        let max_len = self.read_buffer_size;
        self.with_port(|port| {
            port.clear_input().map_err(Error::transport)?;
            write_prologix(port, gpib_addr, text)?;
            read_prologix(port, timeout, max_len)
        })
    }
}

pub fn init_prologix<T: Write + ?Sized>(serial: &mut T) -> crate::Result<()> {
    log::debug!("Initalizing prologix.");
    write(serial, "++savecfg 0\n")?;
    write(serial, "++auto 0\n")?;
    // the controller appends the LF terminator to every command
    write(serial, "++eos 2\n")
}

fn write<T: Write + ?Sized>(serial: &mut T, msg: &str) -> crate::Result<()> {
    serial.write_all(msg.as_bytes()).map_err(Error::transport)
}

/// Escapes bytes the controller would otherwise interpret.
fn escape(msg: &str) -> Vec<u8> {
    let mut ret = Vec::with_capacity(msg.len() + 8);
    for x in msg.bytes() {
        if matches!(x, b'\r' | b'\n' | ESC | b'+') {
            ret.push(ESC);
        }
        ret.push(x);
    }
    ret
}

pub fn write_prologix<T: Write + ?Sized>(serial: &mut T, addr: u8, msg: &str) -> crate::Result<()> {
    log::debug!("handling prologix write for address {}", addr);
    write(serial, &format!("++addr {}\n", addr))?;
    let mut data = escape(msg);
    data.push(b'\n');
    serial.write_all(&data).map_err(Error::transport)?;
    serial.flush().map_err(Error::transport)
}

pub fn read_prologix<T: Read + Write + ?Sized>(
    serial: &mut T,
    timeout: Duration,
    max_len: usize,
) -> crate::Result<String> {
    write(serial, "++read eoi\n")?;
    let start = Instant::now();
    let mut ret = Vec::new();
    loop {
        let mut x = [0; 1];
        match serial.read(&mut x) {
            Ok(0) => {
                log::debug!("instrument read timeout");
                return Err(Error::protocol_timeout());
            }
            Ok(_) => {
                if x[0] == b'\n' {
                    break;
                }
                ret.push(x[0]);
                if ret.len() >= max_len {
                    return Err(Error::transport(anyhow!(
                        "Reply exceeds read buffer of {} bytes",
                        max_len
                    )));
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                log::debug!("instrument read timeout");
                return Err(Error::protocol_timeout());
            }
            Err(err) => {
                log::debug!("read error");
                return Err(Error::transport(err));
            }
        }
        if start.elapsed() > timeout {
            return Err(Error::protocol_timeout());
        }
    }
    if ret.last() == Some(&b'\r') {
        ret.pop();
    }
    String::from_utf8(ret).map_err(|_| Error::Parse(ParseError::Encoding))
}

#[cfg(test)]
mod tests {
    use super::*;
    use specan_protocol::TransportError;
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakePort {
        rx: Cursor<Vec<u8>>,
        tx: Vec<u8>,
    }

    impl FakePort {
        fn new(rx: &[u8]) -> Self {
            Self {
                rx: Cursor::new(rx.to_vec()),
                tx: Vec::new(),
            }
        }

        fn sent(&self) -> String {
            String::from_utf8_lossy(&self.tx).to_string()
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.rx.read(buf)
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn init_sequence() {
        let mut port = FakePort::new(b"");
        init_prologix(&mut port).unwrap();
        assert_eq!(port.sent(), "++savecfg 0\n++auto 0\n++eos 2\n");
    }

    #[test]
    fn write_selects_address_and_escapes() {
        let mut port = FakePort::new(b"");
        write_prologix(&mut port, 18, ":freq:cent 1.000000000e+09").unwrap();
        assert_eq!(port.sent(), "++addr 18\n:freq:cent 1.000000000e\x1b+09\n");
    }

    #[test]
    fn read_reply() {
        let mut port = FakePort::new(b"-1.2345E+01\r\ngarbage");
        let reply = read_prologix(&mut port, DEFAULT_TIMEOUT, 1024).unwrap();
        assert_eq!(reply, "-1.2345E+01");
        assert_eq!(port.sent(), "++read eoi\n");
    }

    #[test]
    fn missing_reply_times_out() {
        let mut port = FakePort::new(b"1.0,2.0");
        let ret = read_prologix(&mut port, DEFAULT_TIMEOUT, 1024);
        assert!(matches!(ret, Err(Error::Transport(TransportError::Timeout))));
    }

    #[test]
    fn reply_longer_than_buffer() {
        let mut port = FakePort::new(b"1.0,2.0,3.0\n");
        let ret = read_prologix(&mut port, DEFAULT_TIMEOUT, 4);
        assert!(matches!(ret, Err(Error::Transport(TransportError::Other(_)))));
    }

    /// Controller stand-in: records every byte written and answers each
    /// `++read eoi` with the next queued reply.
    #[derive(Clone, Default)]
    struct Controller {
        tx: Arc<Mutex<Vec<u8>>>,
        rx: Arc<Mutex<VecDeque<u8>>>,
        replies: Arc<Mutex<VecDeque<String>>>,
        opened: Arc<AtomicUsize>,
    }

    impl Controller {
        fn bus(&self) -> PrologixBus {
            let ctrl = self.clone();
            let opener: Opener = Arc::new(
                move |path: &str, _baud: u32, _timeout: Duration| -> crate::Result<Box<dyn Port>> {
                    assert_eq!(path, "/dev/ttyUSB0");
                    ctrl.opened.fetch_add(1, Ordering::SeqCst);
                    Ok(Box::new(ctrl.clone()))
                },
            );
            let mut bus = PrologixBus::with_opener(DEFAULT_BAUD, DEFAULT_TIMEOUT, opener);
            bus.add_port(0, "/dev/ttyUSB0");
            bus
        }

        fn sent(&self) -> String {
            let tx = self.tx.lock().unwrap();
            String::from_utf8_lossy(&tx).to_string()
        }
    }

    impl Read for Controller {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut rx = self.rx.lock().unwrap();
            let n = buf.len().min(rx.len());
            for (x, y) in buf.iter_mut().zip(rx.drain(..n)) {
                *x = y;
            }
            Ok(n)
        }
    }

    impl Write for Controller {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut tx = self.tx.lock().unwrap();
            tx.extend_from_slice(buf);
            if tx.ends_with(b"++read eoi\n") {
                if let Some(reply) = self.replies.lock().unwrap().pop_front() {
                    self.rx.lock().unwrap().extend(reply.bytes());
                }
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Port for Controller {
        fn clear_input(&mut self) -> io::Result<()> {
            self.rx.lock().unwrap().clear();
            Ok(())
        }
    }

    #[test]
    fn instruments_share_board_port() {
        let ctrl = Controller::default();
        let mut bus = ctrl.bus();
        let mut a = bus.create(&BusAddress::with_driver("prologix", 0, 18).unwrap()).unwrap();
        let mut b = bus.create(&BusAddress::with_driver("prologix", 0, 19).unwrap()).unwrap();
        a.open().unwrap();
        b.open().unwrap();
        assert_eq!(ctrl.opened.load(Ordering::SeqCst), 1);
        assert_eq!(ctrl.sent(), "++savecfg 0\n++auto 0\n++eos 2\n");

        ctrl.replies.lock().unwrap().push_back("1.5E+09\n".to_string());
        assert_eq!(a.query_line(":freq:cent?").unwrap(), "1.5E+09");
        b.write_line("*RST").unwrap();
        assert!(ctrl
            .sent()
            .ends_with("++addr 18\n:freq:cent?\n++read eoi\n++addr 19\n*RST\n"));

        a.close().unwrap();
        assert_eq!(a.status(), Status::Closed);
        assert_eq!(b.status(), Status::Open);
        assert!(matches!(a.write_line("*RST"), Err(Error::NotConnected)));
        b.write_line("*CLS").unwrap();

        b.close().unwrap();
        assert_eq!(b.status(), Status::Closed);
        b.open().unwrap();
        assert_eq!(ctrl.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropped_handle_releases_port() {
        let ctrl = Controller::default();
        let mut bus = ctrl.bus();
        let mut a = bus.create(&BusAddress::with_driver("prologix", 0, 18).unwrap()).unwrap();
        a.open().unwrap();
        drop(a);
        let mut b = bus.create(&BusAddress::with_driver("prologix", 0, 18).unwrap()).unwrap();
        b.open().unwrap();
        assert_eq!(ctrl.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unconfigured_board() {
        let mut bus = PrologixBus::default();
        bus.add_port(0, "/dev/ttyUSB0");
        let addr = BusAddress::with_driver("prologix", 1, 18).unwrap();
        assert!(matches!(bus.create(&addr), Err(Error::Connection(_))));

        let addr = BusAddress::with_driver("prologix", 0, 18).unwrap();
        let mut handle = bus.create(&addr).unwrap();
        assert_eq!(handle.status(), Status::Closed);
        assert!(matches!(handle.write_line("*IDN?"), Err(Error::NotConnected)));
        handle.close().unwrap();
    }
}
