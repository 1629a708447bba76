//! A simulated spectrum analyzer.
//!
//! Registered as driver `sim`, it answers the same SCPI subset as the real
//! instrument so the driver and the command line tool can be exercised without
//! hardware. The simulated input is a single carrier above a noise floor.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use rand::Rng;
use specan_protocol::scpi::{format_exponential, parse_scalar};

use crate::address::BusAddress;
use crate::transport::{Bus, Handle, Status};
use crate::Error;

pub const IDENTITY: &str = "SPECAN,SIM-3000,0,0.3";

const DEFAULT_READ_BUFFER_SIZE: usize = 512;
const NOISE_FLOOR_DBM: f64 = -90.0;
const NOISE_DB: f64 = 0.5;

#[derive(Clone)]
pub struct SimBus {
    sweep_points: usize,
    created: Arc<AtomicUsize>,
}

impl SimBus {
    pub fn new(sweep_points: usize) -> Self {
        Self {
            sweep_points: sweep_points.max(1),
            created: Default::default(),
        }
    }

    /// Number of handles created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl Bus for SimBus {
    fn create(&mut self, addr: &BusAddress) -> crate::Result<Box<dyn Handle>> {
        log::debug!("Creating simulated analyzer at {}", addr);
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimHandle::new(self.sweep_points)))
    }
}

struct Analyzer {
    center: f64,
    span: f64,
    bandwidth: f64,
    marker_x: f64,
    points: usize,
    carrier_frequency: f64,
    carrier_level: f64,
}

impl Analyzer {
    fn new(points: usize) -> Self {
        Self {
            center: 1.5e9,
            span: 3e9,
            bandwidth: 3e6,
            marker_x: 1.5e9,
            points,
            carrier_frequency: 1e9,
            carrier_level: -20.0,
        }
    }

    /// Level in dBm the analyzer displays at `freq` without noise.
    fn level(&self, freq: f64) -> f64 {
        let offset = (freq - self.carrier_frequency) / self.bandwidth;
        let floor = 10f64.powf(NOISE_FLOOR_DBM / 10.0);
        let carrier = 10f64.powf(self.carrier_level / 10.0) * (-0.5 * offset * offset).exp();
        10.0 * (floor + carrier).log10()
    }

    fn sweep(&self) -> String {
        let mut rng = rand::thread_rng();
        let axis = specan_protocol::trace::frequency_axis(self.center, self.span, self.points);
        axis.iter()
            .map(|f| format!("{:.3}", self.level(*f) + rng.gen_range(-NOISE_DB..NOISE_DB)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn scientific(x: f64) -> String {
    format_exponential(x, 9).to_uppercase()
}

pub struct SimHandle {
    status: Status,
    read_buffer_size: usize,
    analyzer: Analyzer,
    replies: VecDeque<String>,
}

impl SimHandle {
    pub fn new(sweep_points: usize) -> Self {
        Self {
            status: Status::Closed,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            analyzer: Analyzer::new(sweep_points.max(1)),
            replies: VecDeque::new(),
        }
    }

    fn set(&mut self, header: &str, arg: &str) {
        let value = match parse_scalar(arg) {
            Ok(x) => x,
            Err(err) => {
                log::warn!("Simulator rejected `{} {}`: {}", header, arg, err);
                return;
            }
        };
        match header {
            ":freq:cent" => self.analyzer.center = value,
            ":freq:span" => self.analyzer.span = value.max(0.0),
            ":band:res" => self.analyzer.bandwidth = value.max(1.0),
            ":calc:mark1:x" => self.analyzer.marker_x = value,
            _ => log::warn!("Simulator ignores unknown command `{}`", header),
        }
    }

    fn handle(&mut self, line: &str) {
        let line = line.trim();
        let (header, arg) = match line.split_once(char::is_whitespace) {
            Some((header, arg)) => (header, Some(arg.trim())),
            None => (line, None),
        };
        let header = header.to_lowercase();
        let reply = match (header.as_str(), arg) {
            ("*idn?", _) => IDENTITY.to_string(),
            (":freq:cent?", _) => scientific(self.analyzer.center),
            (":freq:span?", _) => scientific(self.analyzer.span),
            (":band:res?", _) => scientific(self.analyzer.bandwidth),
            (":calc:mark1:x?", _) => scientific(self.analyzer.marker_x),
            (":calc:mark1:y?", _) => format!("{:.3}", self.analyzer.level(self.analyzer.marker_x)),
            (":trace:data?", Some(kind)) if kind.eq_ignore_ascii_case("rawtrace") => self.analyzer.sweep(),
            (header, Some(arg)) if !header.ends_with('?') => {
                self.set(header, arg);
                return;
            }
            _ => {
                log::warn!("Simulator ignores unknown command `{}`", line);
                return;
            }
        };
        self.replies.push_back(reply);
    }

    fn check_open(&self) -> crate::Result<()> {
        match self.status {
            Status::Open => Ok(()),
            Status::Closed => Err(Error::transport(anyhow!("Simulated handle is closed"))),
        }
    }
}

impl Handle for SimHandle {
    fn set_read_buffer_size(&mut self, bytes: usize) -> crate::Result<()> {
        self.read_buffer_size = bytes;
        Ok(())
    }

    fn open(&mut self) -> crate::Result<()> {
        self.status = Status::Open;
        Ok(())
    }

    fn close(&mut self) -> crate::Result<()> {
        self.status = Status::Closed;
        self.replies.clear();
        Ok(())
    }

    fn status(&self) -> Status {
        self.status
    }

    fn write_line(&mut self, text: &str) -> crate::Result<()> {
        self.check_open()?;
        self.handle(text);
        Ok(())
    }

    fn read_line(&mut self) -> crate::Result<String> {
        self.check_open()?;
        let reply = self.replies.pop_front().ok_or_else(Error::protocol_timeout)?;
        if reply.len() + 1 > self.read_buffer_size {
            return Err(Error::transport(anyhow!(
                "Reply of {} bytes exceeds read buffer of {} bytes",
                reply.len() + 1,
                self.read_buffer_size
            )));
        }
        Ok(reply)
    }
}
