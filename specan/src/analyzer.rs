//! SCPI command layer of the spectrum analyzer.
//!
//! All settings go through the descriptor table in
//! [`specan_protocol::parameter`], so adding a setting means adding a table
//! entry and a one-line accessor.

use specan_protocol::parameter::{
    self, Parameter, CENTER_FREQUENCY, MARKER_X, MARKER_Y, RESOLUTION_BANDWIDTH, SPAN, TRACE_QUERY,
};
use specan_protocol::scpi::{format_command, parse_csv, strip_terminator};
use specan_protocol::{Arg, ScpiRequest, ScpiResponse, Trace};

use crate::address::BusAddress;
use crate::inventory::Inventory;
use crate::session::Session;
use crate::Error;

pub struct SpectrumAnalyzer {
    session: Session,
}

impl SpectrumAnalyzer {
    pub fn new(inventory: Inventory, address: BusAddress) -> Self {
        Self::from_session(Session::new(inventory, address))
    }

    pub fn from_session(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn open(&mut self) -> crate::Result<()> {
        self.session.open(None)
    }

    pub fn close(&mut self) -> crate::Result<()> {
        self.session.close()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    fn format(template: &str, args: &[Arg]) -> crate::Result<String> {
        let cmd = format_command(template, args)?;
        Ok(strip_terminator(&cmd).to_string())
    }

    /// Formats `template` with `args` and writes it without reading a reply.
    pub fn send_command(&mut self, template: &str, args: &[Arg]) -> crate::Result<()> {
        let cmd = Self::format(template, args)?;
        self.session.request(ScpiRequest::Write(cmd))?;
        Ok(())
    }

    /// Formats `template` with `args`, writes it and returns the reply line.
    pub fn query(&mut self, template: &str, args: &[Arg]) -> crate::Result<String> {
        let cmd = Self::format(template, args)?;
        reply_text(self.session.request(ScpiRequest::QueryString(cmd))?)
    }

    pub fn identify(&mut self) -> crate::Result<String> {
        self.query("*IDN?", &[])
    }

    pub fn set(&mut self, param: &Parameter, value: f64) -> crate::Result<()> {
        let template = param.set_template()?;
        self.send_command(&template, &[Arg::Float(value)])
    }

    pub fn get(&mut self, param: &Parameter) -> crate::Result<f64> {
        let reply = self.query(&param.query_template(), &[])?;
        param.decode(&reply)
    }

    /// Sets the parameter called `name`, see [`parameter::lookup`].
    pub fn set_by_name(&mut self, name: &str, value: f64) -> crate::Result<()> {
        let param = lookup(name)?;
        self.set(param, value)
    }

    pub fn get_by_name(&mut self, name: &str) -> crate::Result<f64> {
        let param = lookup(name)?;
        self.get(param)
    }

    pub fn set_center_frequency(&mut self, freq: f64) -> crate::Result<()> {
        self.set(&CENTER_FREQUENCY, freq)
    }

    pub fn get_center_frequency(&mut self) -> crate::Result<f64> {
        self.get(&CENTER_FREQUENCY)
    }

    pub fn set_span(&mut self, span: f64) -> crate::Result<()> {
        self.set(&SPAN, span)
    }

    pub fn get_span(&mut self) -> crate::Result<f64> {
        self.get(&SPAN)
    }

    pub fn set_bandwidth(&mut self, bw: f64) -> crate::Result<()> {
        self.set(&RESOLUTION_BANDWIDTH, bw)
    }

    pub fn get_bandwidth(&mut self) -> crate::Result<f64> {
        self.get(&RESOLUTION_BANDWIDTH)
    }

    pub fn set_marker_x(&mut self, freq: f64) -> crate::Result<()> {
        self.set(&MARKER_X, freq)
    }

    pub fn get_marker_x(&mut self) -> crate::Result<f64> {
        self.get(&MARKER_X)
    }

    pub fn get_marker_y(&mut self) -> crate::Result<f64> {
        self.get(&MARKER_Y)
    }

    /// Reads the current sweep.
    ///
    /// Center and span are read before the samples. The three reads are not
    /// atomic: if another client retunes the instrument in between, the
    /// frequency axis does not match the samples.
    pub fn get_trace(&mut self) -> crate::Result<Trace> {
        let center = self.get_center_frequency()?;
        let span = self.get_span()?;
        let reply = self.query(TRACE_QUERY, &[])?;
        let powers = parse_csv(&reply)?;
        log::debug!("Received trace with {} points", powers.len());
        Ok(Trace::from_sweep(center, span, powers)?)
    }
}

fn reply_text(resp: ScpiResponse) -> crate::Result<String> {
    match resp {
        ScpiResponse::String(x) => Ok(x),
        ScpiResponse::Done => Err(Error::transport(anyhow::anyhow!("Query completed without a reply"))),
    }
}

fn lookup(name: &str) -> crate::Result<&'static Parameter> {
    parameter::lookup(name).ok_or_else(|| Error::argument(anyhow::anyhow!("Unknown parameter `{}`", name)))
}
