/// Declarative description of the analyzer settings reachable over SCPI.
///
/// Each entry carries the SCPI node, the numeric format the instrument
/// accepts for it and whether it can be written. The driver never needs a
/// per-parameter code path: setting is `<path> <encoded value>`, reading is
/// `<path>?` followed by parsing the first numeric token of the reply.
use anyhow::anyhow;

use crate::scpi::parse_scalar;
use crate::Error;

/// Query returning the raw samples of the current sweep.
pub const TRACE_QUERY: &str = ":TRACE:DATA? RAWTRACE";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// `%.9e`, accepted by every frequency node.
    Scientific,
    /// `%.0f`, the bandwidth node only takes whole hertz.
    WholeHz,
}

impl Encoding {
    pub fn spec(&self) -> &'static str {
        match self {
            Encoding::Scientific => "%.9e",
            Encoding::WholeHz => "%.0f",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    ReadOnly,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Parameter {
    pub name: &'static str,
    pub path: &'static str,
    pub encoding: Encoding,
    pub access: Access,
    pub unit: &'static str,
}

impl Parameter {
    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }

    pub fn set_template(&self) -> crate::Result<String> {
        if !self.is_writable() {
            return Err(Error::argument(anyhow!("Parameter `{}` is read-only", self.name)));
        }
        Ok(format!("{} {}", self.path, self.encoding.spec()))
    }

    pub fn query_template(&self) -> String {
        format!("{}?", self.path)
    }

    pub fn decode(&self, response: &str) -> crate::Result<f64> {
        Ok(parse_scalar(response)?)
    }
}

pub const CENTER_FREQUENCY: Parameter = Parameter {
    name: "center",
    path: ":freq:cent",
    encoding: Encoding::Scientific,
    access: Access::ReadWrite,
    unit: "Hz",
};

pub const SPAN: Parameter = Parameter {
    name: "span",
    path: ":freq:span",
    encoding: Encoding::Scientific,
    access: Access::ReadWrite,
    unit: "Hz",
};

pub const RESOLUTION_BANDWIDTH: Parameter = Parameter {
    name: "bandwidth",
    path: ":band:res",
    encoding: Encoding::WholeHz,
    access: Access::ReadWrite,
    unit: "Hz",
};

pub const MARKER_X: Parameter = Parameter {
    name: "marker-x",
    path: ":calc:mark1:x",
    encoding: Encoding::Scientific,
    access: Access::ReadWrite,
    unit: "Hz",
};

// Marker Y follows from the marker position on the trace.
pub const MARKER_Y: Parameter = Parameter {
    name: "marker-y",
    path: ":calc:mark1:y",
    encoding: Encoding::Scientific,
    access: Access::ReadOnly,
    unit: "dBm",
};

pub static PARAMETERS: [Parameter; 5] = [
    CENTER_FREQUENCY,
    SPAN,
    RESOLUTION_BANDWIDTH,
    MARKER_X,
    MARKER_Y,
];

pub fn lookup(name: &str) -> Option<&'static Parameter> {
    let name = name.to_lowercase();
    PARAMETERS.iter().find(|x| x.name == name)
}
