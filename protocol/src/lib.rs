//! # Protocol types for the `specan` spectrum analyzer driver
//!
//! Everything in here is free of I/O: the error taxonomy shared by the driver,
//! SCPI command formatting and reply parsing, the table of instrument
//! parameters and the derivation of a [`Trace`] from raw sweep data.

pub mod error;
pub mod parameter;
pub mod scpi;
pub mod trace;

pub use crate::error::{Error, ParseError, TransportError};
pub use crate::parameter::{Access, Encoding, Parameter, PARAMETERS};
pub use crate::scpi::{Arg, ScpiRequest, ScpiResponse};
pub use crate::trace::Trace;

pub type Result<T> = std::result::Result<T, Error>;
