use std::{io, sync::Arc};

use thiserror::Error;

#[derive(Error, Clone, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(Arc<io::Error>),
    #[error("Timeout")]
    Timeout,
    #[error("{0}")]
    Other(Arc<anyhow::Error>),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::TimedOut {
            TransportError::Timeout
        } else {
            TransportError::Io(Arc::new(err))
        }
    }
}

impl From<anyhow::Error> for TransportError {
    fn from(x: anyhow::Error) -> Self {
        TransportError::Other(Arc::new(x))
    }
}

/// Reasons why an instrument response could not be decoded.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum ParseError {
    #[error("No numeric value in response `{0}`")]
    NoNumericValue(String),
    #[error("Trace response contains no values")]
    EmptyTrace,
    #[error("Invalid trace value `{value}` at index {index}")]
    InvalidTraceValue { index: usize, value: String },
    #[error("Response is not valid UTF-8")]
    Encoding,
}

#[derive(Error, Clone, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(Arc<anyhow::Error>),
    #[error("Instrument is not connected")]
    NotConnected,
    #[error("Connection Error: {0}")]
    Connection(TransportError),
    #[error("Transport Error: {0}")]
    Transport(TransportError),
    #[error("Parse Error: {0}")]
    Parse(ParseError),
}

impl Error {
    pub fn argument<T: Into<anyhow::Error>>(err: T) -> Self {
        Self::InvalidArgument(Arc::new(err.into()))
    }

    pub fn connection<T: Into<TransportError>>(err: T) -> Self {
        Self::Connection(err.into())
    }

    pub fn transport<T: Into<TransportError>>(err: T) -> Self {
        Self::Transport(err.into())
    }

    pub fn protocol_timeout() -> Self {
        Error::Transport(TransportError::Timeout)
    }

    /// Whether repeating the failed call could plausibly succeed.
    ///
    /// The driver itself never retries. This is a hint for callers that wrap
    /// requests in their own retry policy.
    pub fn should_retry(&self) -> bool {
        match self {
            Error::Transport(TransportError::Io(err)) | Error::Connection(TransportError::Io(err)) => {
                err.kind() == io::ErrorKind::ConnectionReset
                    || err.kind() == io::ErrorKind::ConnectionAborted
                    || err.kind() == io::ErrorKind::BrokenPipe
                    || err.kind() == io::ErrorKind::Interrupted
                    || err.kind() == io::ErrorKind::UnexpectedEof
            }
            Error::Transport(TransportError::Timeout) => true,
            Error::Transport(TransportError::Other(_)) => false,
            Error::Connection(_) => false,
            Error::InvalidArgument(_) => false,
            Error::NotConnected => false,
            Error::Parse(_) => false,
        }
    }
}

impl From<ParseError> for Error {
    fn from(x: ParseError) -> Self {
        Error::Parse(x)
    }
}

impl From<io::Error> for Error {
    fn from(x: io::Error) -> Self {
        Error::transport(x)
    }
}
