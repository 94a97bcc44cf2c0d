use std::error::Error;
use std::fmt;
use std::time::Duration;

use crate::rehydrate::HostError;

/// The channel to the remote context failed; says nothing about the code
/// that was being evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The remote end closed the connection.
    Disconnected,
    /// No response within the configured timeout.
    Timeout { after: Duration },
    /// The host gave up on the evaluation, e.g. because the page navigated.
    Cancelled,
    Io(String),
    Codec(String),
    FrameTooLarge { len: usize, max: usize },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "remote context disconnected"),
            Self::Timeout { after } => {
                write!(f, "no response from remote context after {}ms", after.as_millis())
            }
            Self::Cancelled => write!(f, "evaluation was abandoned before a response arrived"),
            Self::Io(e) => write!(f, "transport i/o failed: {e}"),
            Self::Codec(e) => write!(f, "failed to encode or decode a frame: {e}"),
            Self::FrameTooLarge { len, max } => {
                write!(f, "frame too large: {len} bytes (max {max})")
            }
        }
    }
}

impl Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => Self::Disconnected,
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Why an `evaluate` / `evaluateHandle` call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluateError {
    /// The evaluated code threw (or rejected); carries the composed error.
    Remote(HostError),
    Transport(TransportError),
}

impl EvaluateError {
    /// Transport failures may be worth retrying; remote throws are not.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn as_remote(&self) -> Option<&HostError> {
        match self {
            Self::Remote(error) => Some(error),
            Self::Transport(_) => None,
        }
    }

    pub fn into_remote(self) -> Option<HostError> {
        match self {
            Self::Remote(error) => Some(error),
            Self::Transport(_) => None,
        }
    }
}

impl fmt::Display for EvaluateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(error) => write!(f, "{error}"),
            Self::Transport(error) => write!(f, "{error}"),
        }
    }
}

impl Error for EvaluateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Remote(error) => Some(error),
            Self::Transport(error) => Some(error),
        }
    }
}

impl From<HostError> for EvaluateError {
    fn from(error: HostError) -> Self {
        Self::Remote(error)
    }
}

impl From<TransportError> for EvaluateError {
    fn from(error: TransportError) -> Self {
        Self::Transport(error)
    }
}
