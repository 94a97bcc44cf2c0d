//! Types shared across evalstack's evaluation pipeline.
//!
//! Everything that crosses the host ↔ remote-context channel lives here:
//! the host [`CallSite`] recorded when an evaluation is issued, the
//! [`RemoteFrame`]s and [`RemoteException`] reported back when the remote
//! code throws, and the [`EvaluateRequest`] / [`EvaluateResponse`] pair
//! exchanged for each evaluation.

use facet::Facet;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

mod call_site;
mod protocol;
mod remote;
mod url;

pub use call_site::*;
pub use protocol::*;
pub use remote::*;
pub use url::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    ZeroId(&'static str),
    EmptyField(&'static str),
    MalformedSite { site: String },
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroId(field) => write!(f, "{field} must be non-zero"),
            Self::EmptyField(field) => write!(f, "{field} must be non-empty"),
            Self::MalformedSite { site } => {
                write!(f, "call site must look like `name (file:line:column)`, got {site:?}")
            }
        }
    }
}

impl Error for InvariantError {}

/// Identifies one in-flight evaluation on a transport.
#[derive(Facet, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[facet(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(value: u64) -> Result<Self, InvariantError> {
        if value == 0 {
            return Err(InvariantError::ZeroId("request_id"));
        }
        Ok(Self(value))
    }

    pub fn next_process_local() -> Self {
        static NEXT_COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to an object that stays alive inside the remote context.
#[derive(Facet, Debug, Clone, PartialEq, Eq, Hash)]
#[facet(transparent)]
pub struct RemoteObjectId(String);

impl RemoteObjectId {
    pub fn new(value: impl Into<String>) -> Result<Self, InvariantError> {
        let value = value.into();
        if value.is_empty() {
            return Err(InvariantError::EmptyField("object_id"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
