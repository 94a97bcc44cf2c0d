use facet::Facet;

use crate::{RemoteException, RemoteObjectId, RemoteValue, RequestId};

/// Frames larger than this are rejected by both ends of a framed transport.
pub const MAX_FRAME_LEN: usize = 128 * 1024 * 1024;

/// Asks the remote context to call a function.
///
/// `expression` is a parenthesized function expression followed by a
/// `//# sourceURL=` comment naming the evaluation, see
/// [`EvaluationUrl`](crate::EvaluationUrl). The remote side invokes it with
/// `arguments` from inside its internal helper script.
#[derive(Facet, Debug, Clone, PartialEq)]
pub struct EvaluateRequest {
    pub expression: String,
    pub arguments: Vec<RemoteValue>,
    /// `true` for `evaluate`, `false` for `evaluateHandle`.
    pub return_by_value: bool,
    pub await_promise: bool,
}

#[derive(Facet, Debug, Clone, PartialEq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum EvaluateResponse {
    Value(RemoteValue),
    Exception(RemoteException),
}

impl EvaluateResponse {
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception(_))
    }
}

/// Host → remote frames.
#[derive(Facet, Debug, Clone, PartialEq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum ClientMessage {
    Evaluate {
        id: RequestId,
        request: EvaluateRequest,
    },
    Release {
        object_id: RemoteObjectId,
    },
}

/// Remote → host frames.
#[derive(Facet, Debug, Clone, PartialEq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum RemoteMessage {
    Response {
        id: RequestId,
        response: EvaluateResponse,
    },
    /// Uncaught exception or unhandled rejection not tied to any request.
    UncaughtError { exception: RemoteException },
}
