//! Evaluate functions in a remote JavaScript context and get errors whose
//! stack spans both sides.
//!
//! When evaluated code throws, the remote stack comes back with every frame of
//! the evaluated function rewritten to name the host call site that issued
//! the evaluation:
//!
//! ```text
//! Error: Test
//!     at a (evaluate at shop::checkout (src/shop.rs:98:14), <anonymous>:2:22)
//!     at evaluate (evaluate at shop::checkout (src/shop.rs:98:14), <anonymous>:13:12)
//! ```
//!
//! Start from an [`ExecutionContext`] over a [`Transport`]. Uncaught errors
//! the remote context raises on its own are delivered through [`PageErrors`].

pub mod bridge;
pub mod chain;
pub mod compose;
pub mod config;
pub mod context;
pub mod error;
pub mod protocol;
pub mod rehydrate;
pub mod transport;


pub use bridge::{ErrorSubscription, PageErrors};
pub use chain::CallChain;
pub use compose::{AnnotatedFrame, ComposedStack, FrameKind, StackComposer};
pub use config::EvalConfig;
pub use context::{EvalFuture, ExecutionContext, JsHandle};
pub use error::{EvaluateError, TransportError};
pub use rehydrate::{HostError, rehydrate};
pub use transport::{FramedTransport, Transport};

pub use evalstack_capture::{
    CallSiteRecorder, CaptureOptions, CaptureStrategy, call_site, function_name,
};
pub use evalstack_types::{
    Boundary, CallSite, EvaluateRequest, EvaluateResponse, EvaluationUrl, RemoteException,
    RemoteFrame, RemoteObject, RemoteObjectId, RemoteValue,
};

/// `target.evaluate(..)` on an [`ExecutionContext`] or [`JsHandle`], also
/// recording the name of the calling function.
///
/// ```ignore
/// let sum = evaluate!(page, "(a, b) => a + b", 1i64, 2i64).await?;
/// let nested = evaluate!(page, in &chain; "() => window.answer").await?;
/// ```
#[macro_export]
macro_rules! evaluate {
    ($target:expr, in $chain:expr; $source:expr $(, $arg:expr)* $(,)?) => {
        $target.evaluate_named(
            $chain,
            ::core::option::Option::Some($crate::function_name!()),
            $source,
            ::std::vec![$($crate::RemoteValue::from($arg)),*],
        )
    };
    ($target:expr, $source:expr $(, $arg:expr)* $(,)?) => {
        $target.evaluate_named(
            &$crate::CallChain::root(),
            ::core::option::Option::Some($crate::function_name!()),
            $source,
            ::std::vec![$($crate::RemoteValue::from($arg)),*],
        )
    };
}

/// Like [`evaluate!`], returning a [`JsHandle`].
#[macro_export]
macro_rules! evaluate_handle {
    ($target:expr, in $chain:expr; $source:expr $(, $arg:expr)* $(,)?) => {
        $target.evaluate_handle_named(
            $chain,
            ::core::option::Option::Some($crate::function_name!()),
            $source,
            ::std::vec![$($crate::RemoteValue::from($arg)),*],
        )
    };
    ($target:expr, $source:expr $(, $arg:expr)* $(,)?) => {
        $target.evaluate_handle_named(
            &$crate::CallChain::root(),
            ::core::option::Option::Some($crate::function_name!()),
            $source,
            ::std::vec![$($crate::RemoteValue::from($arg)),*],
        )
    };
}
