//! The evaluation API collaborators call.

use evalstack_capture::CallSiteRecorder;
use evalstack_types::{
    Boundary, CallSite, EvaluateRequest, EvaluateResponse, RemoteObjectId, RemoteValue,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::chain::CallChain;
use crate::compose::StackComposer;
use crate::config::EvalConfig;
use crate::error::{EvaluateError, TransportError};
use crate::protocol::build_request;
use crate::rehydrate::rehydrate;
use crate::transport::Transport;

/// Future returned by the evaluation methods. Owns everything it needs, so it
/// can be spawned.
pub type EvalFuture<T> = Pin<Box<dyn Future<Output = Result<T, EvaluateError>> + Send + 'static>>;

/// A remote JavaScript context functions can be evaluated in.
///
/// Every evaluation method records its caller (`#[track_caller]`) before the
/// returned future is first polled. When the evaluated code throws, the
/// remote stack is composed with the call sites of the evaluation's
/// [`CallChain`] and returned as [`EvaluateError::Remote`].
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: EvalConfig,
    recorder: CallSiteRecorder,
    composer: StackComposer,
}

impl ExecutionContext {
    pub fn new(transport: Arc<dyn Transport>, config: EvalConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                recorder: CallSiteRecorder::new(config.capture.clone()),
                composer: StackComposer::new(config.stack_limit),
                transport,
                config,
            }),
        }
    }

    /// Context configured from `EVALSTACK_*` environment variables.
    pub fn from_env(transport: impl Transport) -> Self {
        Self::new(Arc::new(transport), EvalConfig::from_env())
    }

    pub fn config(&self) -> &EvalConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Runs `source`, a function expression, with `arguments` and returns its
    /// result by value.
    #[track_caller]
    pub fn evaluate(&self, source: &str, arguments: Vec<RemoteValue>) -> EvalFuture<RemoteValue> {
        self.evaluate_named(&CallChain::root(), None, source, arguments)
    }

    /// Like [`evaluate`](Self::evaluate), nested under the evaluations of
    /// `parent`.
    #[track_caller]
    pub fn evaluate_in(
        &self,
        parent: &CallChain,
        source: &str,
        arguments: Vec<RemoteValue>,
    ) -> EvalFuture<RemoteValue> {
        self.evaluate_named(parent, None, source, arguments)
    }

    /// Runs `source` and returns a handle to its result.
    #[track_caller]
    pub fn evaluate_handle(&self, source: &str, arguments: Vec<RemoteValue>) -> EvalFuture<JsHandle> {
        self.evaluate_handle_named(&CallChain::root(), None, source, arguments)
    }

    #[track_caller]
    pub fn evaluate_handle_in(
        &self,
        parent: &CallChain,
        source: &str,
        arguments: Vec<RemoteValue>,
    ) -> EvalFuture<JsHandle> {
        self.evaluate_handle_named(parent, None, source, arguments)
    }

    /// Used by the [`evaluate!`](crate::evaluate) macro, which knows the name
    /// of the calling function.
    #[doc(hidden)]
    #[track_caller]
    pub fn evaluate_named(
        &self,
        parent: &CallChain,
        function_name: Option<&str>,
        source: &str,
        arguments: Vec<RemoteValue>,
    ) -> EvalFuture<RemoteValue> {
        let call = self.prepare(parent, function_name, source, arguments, Boundary::Evaluate);
        let context = self.clone();
        Box::pin(async move { context.dispatch(call).await })
    }

    #[doc(hidden)]
    #[track_caller]
    pub fn evaluate_handle_named(
        &self,
        parent: &CallChain,
        function_name: Option<&str>,
        source: &str,
        arguments: Vec<RemoteValue>,
    ) -> EvalFuture<JsHandle> {
        let call = self.prepare(
            parent,
            function_name,
            source,
            arguments,
            Boundary::EvaluateHandle,
        );
        let context = self.clone();
        Box::pin(async move {
            let value = context.dispatch(call).await?;
            Ok(JsHandle { context, value })
        })
    }

    #[track_caller]
    fn prepare(
        &self,
        parent: &CallChain,
        function_name: Option<&str>,
        source: &str,
        arguments: Vec<RemoteValue>,
        boundary: Boundary,
    ) -> PreparedCall {
        let site = self.inner.recorder.record_named(function_name);
        let request = build_request(
            source,
            arguments,
            boundary,
            &site,
            self.inner.config.embed_call_sites,
        );
        PreparedCall {
            chain: parent.push(site),
            boundary,
            request,
        }
    }

    async fn dispatch(&self, call: PreparedCall) -> Result<RemoteValue, EvaluateError> {
        let PreparedCall {
            chain,
            boundary,
            request,
        } = call;
        debug!(
            %boundary,
            depth = chain.depth(),
            call_site = %chain.innermost().cloned().unwrap_or_else(CallSite::unknown),
            "dispatching evaluation"
        );

        let response = match self.inner.config.timeout {
            Some(after) => self.send_with_timeout(request, after).await?,
            None => self.inner.transport.evaluate(request).await?,
        };

        match response {
            EvaluateResponse::Value(value) => Ok(value),
            EvaluateResponse::Exception(exception) => {
                let composed = self
                    .inner
                    .composer
                    .compose(&exception, &chain.innermost_first());
                let error = rehydrate(&exception, &composed);
                debug!(
                    name = %error.name(),
                    message = %error.message(),
                    frames = composed.frames().len(),
                    "evaluation threw"
                );
                Err(EvaluateError::Remote(error))
            }
        }
    }

    async fn send_with_timeout(
        &self,
        request: EvaluateRequest,
        after: Duration,
    ) -> Result<EvaluateResponse, TransportError> {
        match tokio::time::timeout(after, self.inner.transport.evaluate(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout { after }),
        }
    }
}

struct PreparedCall {
    chain: CallChain,
    boundary: Boundary,
    request: EvaluateRequest,
}

/// Result of [`ExecutionContext::evaluate_handle`].
///
/// Evaluating through a handle passes its value as the first argument, ahead
/// of the caller's own arguments.
#[derive(Clone)]
pub struct JsHandle {
    context: ExecutionContext,
    value: RemoteValue,
}

impl JsHandle {
    pub fn value(&self) -> &RemoteValue {
        &self.value
    }

    pub fn object_id(&self) -> Option<&RemoteObjectId> {
        self.value.object_id()
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    #[track_caller]
    pub fn evaluate(&self, source: &str, arguments: Vec<RemoteValue>) -> EvalFuture<RemoteValue> {
        self.evaluate_named(&CallChain::root(), None, source, arguments)
    }

    #[track_caller]
    pub fn evaluate_in(
        &self,
        parent: &CallChain,
        source: &str,
        arguments: Vec<RemoteValue>,
    ) -> EvalFuture<RemoteValue> {
        self.evaluate_named(parent, None, source, arguments)
    }

    #[track_caller]
    pub fn evaluate_handle(&self, source: &str, arguments: Vec<RemoteValue>) -> EvalFuture<JsHandle> {
        self.evaluate_handle_named(&CallChain::root(), None, source, arguments)
    }

    #[track_caller]
    pub fn evaluate_handle_in(
        &self,
        parent: &CallChain,
        source: &str,
        arguments: Vec<RemoteValue>,
    ) -> EvalFuture<JsHandle> {
        self.evaluate_handle_named(parent, None, source, arguments)
    }

    #[doc(hidden)]
    #[track_caller]
    pub fn evaluate_named(
        &self,
        parent: &CallChain,
        function_name: Option<&str>,
        source: &str,
        arguments: Vec<RemoteValue>,
    ) -> EvalFuture<RemoteValue> {
        self.context
            .evaluate_named(parent, function_name, source, self.with_self(arguments))
    }

    #[doc(hidden)]
    #[track_caller]
    pub fn evaluate_handle_named(
        &self,
        parent: &CallChain,
        function_name: Option<&str>,
        source: &str,
        arguments: Vec<RemoteValue>,
    ) -> EvalFuture<JsHandle> {
        self.context
            .evaluate_handle_named(parent, function_name, source, self.with_self(arguments))
    }

    /// Releases the remote object. By-value handles have nothing to release.
    pub async fn dispose(self) -> Result<(), TransportError> {
        let Some(object_id) = self.value.object_id().cloned() else {
            return Ok(());
        };
        debug!(%object_id, "releasing remote object");
        self.context.inner.transport.release(object_id).await
    }

    fn with_self(&self, arguments: Vec<RemoteValue>) -> Vec<RemoteValue> {
        let mut all = Vec::with_capacity(arguments.len() + 1);
        all.push(self.value.clone());
        all.extend(arguments);
        all
    }
}

impl std::fmt::Debug for JsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsHandle").field("value", &self.value).finish()
    }
}
