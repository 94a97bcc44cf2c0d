use async_trait::async_trait;
use evalstack_types::{
    ClientMessage, EvaluateRequest, EvaluateResponse, MAX_FRAME_LEN, RemoteMessage,
    RemoteObjectId, RequestId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Transport, read_frame, write_frame};
use crate::bridge::PageErrors;
use crate::error::TransportError;

type Waiter = oneshot::Sender<Result<EvaluateResponse, TransportError>>;

/// [`Transport`] over any byte stream, one facet-json message per
/// length-prefixed frame.
///
/// A background task reads [`RemoteMessage`]s: responses are routed to the
/// evaluation waiting on their id, uncaught errors go to [`PageErrors`].
/// Responses nobody waits for any more (the caller dropped the evaluation, or
/// [`abandon_pending`](Self::abandon_pending) ran) are discarded.
///
/// Outgoing frames are written by a second task that owns the write half.
/// Evaluations only enqueue, so dropping one never leaves a partial frame
/// on the stream.
pub struct FramedTransport {
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

struct Shared {
    state: Mutex<PendingState>,
    page_errors: PageErrors,
}

#[derive(Default)]
struct PendingState {
    waiters: HashMap<RequestId, Waiter>,
    /// Set once either half is gone; later evaluations fail fast with it.
    closed: Option<TransportError>,
}

impl FramedTransport {
    /// Must be called within a Tokio runtime.
    pub fn new<R, W>(reader: R, writer: W, page_errors: PageErrors) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(PendingState::default()),
            page_errors,
        });
        let (outgoing, queued) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&shared)));
        let writer_task = tokio::spawn(write_loop(writer, queued, Arc::clone(&shared)));
        Self {
            shared,
            outgoing,
            reader_task,
            writer_task,
        }
    }

    pub fn from_stream<S>(stream: S, page_errors: PageErrors) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer, page_errors)
    }

    pub fn page_errors(&self) -> &PageErrors {
        &self.shared.page_errors
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().waiters.len()
    }

    /// Fails every in-flight evaluation with [`TransportError::Cancelled`].
    /// Their responses are dropped when they arrive. Returns how many were
    /// abandoned.
    pub fn abandon_pending(&self) -> usize {
        let waiters: Vec<Waiter> = {
            let mut state = self.shared.state.lock();
            state.waiters.drain().map(|(_, waiter)| waiter).collect()
        };
        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(Err(TransportError::Cancelled));
        }
        if count > 0 {
            info!(count, "abandoned in-flight evaluations");
        }
        count
    }

    /// Encodes and queues one message for the writer task.
    fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        let bytes =
            facet_json::to_vec(message).map_err(|e| TransportError::Codec(e.to_string()))?;
        // Oversized frames are refused here so they never reach the writer.
        if bytes.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge {
                len: bytes.len(),
                max: MAX_FRAME_LEN,
            });
        }
        self.outgoing.send(bytes).map_err(|_| {
            self.shared
                .state
                .lock()
                .closed
                .clone()
                .unwrap_or(TransportError::Disconnected)
        })
    }
}

impl Drop for FramedTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

/// Removes the waiter if the evaluation future is dropped before its
/// response arrives.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.shared.state.lock().waiters.remove(&self.id).is_some() {
            debug!(request_id = %self.id, "evaluation abandoned by caller");
        }
    }
}

#[async_trait]
impl Transport for FramedTransport {
    async fn evaluate(&self, request: EvaluateRequest) -> Result<EvaluateResponse, TransportError> {
        let id = RequestId::next_process_local();
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.shared.state.lock();
            if let Some(reason) = &state.closed {
                return Err(reason.clone());
            }
            state.waiters.insert(id, tx);
        }
        let _guard = PendingGuard {
            shared: &self.shared,
            id,
        };

        self.send(&ClientMessage::Evaluate { id, request })?;
        debug!(request_id = %id, "evaluation queued");

        rx.await.map_err(|_| TransportError::Cancelled)?
    }

    async fn release(&self, object_id: RemoteObjectId) -> Result<(), TransportError> {
        self.send(&ClientMessage::Release { object_id })
    }
}

async fn read_loop<R>(mut reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Send + Unpin,
{
    let reason = loop {
        let frame = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(err) => break err,
        };
        debug!(frame_len = frame.len(), "received remote frame");

        let message: RemoteMessage = match facet_json::from_slice(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(%e, "failed to deserialize remote message");
                continue;
            }
        };
        shared.route(message);
    };

    match &reason {
        TransportError::Disconnected => info!("remote context disconnected"),
        other => warn!(error = %other, "remote read loop stopped"),
    }
    shared.close(reason);
}

async fn write_loop<W>(
    mut writer: W,
    mut queued: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<Shared>,
) where
    W: AsyncWrite + Send + Unpin,
{
    while let Some(bytes) = queued.recv().await {
        match write_frame(&mut writer, &bytes).await {
            Ok(written) => debug!(frame_len = written, "sent client frame"),
            Err(err) => {
                warn!(error = %err, "remote write loop stopped");
                shared.close(err);
                return;
            }
        }
    }
}

impl Shared {
    fn route(&self, message: RemoteMessage) {
        match message {
            RemoteMessage::Response { id, response } => {
                let waiter = self.state.lock().waiters.remove(&id);
                match waiter {
                    Some(waiter) => {
                        if waiter.send(Ok(response)).is_err() {
                            debug!(request_id = %id, "caller went away before the response");
                        }
                    }
                    None => debug!(request_id = %id, "discarding response for abandoned evaluation"),
                }
            }
            RemoteMessage::UncaughtError { exception } => {
                self.page_errors.notify(&exception);
            }
        }
    }

    fn close(&self, reason: TransportError) {
        let waiters: Vec<Waiter> = {
            let mut state = self.state.lock();
            if state.closed.is_none() {
                state.closed = Some(reason.clone());
            }
            state.waiters.drain().map(|(_, waiter)| waiter).collect()
        };
        for waiter in waiters {
            let _ = waiter.send(Err(reason.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalstack_types::{RemoteException, RemoteFrame, RemoteValue};
    use std::time::Duration;
    use tokio::io::DuplexStream;

    fn request(expression: &str) -> EvaluateRequest {
        EvaluateRequest {
            expression: expression.to_string(),
            arguments: vec![],
            return_by_value: true,
            await_promise: true,
        }
    }

    async fn next_client_message(remote: &mut DuplexStream) -> ClientMessage {
        let frame = read_frame(remote).await.expect("client frame");
        facet_json::from_slice(&frame).expect("client message")
    }

    async fn send_remote_message(remote: &mut DuplexStream, message: &RemoteMessage) {
        let bytes = facet_json::to_vec(message).expect("encode");
        write_frame(remote, &bytes).await.expect("write");
    }

    async fn wait_for_pending(transport: &FramedTransport, count: usize) {
        for _ in 0..500 {
            if transport.pending_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("expected {count} pending evaluations, have {}", transport.pending_count());
    }

    fn answer(message: ClientMessage) -> RemoteMessage {
        match message {
            ClientMessage::Evaluate { id, request } => RemoteMessage::Response {
                id,
                response: EvaluateResponse::Value(RemoteValue::from(request.expression)),
            },
            other => panic!("expected an evaluation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn out_of_order_responses_reach_their_callers() {
        let (host, mut remote) = tokio::io::duplex(64 * 1024);
        let transport = Arc::new(FramedTransport::from_stream(host, PageErrors::default()));

        let first = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.evaluate(request("() => 'first'")).await }
        });
        let first_message = next_client_message(&mut remote).await;
        let second = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.evaluate(request("() => 'second'")).await }
        });
        let second_message = next_client_message(&mut remote).await;

        send_remote_message(&mut remote, &answer(second_message)).await;
        send_remote_message(&mut remote, &answer(first_message)).await;

        let first = first.await.expect("join").expect("response");
        let second = second.await.expect("join").expect("response");
        assert_eq!(first, EvaluateResponse::Value(RemoteValue::from("() => 'first'")));
        assert_eq!(second, EvaluateResponse::Value(RemoteValue::from("() => 'second'")));
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn uncaught_errors_go_to_page_errors() {
        let (host, mut remote) = tokio::io::duplex(64 * 1024);
        let page_errors = PageErrors::default();
        let mut rx = page_errors.subscribe();
        let _transport = FramedTransport::from_stream(host, page_errors);

        let exception = RemoteException::error(
            "TypeError",
            "x is undefined",
            vec![RemoteFrame::new("tick", "https://example.test/app.js", 10, 4)],
        );
        send_remote_message(&mut remote, &RemoteMessage::UncaughtError { exception }).await;

        let error = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("page error in time")
            .expect("subscribed");
        assert_eq!(error.stack(), "TypeError: x is undefined");
    }

    #[tokio::test]
    async fn disconnect_fails_pending_and_later_evaluations() {
        let (host, mut remote) = tokio::io::duplex(64 * 1024);
        let transport = Arc::new(FramedTransport::from_stream(host, PageErrors::default()));

        let pending = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.evaluate(request("() => 1")).await }
        });
        next_client_message(&mut remote).await;
        drop(remote);

        assert_eq!(
            pending.await.expect("join"),
            Err(TransportError::Disconnected)
        );
        assert_eq!(
            transport.evaluate(request("() => 2")).await,
            Err(TransportError::Disconnected)
        );
    }

    #[tokio::test]
    async fn abandoned_evaluations_discard_late_responses() {
        let (host, mut remote) = tokio::io::duplex(64 * 1024);
        let transport = Arc::new(FramedTransport::from_stream(host, PageErrors::default()));

        let abandoned = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.evaluate(request("() => 'late'")).await }
        });
        let late = next_client_message(&mut remote).await;
        wait_for_pending(&transport, 1).await;

        assert_eq!(transport.abandon_pending(), 1);
        assert_eq!(abandoned.await.expect("join"), Err(TransportError::Cancelled));

        // The late response finds no waiter; the connection keeps working.
        send_remote_message(&mut remote, &answer(late)).await;
        let next = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.evaluate(request("() => 'next'")).await }
        });
        let message = next_client_message(&mut remote).await;
        send_remote_message(&mut remote, &answer(message)).await;

        assert_eq!(
            next.await.expect("join"),
            Ok(EvaluateResponse::Value(RemoteValue::from("() => 'next'")))
        );
    }

    #[tokio::test]
    async fn dropping_an_evaluation_forgets_its_waiter() {
        let (host, mut remote) = tokio::io::duplex(64 * 1024);
        let transport = FramedTransport::from_stream(host, PageErrors::default());

        let outcome =
            tokio::time::timeout(Duration::from_millis(20), transport.evaluate(request("() => 1")))
                .await;
        assert!(outcome.is_err());
        assert_eq!(transport.pending_count(), 0);

        let ClientMessage::Evaluate { request, .. } = next_client_message(&mut remote).await else {
            panic!("expected an evaluation");
        };
        assert_eq!(request.expression, "() => 1");
    }

    #[tokio::test]
    async fn timed_out_evaluation_leaves_the_stream_usable() {
        // The first frame is far larger than the pipe, so it is still being
        // written when the timeout fires.
        let (host, mut remote) = tokio::io::duplex(256);
        let transport = Arc::new(FramedTransport::from_stream(host, PageErrors::default()));
        let large = format!("() => '{}'", "x".repeat(4096));

        let outcome =
            tokio::time::timeout(Duration::from_millis(50), transport.evaluate(request(&large)))
                .await;
        assert!(outcome.is_err());
        assert_eq!(transport.pending_count(), 0);

        let next = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.evaluate(request("() => 'next'")).await }
        });

        let ClientMessage::Evaluate { request: first, .. } = next_client_message(&mut remote).await
        else {
            panic!("expected the timed-out evaluation");
        };
        assert_eq!(first.expression, large);

        let message = tokio::time::timeout(Duration::from_secs(5), next_client_message(&mut remote))
            .await
            .expect("second frame in time");
        send_remote_message(&mut remote, &answer(message)).await;

        assert_eq!(
            next.await.expect("join"),
            Ok(EvaluateResponse::Value(RemoteValue::from("() => 'next'")))
        );
    }

    #[tokio::test]
    async fn release_is_sent_to_the_remote() {
        let (host, mut remote) = tokio::io::duplex(64 * 1024);
        let transport = FramedTransport::from_stream(host, PageErrors::default());
        let object_id = RemoteObjectId::new("obj-7").expect("valid id");

        transport.release(object_id.clone()).await.expect("sent");

        assert_eq!(
            next_client_message(&mut remote).await,
            ClientMessage::Release { object_id }
        );
    }
}
