//! Page-error notifications for remote failures nobody awaited.
//!
//! Uncaught exceptions and unhandled promise rejections in the remote context
//! are not tied to any evaluation, so no host call site can be linked to
//! them: the emitted [`HostError`] carries the header line only.

use evalstack_types::RemoteException;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::compose::ComposedStack;
use crate::rehydrate::{HostError, rehydrate};

pub const DEFAULT_PAGE_ERROR_CAPACITY: usize = 64;

/// Fan-out point for asynchronous remote errors.
///
/// [`notify`](Self::notify) never blocks, so a transport can call it from its
/// read loop while ordinary responses keep flowing.
#[derive(Clone)]
pub struct PageErrors {
    tx: broadcast::Sender<HostError>,
}

impl Default for PageErrors {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_ERROR_CAPACITY)
    }
}

impl PageErrors {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostError> {
        self.tx.subscribe()
    }

    /// Calls `callback` once per uncaught remote error until the returned
    /// subscription is dropped. Must be called within a Tokio runtime.
    pub fn on_remote_uncaught_error<F>(&self, callback: F) -> ErrorSubscription
    where
        F: Fn(HostError) + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(error) => callback(error),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "page error subscriber lagged; notifications dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        ErrorSubscription { task }
    }

    /// Rehydrates `exception` and hands it to every subscriber.
    pub fn notify(&self, exception: &RemoteException) -> HostError {
        let error = rehydrate(exception, &ComposedStack::header_only(exception));
        debug!(name = %error.name(), message = %error.message(), "remote uncaught error");
        if self.tx.send(error.clone()).is_err() {
            debug!("no page error subscribers");
        }
        error
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Keeps a page-error callback registered. Dropping it unregisters.
pub struct ErrorSubscription {
    task: JoinHandle<()>,
}

impl ErrorSubscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ErrorSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
