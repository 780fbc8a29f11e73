//! Guard for calls that leave the process.
//!
//! Every lookup, LMS request and notification runs through a [`CallContext`], which
//! bounds it by the configured timeout and aborts it when the caller's
//! [`CancellationSignal`] fires. Dropping the losing future is what cancels the
//! underlying request.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExternalCallError {
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("{operation} was cancelled")]
    Cancelled { operation: &'static str },
}

/// Caller-side cancellation, e.g. a dropped HTTP request.
///
/// The default signal never fires.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancellationSignal {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested. Pending forever otherwise.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling.
                return std::future::pending().await;
            }
        }
    }
}

#[derive(Debug)]
pub struct CancellationHandle {
    tx: watch::Sender<bool>,
}

impl CancellationHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Create a linked handle/signal pair.
pub fn cancellation_pair() -> (CancellationHandle, CancellationSignal) {
    let (tx, rx) = watch::channel(false);
    (CancellationHandle { tx }, CancellationSignal { rx: Some(rx) })
}

/// Timeout and cancellation applied to one orchestrator operation's external calls.
#[derive(Debug, Clone)]
pub struct CallContext {
    timeout: Duration,
    cancel: CancellationSignal,
}

impl CallContext {
    pub fn new(timeout: Duration, cancel: CancellationSignal) -> Self {
        Self { timeout, cancel }
    }

    /// Run `fut`, giving up on timeout or cancellation.
    pub async fn run<F, T>(&self, operation: &'static str, fut: F) -> Result<T, ExternalCallError>
    where
        F: Future<Output = T>,
    {
        if self.cancel.is_cancelled() {
            return Err(ExternalCallError::Cancelled { operation });
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ExternalCallError::Cancelled { operation }),
            res = tokio::time::timeout(self.timeout, fut) => res.map_err(|_| ExternalCallError::Timeout {
                operation,
                timeout: self.timeout,
            }),
        }
    }
}

/// Shared, ordered log of side-effect calls made by in-memory adapters.
///
/// Lets tests assert on the order in which the orchestrator reached each external
/// system.
#[derive(Debug, Clone, Default)]
pub struct CallJournal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry.into());
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}
