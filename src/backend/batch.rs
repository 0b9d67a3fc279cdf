//! Request coalescing for the generative backend.
//!
//! Identical requests (same cache key) arriving within the batching window
//! are grouped behind a single upstream call; every caller still receives
//! its own resolved value. The guarantee is at-most-one outstanding upstream
//! call per distinct key: late arrivals attach to the in-flight call even
//! after the window has elapsed, until it resolves.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::BackendError;

type Waiters<V> = Vec<oneshot::Sender<Result<V, BackendError>>>;

/// Coalesces identical in-flight requests.
#[derive(Debug)]
pub struct Batcher<V> {
    window: Duration,
    pending: Arc<Mutex<HashMap<String, Waiters<V>>>>,
}

impl<V: Clone + Send + 'static> Batcher<V> {
    /// Create a batcher with the given coalescing window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of keys with an outstanding upstream call.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    /// Submit a request under `key`.
    ///
    /// The first caller for a key becomes the leader: after the window
    /// elapses, `upstream` runs exactly once and its result is fanned out to
    /// every waiter registered for the key in the meantime. Followers never
    /// invoke `upstream`.
    pub async fn submit<F, Fut>(&self, key: String, upstream: F) -> Result<V, BackendError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, BackendError>> + Send,
    {
        let (tx, rx) = oneshot::channel();

        let is_leader = {
            let mut pending = self.pending.lock();
            match pending.get_mut(&key) {
                Some(waiters) => {
                    waiters.push(tx);
                    false
                }
                None => {
                    pending.insert(key.clone(), vec![tx]);
                    true
                }
            }
        };

        if is_leader {
            let pending = Arc::clone(&self.pending);
            let window = self.window;
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                let result = upstream().await;
                let waiters = pending.lock().remove(&key).unwrap_or_default();
                debug!(waiters = waiters.len(), "fanning out batched result");
                for waiter in waiters {
                    let _ = waiter.send(result.clone());
                }
            });
        }

        rx.await
            .unwrap_or_else(|_| Err(BackendError::Unavailable("batched call dropped".into())))
    }
}
