//! Sharing of identical in-flight requests.
//!
//! The first caller for a key starts the work on a spawned task; later
//! callers join the same shared outcome. Each caller holds one reference.
//! A caller whose signal fires (or whose future is dropped) gives its
//! reference back; when none remain the task is aborted, which drops the
//! transport call, and the entry disappears.
//!
//! Every map read and its conditional write happen under one lock with no
//! `.await` in between.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::signal::{AbortSignal, cancelled};

type SharedOutcome<V> = Shared<BoxFuture<'static, Result<V>>>;

struct PendingRequest<V: Clone> {
    id: u64,
    outcome: SharedOutcome<V>,
    task: AbortHandle,
    refs: usize,
}

type PendingMap<V> = HashMap<String, PendingRequest<V>>;

pub struct DedupRegistry<V: Clone> {
    pending: Arc<Mutex<PendingMap<V>>>,
    next_id: AtomicU64,
}

impl<V> DedupRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Join the in-flight request for `key`, or start one with `factory`.
    ///
    /// `factory` runs at most once per key per flight and is not given the
    /// caller's signal: the work belongs to every joined caller, and is only
    /// aborted once all of them have let go.
    pub async fn get_or_join<F, Fut>(&self, key: &str, factory: F, signal: Option<&AbortSignal>) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        if signal.is_some_and(AbortSignal::is_aborted) {
            return Err(ClientError::Cancelled);
        }

        let (id, outcome) = {
            let mut pending = lock(&self.pending);
            match pending.entry(key.to_string()) {
                Entry::Occupied(mut entry) => {
                    let entry = entry.get_mut();
                    entry.refs += 1;
                    debug!(key, refs = entry.refs, "joined in-flight request");
                    (entry.id, entry.outcome.clone())
                }
                Entry::Vacant(slot) => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let (task, outcome) = spawn_flight(Arc::clone(&self.pending), key.to_string(), id, factory());
                    slot.insert(PendingRequest {
                        id,
                        outcome: outcome.clone(),
                        task,
                        refs: 1,
                    });
                    (id, outcome)
                }
            }
        };

        let mut guard = Membership {
            pending: &self.pending,
            key,
            id,
            settled: false,
        };

        let result = tokio::select! {
            biased;
            result = outcome => result,
            _ = cancelled(signal) => Err(ClientError::Cancelled),
        };
        if !result.as_ref().is_err_and(ClientError::is_cancelled) {
            guard.settled = true;
        }
        result
    }

    /// Number of distinct requests currently in flight.
    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_pending(&self, key: &str) -> bool {
        lock(&self.pending).contains_key(key)
    }

    /// Callers currently sharing `key`.
    pub fn refs(&self, key: &str) -> usize {
        lock(&self.pending).get(key).map(|p| p.refs).unwrap_or(0)
    }

    /// Abort every in-flight request; joined callers observe cancellation.
    pub fn clear(&self) {
        let drained: Vec<_> = lock(&self.pending).drain().collect();
        for (_, request) in drained {
            request.task.abort();
        }
    }
}

impl<V> Default for DedupRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn lock<V: Clone>(pending: &Mutex<PendingMap<V>>) -> MutexGuard<'_, PendingMap<V>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Start the work on its own task so it progresses regardless of which
/// callers are being polled. The entry is removed as soon as the work
/// settles, success or failure.
fn spawn_flight<V, Fut>(
    pending: Arc<Mutex<PendingMap<V>>>,
    key: String,
    id: u64,
    work: Fut,
) -> (AbortHandle, SharedOutcome<V>)
where
    V: Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<V>> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let result = work.await;
        remove_if_current(&pending, &key, id);
        result
    });
    let task = handle.abort_handle();

    let outcome = async move {
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(ClientError::Cancelled),
            Err(e) => Err(ClientError::network(format!("request task failed: {e}"))),
        }
    }
    .boxed()
    .shared();

    (task, outcome)
}

fn remove_if_current<V: Clone>(pending: &Mutex<PendingMap<V>>, key: &str, id: u64) {
    let mut pending = lock(pending);
    if pending.get(key).is_some_and(|p| p.id == id) {
        pending.remove(key);
    }
}

/// One caller's reference to a pending request.
struct Membership<'a, V: Clone> {
    pending: &'a Mutex<PendingMap<V>>,
    key: &'a str,
    id: u64,
    settled: bool,
}

impl<V: Clone> Drop for Membership<'_, V> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let mut pending = lock(self.pending);
        let Some(request) = pending.get_mut(self.key).filter(|p| p.id == self.id) else {
            return;
        };

        request.refs = request.refs.saturating_sub(1);
        if request.refs == 0 {
            debug!(key = self.key, "last caller left, aborting request");
            request.task.abort();
            pending.remove(self.key);
        }
    }
}
