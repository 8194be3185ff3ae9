//! Request correlator.
//!
//! Tracks every outstanding request by id and resolves each one exactly once,
//! whichever source gets there first: a stream-delivered response, a direct
//! submission reply, its deadline, or transport teardown.
//!
//! # Thread Safety
//!
//! The pending table sits behind a single `Mutex`. Every removal happens under
//! that lock and the outcome is sent before the lock is released, so a caller
//! that finds its entry already gone can rely on the outcome being in its
//! channel.

use crate::protocol::RpcOutcome;
use crate::{Result, TransportError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

/// Stand-in deadline for timeouts too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug)]
struct PendingEntry {
    method: String,
    deadline: Instant,
    tx: oneshot::Sender<RpcOutcome>,
}

#[derive(Debug)]
struct CorrelatorInner {
    pending: Mutex<HashMap<u64, PendingEntry>>,
    next_id: AtomicU64,
}

/// Shared handle to a pending-request table. Clones share the same table.
#[derive(Debug, Clone)]
pub struct RequestCorrelator {
    inner: Arc<CorrelatorInner>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CorrelatorInner {
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Allocate the next request id. Ids increase monotonically and are never
    /// handed out twice by the same correlator.
    pub fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a pending request that resolves as timed out after `timeout`.
    pub fn register(&self, id: u64, method: &str, timeout: Duration) -> Result<PendingResponse> {
        let deadline = deadline_after(timeout);
        let (tx, rx) = oneshot::channel();

        let mut pending = self.lock();
        if pending.contains_key(&id) {
            return Err(TransportError::DuplicateRequestId(id));
        }
        pending.insert(
            id,
            PendingEntry {
                method: method.to_string(),
                deadline,
                tx,
            },
        );
        drop(pending);

        debug!("Registered request {} ({})", id, method);

        Ok(PendingResponse {
            id,
            deadline,
            rx,
            correlator: self.clone(),
        })
    }

    /// Resolve request `id` with `outcome`.
    ///
    /// Returns `false` without side effects when `id` is not pending (already
    /// resolved, timed out, cancelled, or never registered).
    pub fn resolve(&self, id: u64, outcome: RpcOutcome) -> bool {
        let mut pending = self.lock();
        match pending.remove(&id) {
            Some(entry) => {
                debug!("Resolved request {} ({})", id, entry.method);
                let _ = entry.tx.send(outcome);
                true
            }
            None => {
                debug!("Discarding response for request {}: not pending", id);
                false
            }
        }
    }

    /// Remove request `id` without delivering an outcome.
    ///
    /// Used when the submission itself failed and the caller already has the
    /// error.
    pub fn remove(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Resolve every request whose deadline has passed as timed out.
    ///
    /// Returns the number of requests expired by this sweep.
    pub fn timeout_check(&self) -> usize {
        let now = Instant::now();
        let mut pending = self.lock();

        let expired: Vec<u64> = pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(entry) = pending.remove(id) {
                debug!("Request {} ({}) timed out", id, entry.method);
                let _ = entry.tx.send(RpcOutcome::TimedOut);
            }
        }

        expired.len()
    }

    /// Resolve every pending request as cancelled and clear the table.
    pub fn cancel_all(&self) -> usize {
        let mut pending = self.lock();
        let count = pending.len();

        for (id, entry) in pending.drain() {
            debug!("Cancelling request {} ({})", id, entry.method);
            let _ = entry.tx.send(RpcOutcome::Cancelled);
        }

        count
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.lock().contains_key(&id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, PendingEntry>> {
        self.inner.pending.lock().expect("pending table lock poisoned")
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller side of a registered request.
///
/// Dropping it before resolution removes the entry from the table.
#[derive(Debug)]
pub struct PendingResponse {
    id: u64,
    deadline: Instant,
    rx: oneshot::Receiver<RpcOutcome>,
    correlator: RequestCorrelator,
}

impl PendingResponse {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the outcome. Never waits past the deadline.
    pub async fn wait(mut self) -> RpcOutcome {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without an outcome: entry was removed
            Ok(Err(_)) => RpcOutcome::Cancelled,
            Err(_) => {
                if self.correlator.remove(self.id) {
                    debug!("Request {} timed out", self.id);
                    RpcOutcome::TimedOut
                } else {
                    // Lost the race to another resolver; its outcome is already sent
                    self.rx.try_recv().unwrap_or(RpcOutcome::Cancelled)
                }
            }
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if self.correlator.remove(self.id) {
            debug!("Abandoned request {} removed", self.id);
        }
    }
}
