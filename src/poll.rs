//! Polling refresh loop.
//!
//! DESIGN
//! ======
//! A ticker task fires on a fixed cadence (first tick immediate, missed ticks
//! skipped). Each tick spawns its own fetch tagged with a monotonically
//! increasing sequence number, so a slow backend never delays the cadence.
//! Responses pass through a `RefreshGate` that discards anything older than
//! the last applied response and, in `OnChange` mode, anything whose
//! fingerprint matches the last applied one.
//!
//! CANCELLATION
//! ============
//! `PollHandle::stop` (or dropping the handle) aborts the ticker. Fetches
//! already in flight run to completion but their responses are discarded.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::api::{ApiError, Fingerprint, Snapshot};
use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Deliver only when the fingerprint differs from the last applied one.
    OnChange,
    /// Deliver every accepted response.
    Always,
}

#[derive(Debug, Clone)]
pub enum PollUpdate {
    Changed(Vec<Record>),
    Failed(ApiError),
}

// =============================================================================
// GATE
// =============================================================================

/// Ordering and change detection for poll responses.
#[derive(Debug)]
pub struct RefreshGate {
    mode: RefreshMode,
    last_seq: u64,
    last_fingerprint: Option<Fingerprint>,
    applied_any: bool,
}

impl RefreshGate {
    #[must_use]
    pub fn new(mode: RefreshMode) -> Self {
        Self { mode, last_seq: 0, last_fingerprint: None, applied_any: false }
    }

    /// Records to deliver for the response to tick `seq`, if any.
    ///
    /// The first accepted response always renders. A response without a
    /// fingerprint always counts as a change.
    pub fn accept(&mut self, seq: u64, snapshot: Snapshot) -> Option<Vec<Record>> {
        if !self.advance(seq) {
            return None;
        }
        let changed = match self.mode {
            RefreshMode::Always => true,
            RefreshMode::OnChange => {
                !self.applied_any || snapshot.fingerprint.is_none() || snapshot.fingerprint != self.last_fingerprint
            }
        };
        self.applied_any = true;
        self.last_fingerprint = snapshot.fingerprint;
        changed.then_some(snapshot.records)
    }

    /// Whether a failure for tick `seq` is current enough to report.
    ///
    /// A reported failure forces the next accepted response through, so the
    /// page recovers even when the data did not change meanwhile.
    pub fn accept_failure(&mut self, seq: u64) -> bool {
        if !self.advance(seq) {
            return false;
        }
        self.applied_any = false;
        true
    }

    fn advance(&mut self, seq: u64) -> bool {
        if seq <= self.last_seq {
            debug!(seq, last_seq = self.last_seq, "discarding stale poll response");
            return false;
        }
        self.last_seq = seq;
        true
    }
}

// =============================================================================
// LOOP
// =============================================================================

struct PollShared<C> {
    gate: Mutex<RefreshGate>,
    stopped: Arc<AtomicBool>,
    on_update: C,
}

impl<C: Fn(PollUpdate)> PollShared<C> {
    /// `on_update` runs under the gate lock so deliveries stay in sequence order.
    fn apply(&self, seq: u64, result: Result<Snapshot, ApiError>) {
        if self.stopped.load(Ordering::SeqCst) {
            debug!(seq, "discarding poll response after stop");
            return;
        }
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let update = match result {
            Ok(snapshot) => gate.accept(seq, snapshot).map(PollUpdate::Changed),
            Err(e) => {
                warn!(seq, error = %e, "poll fetch failed");
                gate.accept_failure(seq).then_some(PollUpdate::Failed(e))
            }
        };
        if let Some(update) = update {
            (self.on_update)(update);
        }
    }
}

/// Handle to a running poll loop. Dropping it stops the loop.
pub struct PollHandle {
    stopped: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.task.abort();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start polling `fetch` every `interval`, delivering accepted responses to
/// `on_update`. Must be called inside a tokio runtime.
pub fn start_polling<F, Fut, C>(fetch: F, interval: Duration, mode: RefreshMode, on_update: C) -> PollHandle
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Snapshot, ApiError>> + Send + 'static,
    C: Fn(PollUpdate) + Send + Sync + 'static,
{
    let interval = interval.max(Duration::from_millis(1));
    let stopped = Arc::new(AtomicBool::new(false));
    let shared = Arc::new(PollShared { gate: Mutex::new(RefreshGate::new(mode)), stopped: Arc::clone(&stopped), on_update });
    debug!(?interval, ?mode, "poll loop started");

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut seq: u64 = 0;
        loop {
            ticker.tick().await;
            if shared.stopped.load(Ordering::SeqCst) {
                break;
            }
            seq += 1;
            let response = fetch();
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let result = response.await;
                shared.apply(seq, result);
            });
        }
    });

    PollHandle { stopped, task }
}

#[cfg(test)]
#[path = "poll_test.rs"]
mod tests;
