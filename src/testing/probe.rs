//! Concurrency instrumentation.

use crate::dispatcher::WorkerObserver;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct ProbeState {
    active: AtomicUsize,
    max_active: AtomicUsize,
    entered: AtomicUsize,
}

/// Tracks how many workers are active at once.
///
/// Attach it to a dispatcher with
/// [`WorkerPoolDispatcher::with_observer`](crate::dispatcher::WorkerPoolDispatcher::with_observer),
/// or call [`ConcurrencyProbe::enter`] from inside a load operation. An
/// optional hold time keeps each worker busy long enough for overlap to show.
///
/// ```
/// use chunkline::testing::ConcurrencyProbe;
///
/// let probe = ConcurrencyProbe::new();
/// {
///     let _a = probe.enter();
///     let _b = probe.enter();
/// }
/// assert_eq!(probe.max_active(), 2);
/// assert_eq!(probe.active(), 0);
/// ```
#[derive(Clone, Default)]
pub struct ConcurrencyProbe {
    state: Arc<ProbeState>,
    hold: Option<Duration>,
}

impl ConcurrencyProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `hold` every time a worker starts.
    #[must_use]
    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = Some(hold);
        self
    }

    /// Mark one worker active until the returned guard drops.
    #[must_use]
    pub fn enter(&self) -> ProbeGuard<'_> {
        self.start();
        ProbeGuard { probe: self }
    }

    /// Workers active right now.
    #[must_use]
    pub fn active(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously active workers seen.
    #[must_use]
    pub fn max_active(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    /// Total number of worker starts.
    #[must_use]
    pub fn total_entered(&self) -> usize {
        self.state.entered.load(Ordering::SeqCst)
    }

    fn start(&self) {
        let now = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active.fetch_max(now, Ordering::SeqCst);
        self.state.entered.fetch_add(1, Ordering::SeqCst);
        if let Some(hold) = self.hold {
            thread::sleep(hold);
        }
    }

    fn finish(&self) {
        self.state.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerObserver for ConcurrencyProbe {
    fn worker_started(&self, _index: usize) {
        self.start();
    }

    fn worker_finished(&self, _index: usize) {
        self.finish();
    }
}

/// Active-worker marker returned by [`ConcurrencyProbe::enter`].
pub struct ProbeGuard<'a> {
    probe: &'a ConcurrencyProbe,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.probe.finish();
    }
}
