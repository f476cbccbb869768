use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use super::shaper::ConcurrencyShaper;
use super::sink::ErrorSink;

/// Counters and the error sink shared by every task of one simulation.
///
/// `sent_requests` counts step dispatches (incremented before the timeout
/// race begins), `concurrent_scenarios` counts in-flight walks. Readers use
/// relaxed loads and tolerate stale values.
#[derive(Debug)]
pub(crate) struct SimulationState {
    sent_requests: AtomicU64,
    concurrent_scenarios: AtomicU64,
    started: OnceLock<Instant>,
    sink: Option<ErrorSink>,
}

impl SimulationState {
    pub(crate) fn new(sink: Option<ErrorSink>) -> Self {
        Self {
            sent_requests: AtomicU64::new(0),
            concurrent_scenarios: AtomicU64::new(0),
            started: OnceLock::new(),
            sink,
        }
    }

    pub(crate) fn start_at(&self, at: Instant) {
        let _ = self.started.set(at);
    }

    pub(crate) fn started(&self) -> Instant {
        self.started.get().copied().unwrap_or_else(Instant::now)
    }

    pub(crate) fn count_dispatch(&self) {
        self.sent_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn sent_requests(&self) -> u64 {
        self.sent_requests.load(Ordering::Relaxed)
    }

    pub(crate) fn concurrent_scenarios(&self) -> u64 {
        self.concurrent_scenarios.load(Ordering::Relaxed)
    }

    pub(crate) fn report_step_panic(&self, scenario: &str, step: &str, user: u64, error: &str) {
        if let Some(sink) = &self.sink {
            sink.append(scenario, step, user, error);
        }
    }
}

/// RAII scope for one walk: bumps the in-flight counters on entry and
/// releases them when dropped, panic or not.
pub(crate) struct WalkGuard {
    state: Arc<SimulationState>,
    shaper: Option<Arc<ConcurrencyShaper>>,
}

impl WalkGuard {
    pub(crate) fn enter(
        state: &Arc<SimulationState>,
        shaper: Option<&Arc<ConcurrencyShaper>>,
    ) -> Self {
        state.concurrent_scenarios.fetch_add(1, Ordering::Relaxed);
        if let Some(shaper) = shaper {
            shaper.enter();
        }

        Self {
            state: Arc::clone(state),
            shaper: shaper.cloned(),
        }
    }
}

impl Drop for WalkGuard {
    fn drop(&mut self) {
        self.state.concurrent_scenarios.fetch_sub(1, Ordering::Relaxed);
        if let Some(shaper) = &self.shaper {
            shaper.leave();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_guard_tracks_in_flight_walks() {
        let state = Arc::new(SimulationState::new(None));

        let outer = WalkGuard::enter(&state, None);
        let inner = WalkGuard::enter(&state, None);
        assert_eq!(state.concurrent_scenarios(), 2);

        drop(inner);
        assert_eq!(state.concurrent_scenarios(), 1);
        drop(outer);
        assert_eq!(state.concurrent_scenarios(), 0);
    }

    #[test]
    fn dispatch_counter_is_monotonic() {
        let state = SimulationState::new(None);

        state.count_dispatch();
        state.count_dispatch();
        assert_eq!(state.sent_requests(), 2);
    }
}
