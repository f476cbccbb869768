use std::sync::Arc;
use std::time::Duration;

/// Callback invoked once per second while a simulation runs.
pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Engine counters snapshotted for one progress tick.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub elapsed: Duration,
    /// Fraction of the stopping condition's budget consumed, in [0, 1].
    pub progress: f64,
    pub sent_requests: u64,
    pub concurrent_scenarios: u64,
    /// Human-readable stopping condition, e.g. `duration 30s`.
    pub gate: String,
}
