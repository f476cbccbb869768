use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use super::config::{Context, DistributionFn};
use super::vu::{run_user, UserContext};

/// Most user loops a single ramp tick may start.
pub const MAX_BATCH: usize = 1024;

pub(crate) const RAMP_TICK: Duration = Duration::from_millis(20);

/// Tracks the gap between the concurrency a distribution function asks for
/// and the walks currently in flight for one scenario.
///
/// `target = nominal × distribution(progress, context)`; a positive deficit
/// authorizes starting that many more user loops.
pub struct ConcurrencyShaper {
    nominal: f64,
    distribution: Arc<DistributionFn>,
    context: Context,
    observed: AtomicU64,
}

impl ConcurrencyShaper {
    pub fn new(nominal: usize, distribution: Arc<DistributionFn>, context: Context) -> Self {
        Self {
            nominal: nominal as f64,
            distribution,
            context,
            observed: AtomicU64::new(0),
        }
    }

    pub fn target(&self, progress: f64) -> f64 {
        (self.nominal * (self.distribution)(progress, &self.context)).max(0.0)
    }

    /// In-flight walks for this scenario. Relaxed read; callers tolerate
    /// staleness.
    pub fn observed(&self) -> u64 {
        self.observed.load(Ordering::Relaxed)
    }

    pub fn deficit(&self, progress: f64) -> f64 {
        self.target(progress) - self.observed() as f64
    }

    pub(crate) fn enter(&self) {
        self.observed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn leave(&self) {
        self.observed.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for ConcurrencyShaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyShaper")
            .field("nominal", &self.nominal)
            .field("observed", &self.observed)
            .finish()
    }
}

/// Ramp task for one scenario: starts user loops in deficit-sized batches
/// until the pending queue empties or the stopping condition trips. Started
/// loops keep flowing records through the shared channel on their own.
pub(crate) async fn ramp_users(
    shaper: Arc<ConcurrencyShaper>,
    template: UserContext,
    mut pending: VecDeque<u64>,
) {
    let mut tick = tokio::time::interval(RAMP_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !pending.is_empty() {
        tick.tick().await;

        let sent = template.state.sent_requests();
        if !template.gate.keep_going(sent) {
            break;
        }

        let deficit = shaper.deficit(template.gate.progress(sent));
        let batch = (deficit.floor().max(0.0) as usize)
            .min(MAX_BATCH)
            .min(pending.len());
        if batch == 0 {
            continue;
        }

        tracing::debug!(
            scenario = %template.scenario.name,
            batch,
            remaining = pending.len() - batch,
            "ramping up user loops"
        );
        for _ in 0..batch {
            let Some(id) = pending.pop_front() else {
                break;
            };
            tokio::spawn(run_user(template.for_user(id)));
        }
    }
}
