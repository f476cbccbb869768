use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::config::{Context, Scenario};
use super::gate::RunGate;
use super::record::ScenarioRecord;
use super::shaper::ConcurrencyShaper;
use super::state::{SimulationState, WalkGuard};
use super::walk::walk_once;

/// How long an admitted-but-over-target user loop parks before it re-checks
/// the concurrency deficit.
pub(crate) const ADMISSION_PARK: Duration = Duration::from_millis(200);

/// Everything one virtual-user task needs. Cloned per user from a
/// per-scenario template.
#[derive(Clone)]
pub(crate) struct UserContext {
    pub id: u64,
    pub scenario: Arc<Scenario>,
    /// Simulation context overlaid with the scenario context.
    pub merged: Context,
    pub timeout: Duration,
    pub gate: Arc<RunGate>,
    pub state: Arc<SimulationState>,
    pub shaper: Option<Arc<ConcurrencyShaper>>,
    pub records: mpsc::Sender<ScenarioRecord>,
}

impl UserContext {
    pub(crate) fn for_user(&self, id: u64) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }
}

/// One virtual user: walks the scenario while the stopping condition and the
/// admission gate permit, emitting one record per walk. The loop's sender
/// clone closes the scenario stream once every user is done.
pub(crate) async fn run_user(ctx: UserContext) {
    loop {
        let sent = ctx.state.sent_requests();
        if !ctx.gate.keep_going(sent) {
            break;
        }

        if let Some(shaper) = &ctx.shaper {
            if shaper.deficit(ctx.gate.progress(sent)) <= 0.0 {
                tokio::time::sleep(ADMISSION_PARK).await;
                continue;
            }
        }

        let guard = WalkGuard::enter(&ctx.state, ctx.shaper.as_ref());
        let record = walk_once(
            &ctx.scenario,
            ctx.merged.clone(),
            ctx.id,
            &ctx.gate,
            ctx.timeout,
            &ctx.state,
        )
        .await;
        drop(guard);

        if let Some(record) = record {
            // The consumer dropped the stream; nothing left to produce for.
            if ctx.records.send(record).await.is_err() {
                break;
            }
        }

        if ctx.gate.runs_once() {
            break;
        }
    }
}
