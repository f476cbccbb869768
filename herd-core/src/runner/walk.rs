use std::sync::Arc;

use super::config::{Context, NextStep, Scenario};
use super::gate::RunGate;
use super::record::{RequestRecord, ScenarioRecord};
use super::state::SimulationState;
use super::step;

/// Executes one walk of `scenario` for one user: threads the context through
/// the static steps and then the dynamic generator, applying the
/// skip-on-failure and early-termination rules.
///
/// Returns `None` when no step was ever available (the record invariant keeps
/// `requests` non-empty). The post-hook runs once per walk either way, with
/// the most recent context a successful step produced.
pub(crate) async fn walk_once(
    scenario: &Scenario,
    merged: Context,
    user: u64,
    gate: &RunGate,
    timeout: std::time::Duration,
    state: &Arc<SimulationState>,
) -> Option<ScenarioRecord> {
    let mut ctx = match &scenario.pre_hook {
        Some(hook) => hook(merged),
        None => merged,
    };
    let mut last_ok = ctx.clone();
    let mut requests: Vec<RequestRecord> = Vec::with_capacity(scenario.steps.len());
    let mut static_steps = scenario.steps.iter();

    loop {
        // Static steps first; once exhausted, consult the generator anew for
        // every further step.
        let next = match static_steps.next() {
            Some(step) => Some(step.clone()),
            None => match &scenario.step_fn {
                Some(step_fn) => match step_fn(&ctx) {
                    Some(NextStep::Step(step)) => Some(step),
                    Some(NextStep::WithContext(step, replacement)) => {
                        ctx = replacement;
                        Some(step)
                    }
                    None => None,
                },
                None => None,
            },
        };
        let Some(next) = next else {
            break;
        };

        let (record, after) =
            step::execute(&next, &scenario.name, ctx.clone(), user, timeout, state).await;
        let failed = !record.result;
        if record.result {
            last_ok = after.clone();
        }
        requests.push(record);
        ctx = after;

        if failed && scenario.skip_next_after_failure {
            break;
        }
        if scenario.allow_early_termination && !gate.keep_going(state.sent_requests()) {
            break;
        }
    }

    if let Some(hook) = &scenario.post_hook {
        let _ = hook(last_ok);
    }

    let (start, end) = match (requests.first(), requests.last()) {
        (Some(first), Some(last)) => (first.start, last.end),
        _ => return None,
    };

    Some(ScenarioRecord {
        name: Arc::clone(&scenario.name),
        id: user,
        start,
        end,
        requests,
    })
}
