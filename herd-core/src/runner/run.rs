use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::config::{split_users, Context, HookFn, Scenario, Simulation, SimulationOptions};
use super::error::{Error, Result};
use super::gate::RunGate;
use super::progress::ProgressUpdate;
use super::record::{RecordStream, ScenarioRecord, RECORD_BUFFER};
use super::shaper::{ramp_users, ConcurrencyShaper};
use super::sink::ErrorSink;
use super::state::SimulationState;
use super::vu::{run_user, UserContext};

/// Drives a whole simulation: derives user ids, applies the simulation
/// pre-hook, splits users across scenarios by weight, and fans the scenario
/// pipelines out.
///
/// Returns as soon as the engine is running; records arrive on the stream.
/// Step failures never surface here. Only invalid configuration and an
/// unopenable error sink do.
pub async fn run(simulation: Simulation, options: SimulationOptions) -> Result<RecordStream> {
    if simulation.scenarios.is_empty() {
        return Err(Error::NoScenarios);
    }

    let mut scenarios = simulation.scenarios;
    validate(&scenarios)?;

    let mut options = options;
    let users = match options.users.take() {
        Some(users) => users,
        None => (0..options.concurrency as u64).collect(),
    };

    if let Some(hook) = &simulation.pre_hook {
        let additions = hook(options.context.clone());
        for (key, value) in additions {
            options.context.insert(key, value);
        }
    }

    let chunks = split_users(&users, &scenarios);
    for (scenario, chunk) in scenarios.iter_mut().zip(chunks) {
        scenario.users = chunk;
    }

    start_pipelines(options, scenarios, simulation.post_hook).await
}

/// Lower-level entry: runs scenarios whose `users` lists are already set,
/// with no simulation-level pre-hook or user-id derivation.
pub async fn run_scenarios(
    options: SimulationOptions,
    scenarios: Vec<Scenario>,
) -> Result<RecordStream> {
    validate(&scenarios)?;
    start_pipelines(options, scenarios, None).await
}

fn validate(scenarios: &[Scenario]) -> Result<()> {
    for scenario in scenarios {
        if scenario.name.is_empty() {
            return Err(Error::UnnamedScenario);
        }
        if scenario.steps.is_empty() && scenario.step_fn.is_none() {
            return Err(Error::EmptyScenario(scenario.name.to_string()));
        }
        if !scenario.weight.is_finite() || scenario.weight <= 0.0 {
            return Err(Error::InvalidWeight(scenario.name.to_string()));
        }
    }

    Ok(())
}

async fn start_pipelines(
    options: SimulationOptions,
    scenarios: Vec<Scenario>,
    post_hook: Option<Arc<HookFn>>,
) -> Result<RecordStream> {
    let sink = match &options.error_file {
        Some(path) => Some(ErrorSink::open(path)?),
        None => None,
    };
    let state = Arc::new(SimulationState::new(sink));
    let gate = Arc::new(RunGate::choose(options.duration, options.requests));

    let (out_tx, out_rx) = mpsc::channel(RECORD_BUFFER);
    let (tx, mut rx) = mpsc::channel::<ScenarioRecord>(RECORD_BUFFER);

    let started = Instant::now();
    state.start_at(started);
    gate.start_at(started);

    tracing::debug!(
        scenarios = scenarios.len(),
        users = scenarios.iter().map(|s| s.users.len()).sum::<usize>(),
        gate = %gate.info(),
        "starting simulation"
    );

    for scenario in scenarios {
        let users = scenario.users.clone();
        let merged = overlay(options.context.clone(), &scenario.context);
        let scenario = Arc::new(scenario);
        let template = UserContext {
            id: 0,
            scenario,
            merged,
            timeout: options.timeout,
            gate: Arc::clone(&gate),
            state: Arc::clone(&state),
            shaper: None,
            records: tx.clone(),
        };

        match &options.concurrency_distribution {
            Some(distribution) if !users.is_empty() => {
                let shaper = Arc::new(ConcurrencyShaper::new(
                    users.len(),
                    Arc::clone(distribution),
                    options.context.clone(),
                ));
                let template = UserContext {
                    shaper: Some(Arc::clone(&shaper)),
                    ..template
                };
                tokio::spawn(ramp_users(shaper, template, users.into_iter().collect()));
            }
            _ => {
                for id in users {
                    tokio::spawn(run_user(template.for_user(id)));
                }
            }
        }
    }
    drop(tx);

    let progress_task = options.progress.clone().map(|callback| {
        let gate = Arc::clone(&gate);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tick.tick().await;

                let sent = state.sent_requests();
                callback(ProgressUpdate {
                    elapsed: state.started().elapsed(),
                    progress: gate.progress(sent),
                    sent_requests: sent,
                    concurrent_scenarios: state.concurrent_scenarios(),
                    gate: gate.info(),
                });
            }
        })
    });

    // Merge point: forward every pipeline's records, then run the post-hook
    // and let the output sender drop. The stream closes exactly once, after
    // the hook.
    let final_context = options.context.clone();
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            if out_tx.send(record).await.is_err() {
                break;
            }
        }

        if let Some(hook) = post_hook {
            let _ = hook(final_context);
        }
        if let Some(task) = progress_task {
            task.abort();
        }
        tracing::debug!("simulation drained");
    });

    Ok(RecordStream::new(out_rx))
}

fn overlay(mut base: Context, over: &Context) -> Context {
    for (key, value) in over.iter() {
        base.insert(Arc::clone(key), value.clone());
    }
    base
}
