use std::sync::Arc;
use std::time::Duration;

use herd_core::runner::{
    run, run_scenarios, Error, Scenario, Simulation, SimulationOptions, Step, StepReturn,
};

fn noop_scenario(name: &str) -> Scenario {
    Scenario::new(name).step(Step::new("noop", |_| StepReturn::ok(true)))
}

#[tokio::test]
async fn zero_concurrency_yields_an_empty_stream_that_closes() {
    let options = SimulationOptions {
        concurrency: 0,
        ..Default::default()
    };

    let records = run(Simulation::new("idle", vec![noop_scenario("only")]), options)
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"))
        .drain()
        .await;

    assert!(records.is_empty());
}

#[tokio::test]
async fn a_simulation_without_scenarios_is_rejected() {
    let err = match run(Simulation::new("empty", Vec::new()), SimulationOptions::default()).await {
        Ok(_) => panic!("expected a validation error"),
        Err(err) => err,
    };

    assert!(matches!(err, Error::NoScenarios));
}

#[tokio::test]
async fn a_scenario_without_steps_is_rejected() {
    let hollow = Scenario::new("hollow");

    let err = match run(
        Simulation::new("invalid", vec![hollow]),
        SimulationOptions::default(),
    )
    .await
    {
        Ok(_) => panic!("expected a validation error"),
        Err(err) => err,
    };

    match err {
        Error::EmptyScenario(name) => assert_eq!(name, "hollow"),
        other => panic!("expected EmptyScenario, got {other}"),
    }
}

#[tokio::test]
async fn an_unnamed_scenario_is_rejected() {
    let nameless = Scenario {
        name: Arc::from(""),
        ..noop_scenario("placeholder")
    };

    let err = match run(
        Simulation::new("invalid", vec![nameless]),
        SimulationOptions::default(),
    )
    .await
    {
        Ok(_) => panic!("expected a validation error"),
        Err(err) => err,
    };

    assert!(matches!(err, Error::UnnamedScenario));
}

#[tokio::test]
async fn a_non_positive_weight_is_rejected() {
    let weightless = Scenario {
        weight: 0.0,
        ..noop_scenario("weightless")
    };

    let err = match run(
        Simulation::new("invalid", vec![weightless]),
        SimulationOptions::default(),
    )
    .await
    {
        Ok(_) => panic!("expected a validation error"),
        Err(err) => err,
    };

    assert!(matches!(err, Error::InvalidWeight(_)));
}

#[tokio::test]
async fn a_zero_distribution_idles_until_the_gate_closes() {
    let options = SimulationOptions {
        concurrency: 4,
        duration: Some(Duration::from_millis(100)),
        concurrency_distribution: Some(Arc::new(|_, _| 0.0)),
        ..Default::default()
    };

    let records = run(
        Simulation::new("parked", vec![noop_scenario("never")]),
        options,
    )
    .await
    .unwrap_or_else(|e| panic!("run failed: {e}"))
    .drain()
    .await;

    assert!(records.is_empty());
}

#[tokio::test]
async fn explicit_user_ids_flow_into_the_records() {
    let options = SimulationOptions {
        users: Some(vec![5, 9]),
        ..Default::default()
    };

    let mut ids: Vec<u64> = run(
        Simulation::new("named-users", vec![noop_scenario("only")]),
        options,
    )
    .await
    .unwrap_or_else(|e| panic!("run failed: {e}"))
    .drain()
    .await
    .iter()
    .map(|walk| walk.id)
    .collect();
    ids.sort_unstable();

    assert_eq!(ids, vec![5, 9]);
}

#[tokio::test]
async fn users_split_across_scenarios_by_weight() {
    let heavy = Scenario {
        weight: 3.0,
        ..noop_scenario("heavy")
    };
    let light = Scenario {
        weight: 1.0,
        ..noop_scenario("light")
    };
    let options = SimulationOptions {
        concurrency: 4,
        ..Default::default()
    };

    let records = run(Simulation::new("weighted", vec![heavy, light]), options)
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"))
        .drain()
        .await;

    let heavy_walks = records.iter().filter(|w| w.name.as_ref() == "heavy").count();
    let light_walks = records.iter().filter(|w| w.name.as_ref() == "light").count();
    assert_eq!((heavy_walks, light_walks), (3, 1));
}

#[tokio::test]
async fn run_scenarios_uses_the_preset_user_lists() {
    let scenario = Scenario {
        users: vec![1, 2],
        ..noop_scenario("preset")
    };

    let records = run_scenarios(SimulationOptions::default(), vec![scenario])
        .await
        .unwrap_or_else(|e| panic!("run_scenarios failed: {e}"))
        .drain()
        .await;

    assert_eq!(records.len(), 2);
}
