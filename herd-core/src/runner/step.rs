use std::sync::Arc;
use std::time::Duration;

use herd_value::Value;

use super::config::{Context, Step, StepReturn};
use super::record::{epoch_ms, RequestRecord};
use super::state::SimulationState;

/// Runs one step against one user context under the per-step deadline.
///
/// Returns the record plus the context subsequent steps should see. Failures
/// of every kind (falsy result, deadline expiry, panic) come back as data;
/// nothing escapes the executor.
pub(crate) async fn execute(
    step: &Step,
    scenario: &Arc<str>,
    context: Context,
    user: u64,
    timeout: Duration,
    state: &SimulationState,
) -> (RequestRecord, Context) {
    if let Some(sleep_before) = &step.sleep_before {
        let pause = sleep_before(&context);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    // Dispatch accounting happens before the deadline race so the stopping
    // condition over-counts rather than under-counts.
    state.count_dispatch();

    let mut before = context;
    before.insert(Arc::from("user_id"), Value::U64(user));

    let start = epoch_ms();
    let request = Arc::clone(&step.request);
    let dispatched = before.clone();
    // The user callable runs on its own task so a panic in it lands here as a
    // JoinError instead of tearing the user loop down.
    let work = tokio::spawn(async move {
        let fallback = dispatched.clone();
        resolve(request(dispatched), fallback).await
    });

    let (result, exception, after) = match tokio::time::timeout(timeout, work).await {
        Ok(Ok((value, after))) => (value.is_truthy(), None, after),
        Ok(Err(join)) => {
            let text = panic_text(join);
            state.report_step_panic(scenario, &step.name, user, &text);
            (false, Some(text), before.clone())
        }
        // Deadline expired. The spawned task is left running; whatever it
        // eventually produces is ignored.
        Err(_) => (false, None, before.clone()),
    };
    let end = epoch_ms();

    let record = RequestRecord {
        name: Arc::clone(&step.name),
        id: user,
        start,
        end,
        result,
        context_before: before,
        context_after: after.clone(),
        exception,
    };

    (record, after)
}

/// Collapses a step's return into `(value, context)`, awaiting `Pending`
/// layers until a terminal variant surfaces.
async fn resolve(ret: StepReturn, fallback: Context) -> (Value, Context) {
    let mut ret = ret;
    loop {
        match ret {
            StepReturn::Immediate(value) => return (value, fallback),
            StepReturn::WithContext(value, context) => return (value, context),
            StepReturn::Pending(future) => ret = future.await,
        }
    }
}

fn panic_text(error: tokio::task::JoinError) -> String {
    if error.is_panic() {
        let payload = error.into_panic();
        if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "step panicked".to_string()
        }
    } else {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_name() -> Arc<str> {
        Arc::from("test")
    }

    #[tokio::test]
    async fn resolves_nested_pending_returns() {
        let ret = StepReturn::pending(async {
            StepReturn::pending(async { StepReturn::with_context(7i64, Context::default()) })
        });

        let (value, _) = resolve(ret, Context::default()).await;
        assert_eq!(value, Value::I64(7));
    }

    #[tokio::test]
    async fn immediate_returns_keep_the_dispatched_context() {
        let mut fallback = Context::default();
        fallback.insert(Arc::from("key"), Value::I64(1));

        let (_, context) = resolve(StepReturn::ok(true), fallback.clone()).await;
        assert_eq!(context, fallback);
    }

    #[tokio::test]
    async fn counts_the_dispatch_before_completion() {
        let state = SimulationState::new(None);
        let step = Step::new("noop", |_| StepReturn::ok(true));

        let (record, _) = execute(
            &step,
            &scenario_name(),
            Context::default(),
            4,
            Duration::from_secs(1),
            &state,
        )
        .await;

        assert_eq!(state.sent_requests(), 1);
        assert!(record.result);
        assert_eq!(record.context_before.get("user_id"), Some(&Value::U64(4)));
    }

    #[tokio::test]
    async fn deadline_expiry_is_a_failure_without_exception() {
        let state = SimulationState::new(None);
        let step = Step::new("slow", |_| {
            StepReturn::pending(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                StepReturn::ok(true)
            })
        });

        let (record, after) = execute(
            &step,
            &scenario_name(),
            Context::default(),
            1,
            Duration::from_millis(50),
            &state,
        )
        .await;

        assert!(!record.result);
        assert!(record.exception.is_none());
        assert_eq!(after, record.context_before);
        assert!(record.end - record.start >= 49);
    }

    #[tokio::test]
    async fn panics_are_captured_as_exceptions() {
        let state = SimulationState::new(None);
        let step = Step::new("explode", |_| panic!("kaboom"));

        let (record, after) = execute(
            &step,
            &scenario_name(),
            Context::default(),
            2,
            Duration::from_secs(1),
            &state,
        )
        .await;

        assert!(!record.result);
        assert_eq!(record.exception.as_deref(), Some("kaboom"));
        assert_eq!(after, record.context_before);
    }

    #[tokio::test]
    async fn falsy_values_fail_without_exception() {
        let state = SimulationState::new(None);
        let step = Step::new("denied", |_| StepReturn::fail());

        let (record, _) = execute(
            &step,
            &scenario_name(),
            Context::default(),
            3,
            Duration::from_secs(1),
            &state,
        )
        .await;

        assert!(!record.result);
        assert!(record.exception.is_none());
    }
}
