use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use herd_value::{ObjectMap, Value};

use super::progress::ProgressFn;

/// Per-user scenario state threaded through steps.
pub type Context = ObjectMap;

pub type StepFuture = Pin<Box<dyn Future<Output = StepReturn> + Send>>;

pub type RequestFn = dyn Fn(Context) -> StepReturn + Send + Sync;
pub type SleepFn = dyn Fn(&Context) -> Duration + Send + Sync;
pub type HookFn = dyn Fn(Context) -> Context + Send + Sync;
pub type StepFn = dyn Fn(&Context) -> Option<NextStep> + Send + Sync;
pub type DistributionFn = dyn Fn(f64, &Context) -> f64 + Send + Sync;

/// What a step's request callable hands back to the engine.
///
/// The engine keeps resolving `Pending` futures until an `Immediate` or
/// `WithContext` surfaces; a truthy value marks the step as passed.
pub enum StepReturn {
    /// A bare result; the context is left unchanged.
    Immediate(Value),
    /// A result plus the context for subsequent steps.
    WithContext(Value, Context),
    /// Asynchronous work still in flight.
    Pending(StepFuture),
}

impl StepReturn {
    pub fn ok(value: impl Into<Value>) -> Self {
        Self::Immediate(value.into())
    }

    pub fn fail() -> Self {
        Self::Immediate(Value::Bool(false))
    }

    pub fn with_context(value: impl Into<Value>, context: Context) -> Self {
        Self::WithContext(value.into(), context)
    }

    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = StepReturn> + Send + 'static,
    {
        Self::Pending(Box::pin(future))
    }
}

impl fmt::Debug for StepReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate(value) => f.debug_tuple("Immediate").field(value).finish(),
            Self::WithContext(value, _) => f.debug_tuple("WithContext").field(value).finish(),
            Self::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// One unit of work in a scenario: a named request callable with an optional
/// pre-dispatch pause.
#[derive(Clone)]
pub struct Step {
    pub name: Arc<str>,
    pub request: Arc<RequestFn>,
    /// Evaluated on the current context once per execution; the step suspends
    /// for the returned duration before the request is dispatched.
    pub sleep_before: Option<Arc<SleepFn>>,
}

impl Step {
    pub fn new<F>(name: impl Into<Arc<str>>, request: F) -> Self
    where
        F: Fn(Context) -> StepReturn + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            request: Arc::new(request),
            sleep_before: None,
        }
    }

    pub fn sleep_before<F>(mut self, pause: F) -> Self
    where
        F: Fn(&Context) -> Duration + Send + Sync + 'static,
    {
        self.sleep_before = Some(Arc::new(pause));
        self
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("sleep_before", &self.sleep_before.is_some())
            .finish()
    }
}

/// A step produced by a scenario's dynamic generator.
pub enum NextStep {
    Step(Step),
    /// The step to run plus a replacement context.
    WithContext(Step, Context),
}

/// An ordered workflow one virtual user executes, possibly repeatedly.
///
/// Static `steps` run first; once exhausted, `step_fn` is consulted before
/// every further step until it returns `None`.
#[derive(Clone)]
pub struct Scenario {
    pub name: Arc<str>,
    /// Share of the simulation's users this scenario receives, relative to
    /// the other scenarios' weights.
    pub weight: f64,
    pub steps: Vec<Step>,
    pub step_fn: Option<Arc<StepFn>>,
    /// Scenario-level context; overrides the simulation context key-wise.
    pub context: Context,
    /// User ids driving this scenario. Populated by `run` from the weighted
    /// split; `run_scenarios` callers set it directly.
    pub users: Vec<u64>,
    pub pre_hook: Option<Arc<HookFn>>,
    pub post_hook: Option<Arc<HookFn>>,
    /// When a step fails, drop the remaining steps of that walk.
    pub skip_next_after_failure: bool,
    /// Let a walk end between steps once the stopping condition trips.
    pub allow_early_termination: bool,
}

impl Scenario {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            name: Arc::from(""),
            weight: 1.0,
            steps: Vec::new(),
            step_fn: None,
            context: Context::default(),
            users: Vec::new(),
            pre_hook: None,
            post_hook: None,
            skip_next_after_failure: true,
            allow_early_termination: false,
        }
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("steps", &self.steps.len())
            .field("step_fn", &self.step_fn.is_some())
            .field("users", &self.users.len())
            .field("skip_next_after_failure", &self.skip_next_after_failure)
            .field("allow_early_termination", &self.allow_early_termination)
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct Simulation {
    pub name: Arc<str>,
    pub scenarios: Vec<Scenario>,
    /// Runs once before any user starts; its return is merged into the
    /// simulation context.
    pub pre_hook: Option<Arc<HookFn>>,
    /// Runs once after every walk has drained, before the stream closes.
    pub post_hook: Option<Arc<HookFn>>,
}

impl Simulation {
    pub fn new(name: impl Into<Arc<str>>, scenarios: Vec<Scenario>) -> Self {
        Self {
            name: name.into(),
            scenarios,
            pre_hook: None,
            post_hook: None,
        }
    }
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("name", &self.name)
            .field("scenarios", &self.scenarios)
            .finish()
    }
}

#[derive(Clone)]
pub struct SimulationOptions {
    /// Virtual user count when `users` is not given.
    pub concurrency: usize,
    /// Explicit user ids; overrides `concurrency`.
    pub users: Option<Vec<u64>>,
    /// Stop once this many requests have been dispatched.
    pub requests: Option<u64>,
    /// Stop once this much wall-clock time has elapsed.
    pub duration: Option<Duration>,
    /// Per-step deadline.
    pub timeout: Duration,
    /// Simulation-wide context; scenarios override it key-wise.
    pub context: Context,
    /// Maps (progress, context) to a concurrency factor. Values above 1.0
    /// permit overshoot beyond the nominal user count.
    pub concurrency_distribution: Option<Arc<DistributionFn>>,
    /// Destination for captured step panics, one line each.
    pub error_file: Option<PathBuf>,
    /// Invoked once per second with engine counters.
    pub progress: Option<ProgressFn>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            users: None,
            requests: None,
            duration: None,
            timeout: Duration::from_millis(5000),
            context: Context::default(),
            concurrency_distribution: None,
            error_file: None,
            progress: None,
        }
    }
}

impl fmt::Debug for SimulationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationOptions")
            .field("concurrency", &self.concurrency)
            .field("users", &self.users)
            .field("requests", &self.requests)
            .field("duration", &self.duration)
            .field("timeout", &self.timeout)
            .field("concurrency_distribution", &self.concurrency_distribution.is_some())
            .field("error_file", &self.error_file)
            .finish()
    }
}

/// Splits `users` into per-scenario chunks proportional to scenario weights,
/// preserving user order. Largest-remainder rounding keeps the chunk sizes
/// summing to the input length, and every scenario receives at least one
/// user whenever there are as many users as scenarios.
pub(crate) fn split_users(users: &[u64], scenarios: &[Scenario]) -> Vec<Vec<u64>> {
    if scenarios.is_empty() {
        return Vec::new();
    }
    if scenarios.len() == 1 {
        return vec![users.to_vec()];
    }

    let total_weight: f64 = scenarios.iter().map(|s| s.weight).sum();

    // When there are enough users to go around, every scenario keeps one
    // before the weights apply; a dominant weight could otherwise swallow the
    // leftover slots and starve its siblings entirely.
    let reserved = usize::from(users.len() >= scenarios.len());
    let spare = users.len() - reserved * scenarios.len();

    let mut counts = vec![reserved; scenarios.len()];
    let mut remainders = Vec::with_capacity(scenarios.len());
    let mut leftover = spare;

    for (idx, scenario) in scenarios.iter().enumerate() {
        let share = spare as f64 * scenario.weight / total_weight;
        let base = share.floor() as usize;
        counts[idx] += base;
        remainders.push(share - base as f64);
        leftover -= base;
    }

    // Hand the leftover slots to the largest fractional shares, first-declared
    // scenario winning ties.
    let mut order: Vec<usize> = (0..scenarios.len()).collect();
    order.sort_by(|&a, &b| {
        remainders[b]
            .partial_cmp(&remainders[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    for &idx in order.iter().take(leftover) {
        counts[idx] += 1;
    }

    let mut chunks = Vec::with_capacity(scenarios.len());
    let mut offset = 0;
    for count in counts {
        chunks.push(users[offset..offset + count].to_vec());
        offset += count;
    }
    chunks
}
