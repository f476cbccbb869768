mod config;
mod error;
mod gate;
mod progress;
mod record;
mod run;
mod shaper;
mod sink;
mod state;
mod step;
mod vu;
mod walk;

pub use config::{
    Context, DistributionFn, HookFn, NextStep, RequestFn, Scenario, Simulation, SimulationOptions,
    SleepFn, Step, StepFn, StepFuture, StepReturn,
};
pub use error::{Error, Result};
pub use gate::{RunGate, StopCondition};
pub use progress::{ProgressFn, ProgressUpdate};
pub use record::{RecordStream, RequestRecord, ScenarioRecord};
pub use run::{run, run_scenarios};
pub use shaper::{ConcurrencyShaper, MAX_BATCH};
