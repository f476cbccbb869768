pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("a simulation must declare at least one scenario")]
    NoScenarios,

    #[error("scenario name must be a non-empty string")]
    UnnamedScenario,

    #[error("scenario `{0}` must define at least one step or a step function")]
    EmptyScenario(String),

    #[error("scenario `{0}` has an invalid weight (must be finite and positive)")]
    InvalidWeight(String),
}
