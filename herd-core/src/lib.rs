pub mod runner;

pub use herd_value::{ObjectMap, Value};
