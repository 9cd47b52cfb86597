pub mod engine;
pub mod operator;

pub use engine::{Engine, ExecOutcome, ExecState, ExecTiming, RunHandle};
pub use operator::{Operator, Request, Response};
