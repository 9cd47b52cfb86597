pub mod command;
pub mod doctor;
pub mod parser;
pub mod policy;
pub mod validate;

pub use command::{Command, Program};
pub use parser::parse;
pub use policy::SafetyPolicy;
pub use validate::{validate, ValidationReport};
