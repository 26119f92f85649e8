//! Bootstrap procedure generation
//!
//! Turns target facts into an ordered, idempotent provisioning procedure
//! that installs the container runtime, joins a cluster, prepares the
//! directory layout and proxy configuration, and installs build tooling.

pub mod generator;
pub mod os;
pub mod procedure;
mod stages;

pub use generator::ScriptGenerator;
pub use os::{OsId, PackageManager, TargetFacts};
pub use procedure::{
    ExecutionReport, Interpreter, Procedure, ProcedureBuilder, Severity, Stage, StageOutcome,
};
