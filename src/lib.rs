//! gantry - monorepo build orchestrator core.
//!
//! Given a set of projects with declared dependency edges and a set of
//! phases (compile, test, lint, ...), gantry computes which
//! (project, phase) units of work must run, in what order, with what
//! concurrency, and reports aggregate success or failure.
//!
//! The crate is the scheduling core only. Command-line parsing,
//! configuration loading, shell invocation, and cache storage are
//! collaborators that plug in through the [`runner`] traits and the
//! [`selection`] algebra.
//!
//! - [`project`] / [`phase`] - the input model: a project dependency
//!   graph and named build steps with ordering constraints
//! - [`selection`] - set algebra translating inclusion criteria into a
//!   concrete project subset
//! - [`operation`] - the operation graph: builder, scheduling queue,
//!   and bounded-parallelism executor
//! - [`report`] - the status breakdown a front end renders
//! - [`watch`] - the incremental re-scheduling loop

pub mod errors;
pub mod operation;
pub mod parallelism;
pub mod phase;
pub mod project;
pub mod report;
pub mod runner;
pub mod selection;
pub mod watch;

pub use errors::{AlreadyReportedError, ExecuteError, GraphError};
pub use operation::{
    ExecutionManager, ExecutionResult, OperationGraph, OperationGraphBuilder, OperationStatus,
    SchedulingQueue,
};
pub use parallelism::Parallelism;
pub use phase::{Phase, PhaseSet};
pub use project::{Project, ProjectGraph, ProjectId};
pub use report::ExecutionReport;
pub use runner::{NoopRunner, OperationRunner, RunnerContext, RunnerDecision, RunnerFactory};
pub use watch::{ChangeSource, ProjectChange, WatchLoop, WatchSummary};
