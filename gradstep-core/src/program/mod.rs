//! Recorded operations and the plans they are collected into.

pub mod mode;
pub mod operation;
pub mod plan;
pub(crate) mod update_kernels;

pub use mode::{ContextKey, EagerSink, ExecutionMode, OpSink, PlanSink};
pub use operation::{OpKind, Operation};
pub use plan::{Program, ProgramId};

#[cfg(test)]
mod program_test;
