//! Strongly typed definitions shared across the Charter api and engine crates.
//!
//! The models defined here mirror the hand-off points of the engine: what the
//! external OpenAPI collaborator supplies (operation descriptors plus the
//! orchestration annotations attached to them), what a caller submits (step
//! definitions), and what the engine reports back (per-step execution results
//! rolled up into a workflow result). They intentionally preserve authoring
//! order (via `IndexMap`) so audit output renders parameters and instruction
//! fields in the order they were declared.

pub mod operation;
pub mod result;
pub mod step;

pub use operation::{OperationDescriptor, ParameterLocation, ParameterSchema, ParameterSpec, ResponseField, ResponseSchema};
pub use result::{ApiResponse, ExecutionResult, RunStatus, StateUpdateOutcome, StepStatus, WorkflowResult};
pub use step::{StateUpdateInstruction, StateUpdateOp, StateUpdateSet, StepDefinition};
