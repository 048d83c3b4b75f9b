//! Execution results reported back to the engine's caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};

use crate::step::StateUpdateOp;

/// Status of one executed step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step did not run (earlier abort or cancellation).
    Skipped,
    /// Step executed and its call succeeded.
    Succeeded,
    /// Step executed and its call failed, or its templates did not resolve.
    Failed,
}

/// Terminal status of a workflow run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step succeeded and every state update committed.
    Completed,
    /// All mandatory steps succeeded, but a non-mandatory step or a state
    /// update failed along the way.
    PartiallyFailed,
    /// A mandatory step failed, a template did not resolve, or the run was
    /// cancelled.
    Failed,
}

/// Response captured from one operation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body; `Null` when the body was empty.
    pub body: Value,
}

/// Outcome of applying one state-update instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateUpdateOutcome {
    /// Target table or collection.
    pub table: String,
    /// Write kind that was attempted.
    pub op: StateUpdateOp,
    /// Resolved record handed to the sink; empty when resolution failed.
    pub record: JsonMap<String, Value>,
    /// Whether the sink acknowledged the commit.
    pub committed: bool,
    /// Failure detail when resolution or the commit failed.
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of executing a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Step identifier.
    pub step_id: String,
    /// Operation the step invoked.
    pub operation_id: String,
    /// Final status of this step.
    pub status: StepStatus,
    /// Parameters after template resolution, kept for audit.
    pub resolved_params: JsonMap<String, Value>,
    /// Response captured from the call, when one was made.
    pub response: Option<ApiResponse>,
    /// Failure detail when the step failed or was skipped.
    #[serde(default)]
    pub error: Option<String>,
    /// Number of call attempts made (0 when the step never invoked).
    pub attempts: u32,
    /// Outcomes of the state updates triggered by this step.
    #[serde(default)]
    pub state_updates: Vec<StateUpdateOutcome>,
}

impl ExecutionResult {
    /// A placeholder result for a step that never ran.
    pub fn skipped(step_id: impl Into<String>, operation_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            operation_id: operation_id.into(),
            status: StepStatus::Skipped,
            resolved_params: JsonMap::new(),
            response: None,
            error: Some(reason.into()),
            attempts: 0,
            state_updates: Vec::new(),
        }
    }
}

/// Final report for one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Terminal run status.
    pub status: RunStatus,
    /// Per-step results in execution order, including skipped steps.
    pub steps: Vec<ExecutionResult>,
    /// Snapshot of the `logic` namespace at run end, surfaced so callers can
    /// audit externally computed decisions independent of side effects.
    pub logic_values: JsonMap<String, Value>,
    /// Flattened error messages accumulated across the run.
    pub errors: Vec<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached its terminal status.
    pub finished_at: DateTime<Utc>,
}

impl WorkflowResult {
    /// True when the run finished without any recorded failure.
    pub fn is_complete(&self) -> bool {
        matches!(self.status, RunStatus::Completed)
    }
}
