//! Error taxonomy for workflow execution.
//!
//! Every failure the engine can encounter maps onto one of these variants,
//! and all of them are captured into per-step or per-instruction result
//! objects rather than thrown across run boundaries. Only unresolved
//! references and mandatory-step failures abort a run early.

use thiserror::Error;

/// Errors raised while resolving, invoking, or committing workflow steps.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// A template path has no value in the context store at resolution time.
    /// Always fatal to the enclosing run.
    #[error("unresolved reference '{{{{{reference}}}}}'")]
    UnresolvedReference { reference: String },

    /// Resolved parameters or a response body violate the operation's
    /// declared schema. Fatal to the step; never retried.
    #[error("schema violation for '{operation_id}': {detail}")]
    SchemaValidation { operation_id: String, detail: String },

    /// Network or 5xx failure after the retry policy was exhausted.
    #[error("transient failure calling '{operation_id}' after {attempts} attempt(s): {detail}")]
    TransientExecution {
        operation_id: String,
        attempts: u32,
        detail: String,
    },

    /// 4xx failure; classified as a client/validation error and never retried.
    #[error("client error calling '{operation_id}': HTTP {status} {detail}")]
    ClientExecution {
        operation_id: String,
        status: u16,
        detail: String,
    },

    /// A single state-update instruction failed to resolve or commit.
    #[error("state update against '{table}' failed: {detail}")]
    StateUpdate { table: String, detail: String },

    /// The run was cancelled between steps.
    #[error("run cancelled before step '{step_id}'")]
    Cancelled { step_id: String },
}

impl EngineError {
    /// Create an unresolved-reference error.
    pub fn unresolved(reference: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            reference: reference.into(),
        }
    }

    /// Create a schema-violation error.
    pub fn schema(operation_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::SchemaValidation {
            operation_id: operation_id.into(),
            detail: detail.into(),
        }
    }

    /// Create a transient-execution error.
    pub fn transient(operation_id: impl Into<String>, attempts: u32, detail: impl Into<String>) -> Self {
        Self::TransientExecution {
            operation_id: operation_id.into(),
            attempts,
            detail: detail.into(),
        }
    }

    /// Create a client-execution error.
    pub fn client(operation_id: impl Into<String>, status: u16, detail: impl Into<String>) -> Self {
        Self::ClientExecution {
            operation_id: operation_id.into(),
            status,
            detail: detail.into(),
        }
    }

    /// Create a state-update error.
    pub fn state_update(table: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::StateUpdate {
            table: table.into(),
            detail: detail.into(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(step_id: impl Into<String>) -> Self {
        Self::Cancelled { step_id: step_id.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_reference_renders_with_delimiters() {
        let err = EngineError::unresolved("logic.recommended_credit_amount");
        assert_eq!(err.to_string(), "unresolved reference '{{logic.recommended_credit_amount}}'");
    }

    #[test]
    fn client_error_carries_status() {
        let err = EngineError::client("createBillingAdjustment", 422, "validation failed");
        assert!(matches!(err, EngineError::ClientExecution { status: 422, .. }));
    }
}
