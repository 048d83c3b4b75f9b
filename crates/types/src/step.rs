//! Planned workflow steps and their declarative post-call writes.
//!
//! A step pairs an operation reference with the template bindings extracted
//! from the operation's orchestration annotations. Template expressions use
//! the `{{namespace.path}}` form and are resolved by the engine at run time.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of write an instruction performs against the state sink.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StateUpdateOp {
    /// Append a new record.
    #[default]
    Write,
    /// Update records matching the condition.
    Update,
    /// Delete records matching the condition.
    Delete,
}

/// A declarative post-call write of templated values to the state sink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateUpdateInstruction {
    /// Write kind; plain appends when omitted.
    #[serde(default)]
    pub op: StateUpdateOp,

    /// Target table or collection name.
    pub table: String,

    /// Field name to template expression, in authoring order. Resolved
    /// against the context after the triggering step's response is merged.
    #[serde(default)]
    pub values: IndexMap<String, Value>,

    /// Match condition for update/delete instructions, also templated.
    #[serde(default)]
    pub condition: IndexMap<String, Value>,
}

/// State-update instructions grouped by the step outcome that triggers them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateUpdateSet {
    /// Applied only after the step's call succeeded.
    #[serde(default, rename = "onSuccess")]
    pub on_success: Vec<StateUpdateInstruction>,

    /// Applied only after the step's call failed.
    #[serde(default, rename = "onFailure")]
    pub on_failure: Vec<StateUpdateInstruction>,
}

impl StateUpdateSet {
    /// True when neither trigger carries any instruction.
    pub fn is_empty(&self) -> bool {
        self.on_success.is_empty() && self.on_failure.is_empty()
    }
}

/// One planned operation invocation within a workflow run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique identifier for the step within the run.
    pub id: String,

    /// Identifier of the operation to invoke.
    pub operation: String,

    /// Parameter name to template expression, in authoring order.
    #[serde(default)]
    pub params: IndexMap<String, Value>,

    /// Post-call writes keyed by outcome.
    #[serde(default)]
    pub state_updates: StateUpdateSet,

    /// `logic.*` keys that must be present before this step resolves.
    /// Missing keys are requested from the decision-maker collaborator.
    #[serde(default)]
    pub requires_logic: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_deserializes_extension_metadata() {
        let step: StepDefinition = serde_json::from_str(
            r#"{
                "id": "adjust",
                "operation": "createBillingAdjustment",
                "params": {
                    "customerId": "{{db.customer.id}}",
                    "amount": "{{logic.recommended_credit_amount}}"
                },
                "state_updates": {
                    "onSuccess": [{
                        "table": "billing_adjustment_log",
                        "values": {
                            "adjustment_id": "{{response.adjustmentId}}",
                            "status": "APPLIED"
                        }
                    }]
                },
                "requires_logic": ["recommended_credit_amount"]
            }"#,
        )
        .expect("step");

        assert_eq!(step.state_updates.on_success.len(), 1);
        assert!(step.state_updates.on_failure.is_empty());
        assert_eq!(step.state_updates.on_success[0].op, StateUpdateOp::Write);
        // Parsed from text, the params keep their authoring order.
        assert_eq!(step.params.keys().collect::<Vec<_>>(), vec!["customerId", "amount"]);
    }

    #[test]
    fn state_update_set_reports_emptiness() {
        assert!(StateUpdateSet::default().is_empty());

        let set: StateUpdateSet = serde_json::from_value(json!({
            "onFailure": [{"table": "escalations", "values": {}}]
        }))
        .expect("set");
        assert!(!set.is_empty());
    }
}
