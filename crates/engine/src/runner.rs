//! Workflow runner: sequences steps and owns the per-run lifecycle.
//!
//! The runner seeds a fresh [`ContextStore`], then drives each step through
//! resolve → invoke → apply-state-updates, strictly in declaration order. A
//! later step may reference anything an earlier step wrote, so steps are
//! never reordered or overlapped. The caller always receives a complete
//! [`WorkflowResult`]; only programmer errors (malformed step lists) fail
//! fast before any step executes.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Result, bail};
use charter_types::{ExecutionResult, RunStatus, StateUpdateInstruction, StepDefinition, StepStatus, WorkflowResult};
use chrono::Utc;
use serde_json::{Map as JsonMap, Value};
use tokio::sync::mpsc::{UnboundedReceiver, error::TryRecvError};
use tracing::{debug, warn};

use crate::catalog::OperationCatalog;
use crate::context::ContextStore;
use crate::decision::{DecisionMaker, NoDecisions};
use crate::error::EngineError;
use crate::invoke::OperationInvoker;
use crate::sink::StateUpdateApplier;
use crate::template;

/// Control commands a caller can send into a running workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunControl {
    /// Abandon remaining steps. An in-flight call is left to complete so
    /// its side effect is still captured into the context.
    Cancel,
}

/// Drives workflow runs against a fixed operation catalog.
pub struct WorkflowRunner {
    catalog: OperationCatalog,
    invoker: OperationInvoker,
    applier: StateUpdateApplier,
    decisions: Arc<dyn DecisionMaker>,
}

impl WorkflowRunner {
    /// Create a runner with no decision-maker attached.
    pub fn new(catalog: OperationCatalog, invoker: OperationInvoker, applier: StateUpdateApplier) -> Self {
        Self {
            catalog,
            invoker,
            applier,
            decisions: Arc::new(NoDecisions),
        }
    }

    /// Attach the decision-maker collaborator consulted between steps.
    pub fn with_decision_maker(mut self, decisions: Arc<dyn DecisionMaker>) -> Self {
        self.decisions = decisions;
        self
    }

    /// Execute the steps against a context seeded from `initial`.
    pub async fn run(&self, run_id: &str, initial: &JsonMap<String, Value>, steps: &[StepDefinition]) -> Result<WorkflowResult> {
        self.run_with_control(run_id, initial, steps, None).await
    }

    /// Execute with a control channel; cancellation is checked before each
    /// step's resolve phase.
    pub async fn run_with_control(
        &self,
        run_id: &str,
        initial: &JsonMap<String, Value>,
        steps: &[StepDefinition],
        mut control_rx: Option<UnboundedReceiver<RunControl>>,
    ) -> Result<WorkflowResult> {
        let started_at = Utc::now();
        self.validate_steps(steps)?;
        let mut store = ContextStore::seeded(initial)?;

        let mut results = Vec::with_capacity(steps.len());
        let mut errors: Vec<String> = Vec::new();
        let mut fatal = false;
        let mut degraded = false;
        let mut abort_reason: Option<String> = None;

        for step in steps {
            if let Some(reason) = &abort_reason {
                results.push(ExecutionResult::skipped(&step.id, &step.operation, reason.clone()));
                continue;
            }

            if cancel_requested(control_rx.as_mut()) {
                let cancellation = EngineError::cancelled(&step.id);
                warn!(step = %step.id, "cancellation requested");
                errors.push(cancellation.to_string());
                fatal = true;
                abort_reason = Some(cancellation.to_string());
                results.push(ExecutionResult::skipped(&step.id, &step.operation, cancellation.to_string()));
                continue;
            }

            let Some(descriptor) = self.catalog.get(&step.operation) else {
                results.push(ExecutionResult::skipped(&step.id, &step.operation, "operation not in catalog"));
                continue;
            };

            self.ensure_logic_values(step, &mut store, &mut errors).await;

            debug!(step = %step.id, operation = %step.operation, "resolving step parameters");
            let resolved = match template::resolve_params(&step.params, &store) {
                Ok(resolved) => resolved,
                Err(error) => {
                    // A template that cannot be resolved is a structural
                    // defect in the workflow definition, not a transient
                    // condition; the whole run stops here.
                    warn!(step = %step.id, %error, "template resolution failed");
                    errors.push(error.to_string());
                    fatal = true;
                    abort_reason = Some(format!("template resolution failed at step '{}'", step.id));
                    results.push(ExecutionResult {
                        step_id: step.id.clone(),
                        operation_id: step.operation.clone(),
                        status: StepStatus::Failed,
                        resolved_params: JsonMap::new(),
                        response: None,
                        error: Some(error.to_string()),
                        attempts: 0,
                        state_updates: Vec::new(),
                    });
                    continue;
                }
            };

            let call = self.invoker.invoke(descriptor, &resolved, &mut store).await;
            let (status, response, error) = match call.outcome {
                Ok(response) => (StepStatus::Succeeded, Some(response), None),
                Err(error) => {
                    errors.push(error.to_string());
                    (StepStatus::Failed, None, Some(error.to_string()))
                }
            };

            let instructions: &[StateUpdateInstruction] = match status {
                StepStatus::Succeeded => &step.state_updates.on_success,
                StepStatus::Failed => &step.state_updates.on_failure,
                StepStatus::Skipped => &[],
            };
            let state_updates = if instructions.is_empty() {
                Vec::new()
            } else {
                self.applier.apply(run_id, &step.id, instructions, &store).await
            };
            for outcome in &state_updates {
                if !outcome.committed {
                    degraded = true;
                    if let Some(detail) = &outcome.error {
                        errors.push(detail.clone());
                    }
                }
            }

            if status == StepStatus::Failed {
                if descriptor.mandatory {
                    fatal = true;
                    abort_reason = Some(format!("mandatory step '{}' failed", step.id));
                } else {
                    degraded = true;
                }
            }

            results.push(ExecutionResult {
                step_id: step.id.clone(),
                operation_id: step.operation.clone(),
                status,
                resolved_params: resolved,
                response,
                error,
                attempts: call.attempts,
                state_updates,
            });
        }

        let status = if fatal {
            RunStatus::Failed
        } else if degraded {
            RunStatus::PartiallyFailed
        } else {
            RunStatus::Completed
        };
        debug!(run_id, ?status, steps = results.len(), "run finished");

        Ok(WorkflowResult {
            status,
            steps: results,
            logic_values: store.logic_snapshot(),
            errors,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Programmer-error preflight; rejects the step list before anything runs.
    fn validate_steps(&self, steps: &[StepDefinition]) -> Result<()> {
        let mut seen = HashSet::new();
        for step in steps {
            if step.id.trim().is_empty() {
                bail!("step with empty identifier");
            }
            if !seen.insert(step.id.as_str()) {
                bail!("duplicate step identifier detected: '{}'", step.id);
            }
            if self.catalog.get(&step.operation).is_none() {
                bail!("step '{}' references unknown operation '{}'", step.id, step.operation);
            }
        }
        Ok(())
    }

    /// Suspension point: ask the decision-maker for `logic` keys the step
    /// needs that are not present yet. Supplied keys are write-once; the
    /// resolve phase surfaces anything still missing.
    async fn ensure_logic_values(&self, step: &StepDefinition, store: &mut ContextStore, errors: &mut Vec<String>) {
        let missing: Vec<String> = logic_keys_needed(step)
            .into_iter()
            .filter(|key| !store.has_logic(key))
            .collect();
        if missing.is_empty() {
            return;
        }

        debug!(step = %step.id, keys = ?missing, "requesting logic values from decision maker");
        match self.decisions.supply(&missing, store).await {
            Ok(values) => {
                for (key, value) in values {
                    if !store.set_logic_value(&key, value) {
                        warn!(key = %key, "ignoring attempt to overwrite logic value");
                    }
                }
            }
            Err(error) => {
                warn!(step = %step.id, %error, "decision maker failed");
                errors.push(format!("decision maker failed before step '{}': {}", step.id, error));
            }
        }
    }
}

/// Top-level `logic` keys a step needs: the declared requirements plus
/// every `logic.*` reference found in its parameter templates.
fn logic_keys_needed(step: &StepDefinition) -> Vec<String> {
    let mut keys: Vec<String> = step
        .requires_logic
        .iter()
        .map(|key| key.strip_prefix("logic.").unwrap_or(key).to_string())
        .collect();

    let mut references = Vec::new();
    for template_value in step.params.values() {
        template::collect_references(template_value, &mut references);
    }
    for reference in references {
        if let Some(rest) = reference.strip_prefix("logic.") {
            let top_level = rest.split('.').next().unwrap_or(rest).to_string();
            if !keys.contains(&top_level) {
                keys.push(top_level);
            }
        }
    }

    keys
}

fn cancel_requested(control_rx: Option<&mut UnboundedReceiver<RunControl>>) -> bool {
    let Some(control_rx) = control_rx else {
        return false;
    };
    loop {
        match control_rx.try_recv() {
            Ok(RunControl::Cancel) => return true,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return false,
        }
    }
}
