//! State sink collaborator and the declarative update applier.
//!
//! After a step's response has been merged into the context, its
//! state-update instructions resolve their templated fields and commit
//! through the [`StateSink`]. Instructions are independent: one failing
//! never blocks the others, and every failure is recorded so the run can
//! surface it. Commits carry a deterministic idempotency key so a retried
//! run re-applying the same instruction writes at most once.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use charter_types::{StateUpdateInstruction, StateUpdateOp, StateUpdateOutcome};
use serde_json::{Map as JsonMap, Value};
use tracing::{debug, warn};

use crate::context::ContextStore;
use crate::error::EngineError;
use crate::template;

/// External persistence collaborator for declarative state updates.
///
/// Each call commits one record as a unit. `key` is a deterministic
/// idempotency key; sinks must treat a repeated key as already committed
/// rather than writing twice.
#[async_trait]
pub trait StateSink: Send + Sync {
    /// Append a record to `table`.
    async fn write(&self, table: &str, key: &str, record: &JsonMap<String, Value>) -> Result<()>;

    /// Merge `record` into every row of `table` matching `condition`.
    async fn update(&self, table: &str, key: &str, condition: &JsonMap<String, Value>, record: &JsonMap<String, Value>) -> Result<()>;

    /// Delete every row of `table` matching `condition`.
    async fn delete(&self, table: &str, key: &str, condition: &JsonMap<String, Value>) -> Result<()>;
}

/// In-memory sink for tests and local runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Mutex<HashMap<String, Vec<JsonMap<String, Value>>>>,
    committed: Mutex<HashSet<String>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the rows currently held in `table`.
    pub fn records(&self, table: &str) -> Vec<JsonMap<String, Value>> {
        self.tables.lock().expect("tables lock").get(table).cloned().unwrap_or_default()
    }

    /// Marks a key committed, returning `false` when it already was.
    fn claim(&self, key: &str) -> bool {
        self.committed.lock().expect("committed lock").insert(key.to_string())
    }
}

fn row_matches(row: &JsonMap<String, Value>, condition: &JsonMap<String, Value>) -> bool {
    condition.iter().all(|(field, expected)| row.get(field) == Some(expected))
}

#[async_trait]
impl StateSink for MemorySink {
    async fn write(&self, table: &str, key: &str, record: &JsonMap<String, Value>) -> Result<()> {
        if !self.claim(key) {
            debug!(table, key, "skipping already-committed write");
            return Ok(());
        }
        self.tables
            .lock()
            .expect("tables lock")
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn update(&self, table: &str, key: &str, condition: &JsonMap<String, Value>, record: &JsonMap<String, Value>) -> Result<()> {
        if !self.claim(key) {
            return Ok(());
        }
        if let Some(rows) = self.tables.lock().expect("tables lock").get_mut(table) {
            for row in rows.iter_mut().filter(|row| row_matches(row, condition)) {
                for (field, value) in record {
                    row.insert(field.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, table: &str, key: &str, condition: &JsonMap<String, Value>) -> Result<()> {
        if !self.claim(key) {
            return Ok(());
        }
        if let Some(rows) = self.tables.lock().expect("tables lock").get_mut(table) {
            rows.retain(|row| !row_matches(row, condition));
        }
        Ok(())
    }
}

/// Applies a step's state-update instructions against the sink.
pub struct StateUpdateApplier {
    sink: Arc<dyn StateSink>,
}

impl StateUpdateApplier {
    /// Create an applier over the given sink.
    pub fn new(sink: Arc<dyn StateSink>) -> Self {
        Self { sink }
    }

    /// Resolve and commit each instruction independently.
    ///
    /// The store must already reflect the triggering step's response. The
    /// caller has already selected the instruction list matching the step's
    /// outcome, so no trigger gating happens here.
    pub async fn apply(
        &self,
        run_id: &str,
        step_id: &str,
        instructions: &[StateUpdateInstruction],
        store: &ContextStore,
    ) -> Vec<StateUpdateOutcome> {
        let mut outcomes = Vec::with_capacity(instructions.len());

        for (index, instruction) in instructions.iter().enumerate() {
            let key = format!("{run_id}:{step_id}:{index}");
            outcomes.push(self.apply_one(&key, instruction, store).await);
        }

        outcomes
    }

    async fn apply_one(&self, key: &str, instruction: &StateUpdateInstruction, store: &ContextStore) -> StateUpdateOutcome {
        let table = instruction.table.clone();

        let resolved = template::resolve_params(&instruction.values, store).and_then(|record| {
            let condition = template::resolve_params(&instruction.condition, store)?;
            Ok((record, condition))
        });
        let (record, condition) = match resolved {
            Ok(pair) => pair,
            Err(error) => {
                let detail = EngineError::state_update(&table, error.to_string());
                warn!(table = %table, key, %error, "state update failed to resolve");
                return StateUpdateOutcome {
                    table,
                    op: instruction.op,
                    record: JsonMap::new(),
                    committed: false,
                    error: Some(detail.to_string()),
                };
            }
        };

        let commit = match instruction.op {
            StateUpdateOp::Write => self.sink.write(&table, key, &record).await,
            StateUpdateOp::Update => self.sink.update(&table, key, &condition, &record).await,
            StateUpdateOp::Delete => self.sink.delete(&table, key, &condition).await,
        };

        match commit {
            Ok(()) => {
                debug!(table = %table, key, op = ?instruction.op, "state update committed");
                StateUpdateOutcome {
                    table,
                    op: instruction.op,
                    record,
                    committed: true,
                    error: None,
                }
            }
            Err(error) => {
                let detail = EngineError::state_update(&table, error.to_string());
                warn!(table = %table, key, %error, "state update commit failed");
                StateUpdateOutcome {
                    table,
                    op: instruction.op,
                    record,
                    committed: false,
                    error: Some(detail.to_string()),
                }
            }
        }
    }
}
