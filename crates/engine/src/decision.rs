//! Decision-maker collaborator supplying `logic.*` values between steps.
//!
//! The runner yields to this collaborator at designated suspension points
//! and resumes once the required keys are present. Keeping the seam here
//! lets the deterministic engine be tested in isolation by serving decision
//! values from plain fixtures.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value};

use crate::context::ContextStore;

/// Supplies values for requested `logic` keys.
///
/// Keys the maker cannot produce are simply absent from the returned map;
/// the following resolve phase surfaces them as unresolved references.
#[async_trait]
pub trait DecisionMaker: Send + Sync {
    /// Compute values for `keys` given read-only access to the context.
    async fn supply(&self, keys: &[String], store: &ContextStore) -> Result<JsonMap<String, Value>>;
}

/// Serves pre-computed decisions from a fixed map.
#[derive(Debug, Default)]
pub struct FixtureDecisions {
    values: JsonMap<String, Value>,
}

impl FixtureDecisions {
    /// Create a fixture serving the given values.
    pub fn new(values: JsonMap<String, Value>) -> Self {
        Self { values }
    }
}

#[async_trait]
impl DecisionMaker for FixtureDecisions {
    async fn supply(&self, keys: &[String], _store: &ContextStore) -> Result<JsonMap<String, Value>> {
        let mut supplied = JsonMap::new();
        for key in keys {
            if let Some(value) = self.values.get(key) {
                supplied.insert(key.clone(), value.clone());
            }
        }
        Ok(supplied)
    }
}

/// Never supplies anything; unresolved `logic` references then fail the run
/// as the step-ordering defect they are.
#[derive(Debug, Default)]
pub struct NoDecisions;

#[async_trait]
impl DecisionMaker for NoDecisions {
    async fn supply(&self, _keys: &[String], _store: &ContextStore) -> Result<JsonMap<String, Value>> {
        Ok(JsonMap::new())
    }
}
