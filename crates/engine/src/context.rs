//! Per-run context store holding the five fixed namespaces.
//!
//! The store is owned by exactly one workflow run: created empty, seeded
//! once from the caller's initial context, mutated additively while steps
//! execute, and dropped at run end. Lookups walk dotted paths across nested
//! objects and sequences and report a miss as `None`; callers decide whether
//! a missing value is fatal.

use anyhow::{Result, bail};
use serde_json::{Map as JsonMap, Value};
use std::fmt;

/// One of the five fixed top-level context categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Business data loaded ahead of the run and refreshed by
    /// context-refreshing operations.
    Db,
    /// Durable workflow state, appended to by state updates. Also mirrors
    /// the latest response under `state.last_response`.
    State,
    /// The triggering event or request payload.
    Input,
    /// Values computed by the external decision-maker; write-once per key.
    Logic,
    /// The most recent operation response; replaced wholesale per step.
    Response,
}

impl Namespace {
    /// All namespaces, in the order they are conventionally listed.
    pub const ALL: [Namespace; 5] = [
        Namespace::Db,
        Namespace::State,
        Namespace::Input,
        Namespace::Logic,
        Namespace::Response,
    ];

    /// Canonical lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Db => "db",
            Namespace::State => "state",
            Namespace::Input => "input",
            Namespace::Logic => "logic",
            Namespace::Response => "response",
        }
    }

    /// Parse a namespace name; anything outside the fixed five is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "db" => Some(Namespace::Db),
            "state" => Some(Namespace::State),
            "input" => Some(Namespace::Input),
            "logic" => Some(Namespace::Logic),
            "response" => Some(Namespace::Response),
            _ => None,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime context for a single workflow run.
#[derive(Debug, Clone)]
pub struct ContextStore {
    db: Value,
    state: Value,
    input: Value,
    logic: Value,
    response: Value,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextStore {
    /// Create a store with every namespace rooted at an empty object.
    pub fn new() -> Self {
        Self {
            db: Value::Object(JsonMap::new()),
            state: Value::Object(JsonMap::new()),
            input: Value::Object(JsonMap::new()),
            logic: Value::Object(JsonMap::new()),
            response: Value::Object(JsonMap::new()),
        }
    }

    /// Create a store seeded from a caller-supplied initial context.
    ///
    /// Recognized top-level keys are `db`, `state`, `input`, and `logic`
    /// (pre-computed decision fixtures). Anything else, including `response`,
    /// is a malformed initial context and fails fast.
    pub fn seeded(initial: &JsonMap<String, Value>) -> Result<Self> {
        let mut store = Self::new();
        for (namespace_name, data) in initial {
            match Namespace::parse(namespace_name) {
                Some(Namespace::Response) | None => {
                    bail!(
                        "initial context key '{}' is not a seedable namespace (expected db, state, input, or logic)",
                        namespace_name
                    );
                }
                Some(namespace) => {
                    if !data.is_object() {
                        bail!("initial context namespace '{}' must be an object", namespace_name);
                    }
                    *store.root_mut(namespace) = data.clone();
                }
            }
        }
        Ok(store)
    }

    fn root(&self, namespace: Namespace) -> &Value {
        match namespace {
            Namespace::Db => &self.db,
            Namespace::State => &self.state,
            Namespace::Input => &self.input,
            Namespace::Logic => &self.logic,
            Namespace::Response => &self.response,
        }
    }

    fn root_mut(&mut self, namespace: Namespace) -> &mut Value {
        match namespace {
            Namespace::Db => &mut self.db,
            Namespace::State => &mut self.state,
            Namespace::Input => &mut self.input,
            Namespace::Logic => &mut self.logic,
            Namespace::Response => &mut self.response,
        }
    }

    /// Walk a dotted path within a namespace.
    ///
    /// Path segments address object keys or numeric sequence indices. Any
    /// segment that cannot be applied yields `None`; traversal never panics.
    pub fn lookup(&self, namespace: Namespace, path: &str) -> Option<&Value> {
        traverse(self.root(namespace), path)
    }

    /// Set a value at a dotted path, creating intermediate objects as needed.
    ///
    /// An intermediate segment holding a non-object value is replaced by an
    /// object so the write always lands.
    pub fn set(&mut self, namespace: Namespace, path: &str, value: Value) {
        let mut current = self.root_mut(namespace);
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            if !current.is_object() {
                *current = Value::Object(JsonMap::new());
            }
            let map = current.as_object_mut().expect("object was just ensured");
            if segments.peek().is_none() {
                map.insert(segment.to_string(), value);
                return;
            }
            current = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(JsonMap::new()));
        }
    }

    /// Shallow-merge an object into a namespace root.
    ///
    /// Keys present in `incoming` replace existing entries; other entries
    /// are kept. A non-object namespace root or a non-object `incoming`
    /// value degenerates to wholesale replacement.
    pub fn merge(&mut self, namespace: Namespace, incoming: &Value) {
        let root = self.root_mut(namespace);
        match (root.as_object_mut(), incoming.as_object()) {
            (Some(existing), Some(additions)) => {
                for (key, value) in additions {
                    existing.insert(key.clone(), value.clone());
                }
            }
            _ => *root = incoming.clone(),
        }
    }

    /// Replace a namespace root wholesale.
    pub fn replace(&mut self, namespace: Namespace, value: Value) {
        *self.root_mut(namespace) = value;
    }

    /// Whether a top-level `logic` key has already been written.
    pub fn has_logic(&self, key: &str) -> bool {
        self.logic.as_object().map(|map| map.contains_key(key)).unwrap_or(false)
    }

    /// Write a `logic` value, enforcing the write-once contract.
    ///
    /// Returns `false` (leaving the existing value untouched) when the key
    /// was already present.
    pub fn set_logic_value(&mut self, key: &str, value: Value) -> bool {
        if self.has_logic(key) {
            return false;
        }
        self.set(Namespace::Logic, key, value);
        true
    }

    /// Snapshot of the `logic` namespace for end-of-run audit.
    pub fn logic_snapshot(&self) -> JsonMap<String, Value> {
        self.logic.as_object().cloned().unwrap_or_default()
    }
}

fn traverse<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
