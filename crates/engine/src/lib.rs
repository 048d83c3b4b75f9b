//! # Charter Engine
//!
//! The Charter engine takes a declared sequence of API operations annotated
//! with orchestration metadata, resolves their parameters against a
//! multi-namespace runtime context, executes them against real endpoints,
//! and applies declared post-call state mutations.
//!
//! ## Key Features
//!
//! - **Context Store**: five fixed namespaces (`db`, `state`, `input`,
//!   `logic`, `response`) owned by exactly one run
//! - **Template Resolution**: `{{namespace.path}}` substitution that keeps
//!   the typed value for whole-expression leaves
//! - **Operation Invocation**: schema-aware request building with a single
//!   configurable retry policy for transient failures
//! - **State Updates**: declarative, independently committed post-call
//!   writes gated by the step outcome
//! - **Sequential Runner**: a strict state machine with explicit suspension
//!   points for externally computed `logic` values and cancellation
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use charter_engine::{
//!     MemorySink, OperationCatalog, OperationInvoker, RestTransport,
//!     StateUpdateApplier, WorkflowRunner,
//! };
//! use charter_api::ApiClient;
//!
//! # async fn run_example(catalog: OperationCatalog, steps: Vec<charter_types::StepDefinition>) -> anyhow::Result<()> {
//! let transport = Arc::new(RestTransport::new(ApiClient::new("http://localhost:8000")?));
//! let runner = WorkflowRunner::new(
//!     catalog,
//!     OperationInvoker::new(transport),
//!     StateUpdateApplier::new(Arc::new(MemorySink::new())),
//! );
//! let result = runner.run("run-1", &serde_json::Map::new(), &steps).await?;
//! println!("{:?}", result.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The engine is organized into several key modules:
//!
//! - **`context`**: the per-run namespace store
//! - **`template`**: expression extraction and resolution
//! - **`catalog`**: immutable operation descriptor lookup
//! - **`invoke`**: request building, classification, and retry
//! - **`sink`**: state sink collaborator and update applier
//! - **`decision`**: the decision-maker suspension seam
//! - **`runner`**: the sequential run state machine

pub mod catalog;
pub mod context;
pub mod decision;
pub mod error;
pub mod invoke;
pub mod runner;
pub mod sink;
pub mod template;
pub mod transport;

// Re-export commonly used types for convenience
pub use catalog::OperationCatalog;
pub use context::{ContextStore, Namespace};
pub use decision::{DecisionMaker, FixtureDecisions, NoDecisions};
pub use error::EngineError;
pub use invoke::{CallOutcome, OperationInvoker, RetryPolicy};
pub use runner::{RunControl, WorkflowRunner};
pub use sink::{MemorySink, StateSink, StateUpdateApplier};
pub use template::{collect_references, extract_references, resolve_expression, resolve_value};
pub use transport::{HttpTransport, RestTransport, TransportReply};
