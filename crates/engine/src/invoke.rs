//! Operation invoker: request building, outcome classification, and retry.
//!
//! Given a descriptor and an already resolved parameter set, the invoker
//! splits parameters by their declared location, issues the call through the
//! transport, and classifies the outcome. Transient failures (transport
//! errors and 5xx replies) are retried under the configured policy; client
//! errors and schema violations are not. On success the response body is
//! committed into the context store's `response` namespace (and shallow
//! merged into `db` for context-refreshing operations) so later steps can
//! reference it.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use charter_types::{ApiResponse, OperationDescriptor, ParameterLocation, ParameterSchema, ResponseSchema};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Method;
use serde_json::{Map as JsonMap, Value};
use tracing::{debug, warn};

use crate::context::{ContextStore, Namespace};
use crate::error::EngineError;
use crate::template::render_scalar;
use crate::transport::HttpTransport;

const MAX_ERROR_DETAIL_CHARS: usize = 160;

/// Bounded exponential backoff applied to transient call failures.
///
/// One policy instance is owned by the invoker and shared by every call it
/// makes; call sites never carry their own retry logic.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap applied to the exponential schedule.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `completed_attempts` attempts have failed.
    pub fn delay_for(&self, completed_attempts: u32) -> Duration {
        let base_ms = self.base_delay.as_millis();
        if base_ms == 0 {
            return Duration::from_millis(0);
        }
        let max_ms = self.max_delay.as_millis().max(base_ms);
        let shift = completed_attempts.saturating_sub(1).min(20);
        let backoff_ms = base_ms.saturating_mul(1u128 << shift).min(max_ms);
        Duration::from_millis(backoff_ms as u64)
    }
}

/// Result of invoking one operation, with the attempt count for audit.
#[derive(Debug)]
pub struct CallOutcome {
    /// Attempts made; 0 when validation failed before any call.
    pub attempts: u32,
    /// The captured response, or the classified failure.
    pub outcome: Result<ApiResponse, EngineError>,
}

/// Executes operations against the HTTP transport.
pub struct OperationInvoker {
    transport: Arc<dyn HttpTransport>,
    retry: RetryPolicy,
}

impl OperationInvoker {
    /// Create an invoker with the default retry policy.
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Invoke one operation with resolved parameters.
    ///
    /// Mutates the store only on success: the body replaces the `response`
    /// namespace, is mirrored under `state.last_response`, and is shallow
    /// merged into `db` when the descriptor is context-refreshing. State
    /// updates are never triggered from here.
    pub async fn invoke(&self, descriptor: &OperationDescriptor, params: &JsonMap<String, Value>, store: &mut ContextStore) -> CallOutcome {
        if let Err(error) = validate_params(descriptor, params) {
            return CallOutcome {
                attempts: 0,
                outcome: Err(error),
            };
        }
        let parts = match build_request_parts(descriptor, params) {
            Ok(parts) => parts,
            Err(error) => {
                return CallOutcome {
                    attempts: 0,
                    outcome: Err(error),
                };
            }
        };
        let Ok(method) = Method::from_str(&descriptor.method) else {
            return CallOutcome {
                attempts: 0,
                outcome: Err(EngineError::schema(
                    &descriptor.operation_id,
                    format!("unsupported HTTP method '{}'", descriptor.method),
                )),
            };
        };

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            debug!(
                operation = %descriptor.operation_id,
                %method,
                path = %parts.path,
                attempt = attempts,
                "invoking operation"
            );
            let reply = self
                .transport
                .send(method.clone(), &parts.path, &parts.query, parts.body.as_ref())
                .await;

            let failure = match reply {
                Ok(reply) if (200..300).contains(&reply.status) => {
                    if let Some(schema) = &descriptor.response
                        && let Err(error) = validate_response(descriptor, schema, &reply.body)
                    {
                        return CallOutcome {
                            attempts,
                            outcome: Err(error),
                        };
                    }
                    commit_response(descriptor, store, &reply.body);
                    return CallOutcome {
                        attempts,
                        outcome: Ok(ApiResponse {
                            status: reply.status,
                            body: reply.body,
                        }),
                    };
                }
                Ok(reply) if (400..500).contains(&reply.status) => {
                    return CallOutcome {
                        attempts,
                        outcome: Err(EngineError::client(
                            &descriptor.operation_id,
                            reply.status,
                            truncate_detail(&render_scalar(&reply.body)),
                        )),
                    };
                }
                Ok(reply) => EngineError::transient(&descriptor.operation_id, attempts, format!("HTTP {}", reply.status)),
                Err(error) => EngineError::transient(&descriptor.operation_id, attempts, truncate_detail(&error.to_string())),
            };

            if attempts >= self.retry.max_attempts {
                warn!(
                    operation = %descriptor.operation_id,
                    attempts,
                    "retry budget exhausted"
                );
                return CallOutcome {
                    attempts,
                    outcome: Err(failure),
                };
            }

            let delay = self.retry.delay_for(attempts);
            warn!(
                operation = %descriptor.operation_id,
                attempt = attempts,
                retry_in_ms = delay.as_millis() as u64,
                "retrying after transient failure"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

struct RequestParts {
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

fn build_request_parts(descriptor: &OperationDescriptor, params: &JsonMap<String, Value>) -> Result<RequestParts, EngineError> {
    let mut path_variables: JsonMap<String, Value> = JsonMap::new();
    let mut query = Vec::new();
    let mut body = JsonMap::new();

    // GET/DELETE/HEAD calls carry no JSON body; their body-located
    // parameters travel as query arguments instead.
    let body_as_query = matches!(descriptor.method.as_str(), "GET" | "DELETE" | "HEAD");

    for (name, value) in params {
        match descriptor.parameters.location_of(name) {
            ParameterLocation::Path => {
                path_variables.insert(name.clone(), value.clone());
            }
            ParameterLocation::Query => query.push((name.clone(), render_scalar(value))),
            ParameterLocation::Body if body_as_query => query.push((name.clone(), render_scalar(value))),
            ParameterLocation::Body => {
                body.insert(name.clone(), value.clone());
            }
        }
    }

    let path = render_path(descriptor, &path_variables)?;
    Ok(RequestParts {
        path,
        query,
        body: if body.is_empty() { None } else { Some(Value::Object(body)) },
    })
}

fn render_path(descriptor: &OperationDescriptor, variables: &JsonMap<String, Value>) -> Result<String, EngineError> {
    let mut path = descriptor.path.clone();
    for (name, value) in variables {
        let encoded = utf8_percent_encode(&render_scalar(value), NON_ALPHANUMERIC).to_string();
        path = path.replace(&format!("{{{}}}", name), &encoded);
    }
    if path.contains('{') {
        return Err(EngineError::schema(
            &descriptor.operation_id,
            format!("path template '{}' still has unbound placeholders after '{}'", descriptor.path, path),
        ));
    }
    Ok(path)
}

fn validate_params(descriptor: &OperationDescriptor, params: &JsonMap<String, Value>) -> Result<(), EngineError> {
    let schema: &ParameterSchema = &descriptor.parameters;
    for required in &schema.required {
        if !params.contains_key(required) {
            return Err(EngineError::schema(
                &descriptor.operation_id,
                format!("missing required parameter '{}'", required),
            ));
        }
    }
    for (name, value) in params {
        if let Some(spec) = schema.properties.get(name)
            && let Some(type_name) = &spec.type_name
            && !json_type_matches(type_name, value)
        {
            return Err(EngineError::schema(
                &descriptor.operation_id,
                format!("parameter '{}' is not of declared type '{}'", name, type_name),
            ));
        }
    }
    Ok(())
}

fn validate_response(descriptor: &OperationDescriptor, schema: &ResponseSchema, body: &Value) -> Result<(), EngineError> {
    if schema.required.is_empty() && schema.properties.is_empty() {
        return Ok(());
    }
    let Some(fields) = body.as_object() else {
        return Err(EngineError::schema(
            &descriptor.operation_id,
            "response body is not an object".to_string(),
        ));
    };
    for required in &schema.required {
        if !fields.contains_key(required) {
            return Err(EngineError::schema(
                &descriptor.operation_id,
                format!("response is missing required field '{}'", required),
            ));
        }
    }
    for (name, field) in &schema.properties {
        if let Some(value) = fields.get(name)
            && let Some(type_name) = &field.type_name
            && !json_type_matches(type_name, value)
        {
            return Err(EngineError::schema(
                &descriptor.operation_id,
                format!("response field '{}' is not of declared type '{}'", name, type_name),
            ));
        }
    }
    Ok(())
}

fn json_type_matches(type_name: &str, value: &Value) -> bool {
    match type_name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn commit_response(descriptor: &OperationDescriptor, store: &mut ContextStore, body: &Value) {
    store.replace(Namespace::Response, body.clone());
    store.set(Namespace::State, "last_response", body.clone());
    if descriptor.context_refreshing {
        store.merge(Namespace::Db, body);
    }
}

fn truncate_detail(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_ERROR_DETAIL_CHARS {
        return trimmed.to_string();
    }
    let truncated: String = trimmed.chars().take(MAX_ERROR_DETAIL_CHARS - 3).collect();
    format!("{}...", truncated.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportReply;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    struct RecordedCall {
        method: Method,
        path: String,
        query: Vec<(String, String)>,
        body: Option<Value>,
    }

    /// Replays a queue of scripted replies and records every call.
    struct ScriptedTransport {
        replies: Mutex<VecDeque<anyhow::Result<TransportReply>>>,
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<anyhow::Result<TransportReply>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, method: Method, path: &str, query: &[(String, String)], body: Option<&Value>) -> anyhow::Result<TransportReply> {
            self.calls.lock().unwrap().push(RecordedCall {
                method,
                path: path.to_string(),
                query: query.to_vec(),
                body: body.cloned(),
            });
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("scripted transport exhausted")))
        }
    }

    fn ok(status: u16, body: Value) -> anyhow::Result<TransportReply> {
        Ok(TransportReply { status, body })
    }

    fn adjustment_descriptor() -> OperationDescriptor {
        serde_json::from_value(json!({
            "operation_id": "createBillingAdjustment",
            "method": "POST",
            "path": "/customers/{customerId}/adjustments",
            "parameters": {
                "properties": {
                    "customerId": {"in": "path", "type": "string"},
                    "dryRun": {"in": "query", "type": "boolean"},
                    "amount": {"in": "body", "type": "number"}
                },
                "required": ["customerId", "amount"]
            },
            "response": {
                "properties": {
                    "adjustmentId": {"type": "string"},
                    "amount": {"type": "number"}
                },
                "required": ["adjustmentId"]
            },
            "mandatory": true
        }))
        .expect("descriptor")
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn params(value: Value) -> JsonMap<String, Value> {
        value.as_object().expect("object").clone()
    }

    #[tokio::test]
    async fn success_builds_request_and_commits_response() {
        let transport = ScriptedTransport::new(vec![ok(201, json!({"adjustmentId": "ADJ-9", "amount": 75}))]);
        let invoker = OperationInvoker::new(transport.clone());
        let mut store = ContextStore::new();

        let call = invoker
            .invoke(
                &adjustment_descriptor(),
                &params(json!({"customerId": "CUST 1", "dryRun": false, "amount": 75})),
                &mut store,
            )
            .await;

        assert_eq!(call.attempts, 1);
        let response = call.outcome.expect("success");
        assert_eq!(response.status, 201);

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, Method::POST);
        assert_eq!(calls[0].path, "/customers/CUST%201/adjustments");
        assert_eq!(calls[0].query, vec![("dryRun".to_string(), "false".to_string())]);
        assert_eq!(calls[0].body, Some(json!({"amount": 75})));

        assert_eq!(store.lookup(Namespace::Response, "adjustmentId"), Some(&json!("ADJ-9")));
        assert_eq!(store.lookup(Namespace::State, "last_response.adjustmentId"), Some(&json!("ADJ-9")));
        // Not context-refreshing, so db stays untouched.
        assert!(store.lookup(Namespace::Db, "adjustmentId").is_none());
    }

    #[tokio::test]
    async fn context_refreshing_operations_merge_into_db() {
        let descriptor: OperationDescriptor = serde_json::from_value(json!({
            "operation_id": "getCustomer",
            "method": "GET",
            "path": "/customer",
            "context_refreshing": true
        }))
        .expect("descriptor");
        let transport = ScriptedTransport::new(vec![ok(200, json!({"customer": {"id": "CUST-1"}}))]);
        let invoker = OperationInvoker::new(transport);
        let mut store = ContextStore::new();

        let call = invoker.invoke(&descriptor, &JsonMap::new(), &mut store).await;
        assert!(call.outcome.is_ok());
        assert_eq!(store.lookup(Namespace::Db, "customer.id"), Some(&json!("CUST-1")));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let transport = ScriptedTransport::new(vec![ok(422, json!({"error": "amount too large"}))]);
        let invoker = OperationInvoker::new(transport.clone()).with_retry_policy(fast_retry());
        let mut store = ContextStore::new();

        let call = invoker
            .invoke(
                &adjustment_descriptor(),
                &params(json!({"customerId": "CUST-1", "amount": 75})),
                &mut store,
            )
            .await;

        assert_eq!(call.attempts, 1);
        assert!(matches!(call.outcome, Err(EngineError::ClientExecution { status: 422, .. })));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn transient_failures_retry_until_success() {
        let transport = ScriptedTransport::new(vec![
            ok(503, Value::Null),
            Err(anyhow!("connection reset by peer")),
            ok(200, json!({"adjustmentId": "ADJ-1", "amount": 10})),
        ]);
        let invoker = OperationInvoker::new(transport.clone()).with_retry_policy(fast_retry());
        let mut store = ContextStore::new();

        let call = invoker
            .invoke(
                &adjustment_descriptor(),
                &params(json!({"customerId": "CUST-1", "amount": 10})),
                &mut store,
            )
            .await;

        assert_eq!(call.attempts, 3);
        assert!(call.outcome.is_ok());
    }

    #[tokio::test]
    async fn transient_failures_exhaust_the_retry_budget() {
        let transport = ScriptedTransport::new(vec![
            ok(500, Value::Null),
            ok(502, Value::Null),
            ok(503, Value::Null),
        ]);
        let invoker = OperationInvoker::new(transport.clone()).with_retry_policy(fast_retry());
        let mut store = ContextStore::new();

        let call = invoker
            .invoke(
                &adjustment_descriptor(),
                &params(json!({"customerId": "CUST-1", "amount": 10})),
                &mut store,
            )
            .await;

        assert_eq!(call.attempts, 3);
        assert!(matches!(call.outcome, Err(EngineError::TransientExecution { attempts: 3, .. })));
        // Nothing committed on failure.
        assert!(store.lookup(Namespace::State, "last_response").is_none());
    }

    #[tokio::test]
    async fn missing_required_parameter_fails_before_any_call() {
        let transport = ScriptedTransport::new(vec![]);
        let invoker = OperationInvoker::new(transport.clone());
        let mut store = ContextStore::new();

        let call = invoker
            .invoke(&adjustment_descriptor(), &params(json!({"customerId": "CUST-1"})), &mut store)
            .await;

        assert_eq!(call.attempts, 0);
        assert!(matches!(call.outcome, Err(EngineError::SchemaValidation { .. })));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn mistyped_parameter_fails_before_any_call() {
        let transport = ScriptedTransport::new(vec![]);
        let invoker = OperationInvoker::new(transport);
        let mut store = ContextStore::new();

        let call = invoker
            .invoke(
                &adjustment_descriptor(),
                &params(json!({"customerId": "CUST-1", "amount": "seventy-five"})),
                &mut store,
            )
            .await;

        assert_eq!(call.attempts, 0);
        let error = call.outcome.expect_err("should fail");
        assert!(error.to_string().contains("amount"));
    }

    #[tokio::test]
    async fn contract_violating_response_fails_without_retry() {
        let transport = ScriptedTransport::new(vec![ok(200, json!({"amount": 75}))]);
        let invoker = OperationInvoker::new(transport.clone()).with_retry_policy(fast_retry());
        let mut store = ContextStore::new();

        let call = invoker
            .invoke(
                &adjustment_descriptor(),
                &params(json!({"customerId": "CUST-1", "amount": 75})),
                &mut store,
            )
            .await;

        assert_eq!(call.attempts, 1);
        let error = call.outcome.expect_err("should fail");
        assert!(matches!(error, EngineError::SchemaValidation { .. }));
        assert!(error.to_string().contains("adjustmentId"));
        assert!(store.lookup(Namespace::Response, "amount").is_none());
    }

    #[test]
    fn retry_delays_grow_exponentially_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(10), Duration::from_millis(350));
    }
}
