//! Immutable per-run lookup of operation descriptors.
//!
//! Descriptors are produced upstream by the OpenAPI collaborator; the
//! catalog only indexes them by operation id and runs a lightweight
//! preflight so obviously broken descriptors are rejected before any
//! workflow references them.

use anyhow::{Result, bail};
use charter_types::{OperationDescriptor, ParameterLocation};
use indexmap::IndexMap;

const SUPPORTED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Catalog of callable operations, immutable for a run's duration.
#[derive(Debug, Clone, Default)]
pub struct OperationCatalog {
    operations: IndexMap<String, OperationDescriptor>,
}

impl OperationCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from a set of descriptors, validating each.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = OperationDescriptor>) -> Result<Self> {
        let mut catalog = Self::new();
        for descriptor in descriptors {
            catalog.insert(descriptor)?;
        }
        Ok(catalog)
    }

    /// Insert one descriptor after preflight validation.
    pub fn insert(&mut self, descriptor: OperationDescriptor) -> Result<()> {
        validate_descriptor(&descriptor)?;
        if self.operations.contains_key(&descriptor.operation_id) {
            bail!("duplicate operation id '{}'", descriptor.operation_id);
        }
        self.operations.insert(descriptor.operation_id.clone(), descriptor);
        Ok(())
    }

    /// Look up a descriptor by operation id.
    pub fn get(&self, operation_id: &str) -> Option<&OperationDescriptor> {
        self.operations.get(operation_id)
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether the catalog holds no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Preflight checks mirroring the validation the source document went
/// through upstream, applied again at the engine boundary.
fn validate_descriptor(descriptor: &OperationDescriptor) -> Result<()> {
    if descriptor.operation_id.trim().is_empty() {
        bail!("operation descriptor with empty operation id");
    }
    if !SUPPORTED_METHODS.contains(&descriptor.method.as_str()) {
        bail!(
            "operation '{}': unsupported HTTP method '{}'",
            descriptor.operation_id,
            descriptor.method
        );
    }
    if !descriptor.path.starts_with('/') {
        bail!(
            "operation '{}': path template '{}' must start with '/'",
            descriptor.operation_id,
            descriptor.path
        );
    }

    // Path placeholders and declared path parameters must agree.
    let placeholders = path_placeholders(&descriptor.path);
    for placeholder in &placeholders {
        let declared = descriptor
            .parameters
            .properties
            .get(placeholder)
            .map(|spec| spec.location == ParameterLocation::Path)
            .unwrap_or(false);
        if !declared {
            bail!(
                "operation '{}': path placeholder '{{{}}}' has no declared path parameter",
                descriptor.operation_id,
                placeholder
            );
        }
    }
    for (name, spec) in &descriptor.parameters.properties {
        if spec.location == ParameterLocation::Path && !placeholders.contains(name) {
            bail!(
                "operation '{}': path parameter '{}' does not appear in path template '{}'",
                descriptor.operation_id,
                name,
                descriptor.path
            );
        }
    }

    Ok(())
}

fn path_placeholders(template: &str) -> Vec<String> {
    let mut placeholders = Vec::new();
    let mut remainder = template;
    while let Some(start) = remainder.find('{') {
        let after_open = &remainder[start + 1..];
        let Some(end) = after_open.find('}') else {
            break;
        };
        let name = after_open[..end].trim();
        if !name.is_empty() {
            placeholders.push(name.to_string());
        }
        remainder = &after_open[end + 1..];
    }
    placeholders
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(value: serde_json::Value) -> OperationDescriptor {
        serde_json::from_value(value).expect("descriptor")
    }

    #[test]
    fn insert_and_lookup_round_trip() {
        let mut catalog = OperationCatalog::new();
        catalog
            .insert(descriptor(json!({
                "operation_id": "listCustomers",
                "method": "GET",
                "path": "/customers"
            })))
            .expect("insert");
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("listCustomers").is_some());
        assert!(catalog.get("unknown").is_none());
    }

    #[test]
    fn duplicate_operation_ids_are_rejected() {
        let mut catalog = OperationCatalog::new();
        let spec = json!({"operation_id": "ping", "method": "GET", "path": "/ping"});
        catalog.insert(descriptor(spec.clone())).expect("first insert");
        assert!(catalog.insert(descriptor(spec)).is_err());
    }

    #[test]
    fn undeclared_path_placeholder_is_rejected() {
        let error = OperationCatalog::from_descriptors([descriptor(json!({
            "operation_id": "getCustomer",
            "method": "GET",
            "path": "/customers/{customerId}"
        }))])
        .expect_err("should fail");
        assert!(error.to_string().contains("customerId"));
    }

    #[test]
    fn declared_path_parameter_missing_from_template_is_rejected() {
        let error = OperationCatalog::from_descriptors([descriptor(json!({
            "operation_id": "getCustomer",
            "method": "GET",
            "path": "/customers",
            "parameters": {
                "properties": {"customerId": {"in": "path"}}
            }
        }))])
        .expect_err("should fail");
        assert!(error.to_string().contains("does not appear"));
    }

    #[test]
    fn unsupported_method_is_rejected() {
        let error = OperationCatalog::from_descriptors([descriptor(json!({
            "operation_id": "weird",
            "method": "FETCH",
            "path": "/x"
        }))])
        .expect_err("should fail");
        assert!(error.to_string().contains("unsupported HTTP method"));
    }
}
