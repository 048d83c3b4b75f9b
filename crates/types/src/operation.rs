//! Operation descriptors supplied by the external OpenAPI collaborator.
//!
//! A descriptor identifies one callable API operation: its method and path
//! template, the declared request parameter schema, and (optionally) the
//! expected response shape. Descriptors are parsed upstream and treated as
//! immutable for the duration of a workflow run.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Where a request parameter is placed when the call is built.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    /// Substituted into the path template (`/customers/{customerId}`).
    Path,
    /// Appended to the query string.
    Query,
    /// Included in the JSON request body.
    #[default]
    Body,
}

/// Declared shape of a single request parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Request placement; defaults to the body when the schema omits it.
    #[serde(default, rename = "in")]
    pub location: ParameterLocation,

    /// Declared JSON type ("string", "number", "integer", "boolean",
    /// "array", "object"). Absent means any type is accepted.
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
}

/// Request parameter schema: named properties plus the required subset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter declarations keyed by name, in authoring order.
    #[serde(default)]
    pub properties: IndexMap<String, ParameterSpec>,

    /// Names of parameters that must be present after resolution.
    #[serde(default)]
    pub required: Vec<String>,
}

impl ParameterSchema {
    /// Looks up the declared placement for a parameter, defaulting to body
    /// for anything the schema does not mention.
    pub fn location_of(&self, name: &str) -> ParameterLocation {
        self.properties.get(name).map(|spec| spec.location).unwrap_or_default()
    }
}

/// Declared shape of a single response body field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseField {
    /// Declared JSON type; absent means any type is accepted.
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
}

/// Response body schema used to detect contract violations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseSchema {
    /// Field declarations keyed by name, in authoring order.
    #[serde(default)]
    pub properties: IndexMap<String, ResponseField>,

    /// Names of fields a conforming response must contain.
    #[serde(default)]
    pub required: Vec<String>,
}

/// One externally callable API operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationDescriptor {
    /// Unique operation identifier (the OpenAPI `operationId`).
    pub operation_id: String,

    /// HTTP method as an upper-case token ("GET", "POST", ...).
    pub method: String,

    /// Path template with `{placeholder}` segments for path parameters.
    pub path: String,

    /// Optional one-line summary carried over from the source document.
    #[serde(default)]
    pub summary: Option<String>,

    /// Request parameter schema.
    #[serde(default)]
    pub parameters: ParameterSchema,

    /// Expected response body schema, when one was declared.
    #[serde(default)]
    pub response: Option<ResponseSchema>,

    /// Whether a failure of this operation is fatal to the enclosing run.
    #[serde(default)]
    pub mandatory: bool,

    /// Whether a successful response is also merged into the `db` namespace.
    #[serde(default)]
    pub context_refreshing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_deserializes_with_defaults() {
        let descriptor: OperationDescriptor = serde_json::from_value(json!({
            "operation_id": "getCustomer",
            "method": "GET",
            "path": "/customers/{customerId}",
            "parameters": {
                "properties": {
                    "customerId": {"in": "path", "type": "string"}
                },
                "required": ["customerId"]
            }
        }))
        .expect("descriptor");

        assert_eq!(descriptor.operation_id, "getCustomer");
        assert!(!descriptor.mandatory);
        assert!(!descriptor.context_refreshing);
        assert!(descriptor.response.is_none());
        assert_eq!(descriptor.parameters.location_of("customerId"), ParameterLocation::Path);
    }

    #[test]
    fn undeclared_parameters_default_to_body() {
        let schema = ParameterSchema::default();
        assert_eq!(schema.location_of("anything"), ParameterLocation::Body);
    }
}
