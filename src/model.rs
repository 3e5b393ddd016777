//! Service and operation descriptors, plus the collaborator seams.
//!
//! A [`ServiceModel`] is deserialized from a service description document
//! and names the operations, pagination rules, and waiters a client can
//! use. The wire protocol itself stays behind two traits:
//! [`SerializeRequest`] turns operation parameters into a request
//! description and [`ParseResponse`] turns a response dict into parsed
//! data. Implementations come from the embedding SDK; this crate never
//! encodes or decodes a protocol itself.

use crate::endpoint::{Request, ResponseDict};
use crate::paginate::PaginationConfig;
use crate::waiter::WaiterConfig;
use crate::Result;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use url::Url;

fn default_http_method() -> String {
    "POST".to_string()
}

fn default_request_uri() -> String {
    "/".to_string()
}

/// One named operation of a service.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationModel {
    /// The operation name (e.g. `GetObject`).
    pub name: String,
    /// The HTTP method the operation uses.
    #[serde(default = "default_http_method")]
    pub http_method: String,
    /// The request URI template, relative to the endpoint URL.
    #[serde(default = "default_request_uri")]
    pub request_uri: String,
    /// Whether the response body is consumed as a stream instead of being
    /// buffered.
    #[serde(default)]
    pub streaming_output: bool,
}

/// Everything a client needs to know about one service.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceModel {
    /// The service name used in hook event names.
    pub service_name: String,
    /// The endpoint prefix (the host label, e.g. `dynamodb`).
    pub endpoint_prefix: String,
    /// Operations by name.
    #[serde(default)]
    pub operations: HashMap<String, OperationModel>,
    /// Pagination rules by operation name.
    #[serde(default)]
    pub pagination: HashMap<String, PaginationConfig>,
    /// Waiters by waiter name.
    #[serde(default)]
    pub waiters: HashMap<String, WaiterConfig>,
}

impl ServiceModel {
    /// Parses a service model from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| crate::Error::Configuration(format!("invalid service model: {e}")))
    }

    /// Looks up an operation by name.
    pub fn operation(&self, name: &str) -> Option<&OperationModel> {
        self.operations.get(name)
    }
}

/// Builds a request description from operation parameters.
///
/// Implemented by the protocol serializer of the embedding SDK (query,
/// json, rest-json, rest-xml, ...). The serializer owns the URL layout,
/// header conventions, and body encoding of its protocol.
pub trait SerializeRequest: Send + Sync {
    /// Serializes `params` for `operation` against `endpoint_url`.
    fn serialize(
        &self,
        operation: &OperationModel,
        params: &Value,
        endpoint_url: &Url,
    ) -> Result<Request>;

    /// Validates `params` before serialization.
    ///
    /// Called only when parameter validation is enabled in the client
    /// configuration. The default accepts everything.
    fn validate(&self, _operation: &OperationModel, _params: &Value) -> Result<()> {
        Ok(())
    }
}

/// Parses a response dict into a parsed-response document.
///
/// Implemented by the protocol parser of the embedding SDK. For error
/// responses the parsed document is expected to carry an `Error` object
/// with `Code` and `Message` members.
pub trait ParseResponse: Send + Sync {
    /// Parses `response` for `operation`.
    fn parse(&self, operation: &OperationModel, response: &ResponseDict) -> Result<Value>;
}

/// Resolves a dotted path (`Table.TableStatus`) to a single value.
///
/// Index segments (`Items[0]`) are honored; a bare array in the middle of
/// the path resolves to nothing (use [`resolve_path_multi`] for
/// projections).
pub(crate) fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        let (key, index) = split_index(segment);
        if !key.is_empty() {
            current = current.get(key)?;
        }
        if let Some(index) = index {
            current = current.get(index?)?;
        }
    }
    Some(current)
}

/// Resolves a dotted path, projecting over arrays.
///
/// `Reservations[].Instances[].State.Name` (or the same path without the
/// explicit `[]` markers) yields every leaf value reached through the
/// arrays along the way.
pub(crate) fn resolve_path_multi<'a>(value: &'a Value, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut results = Vec::new();
    project(value, &segments, &mut results);
    results
}

fn project<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((segment, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    let (key, index) = split_index(segment);
    let Some(next) = (if key.is_empty() {
        Some(value)
    } else {
        value.get(key)
    }) else {
        return;
    };
    match index {
        Some(Some(i)) => {
            if let Some(item) = next.get(i) {
                project(item, rest, out);
            }
        }
        Some(None) => {
            if let Some(items) = next.as_array() {
                for item in items {
                    project(item, rest, out);
                }
            }
        }
        None => {
            // An unannotated array still projects, matching how waiter
            // arguments are written without the [] markers.
            if let Some(items) = next.as_array() {
                if rest.is_empty() {
                    out.push(next);
                } else {
                    for item in items {
                        project(item, rest, out);
                    }
                }
            } else {
                project(next, rest, out);
            }
        }
    }
}

/// Splits `Key[3]` into `("Key", Some(Some(3)))`, `Key[]` into
/// `("Key", Some(None))`, and `Key` into `("Key", None)`.
fn split_index(segment: &str) -> (&str, Option<Option<usize>>) {
    match segment.find('[') {
        Some(open) if segment.ends_with(']') => {
            let key = &segment[..open];
            let inner = &segment[open + 1..segment.len() - 1];
            if inner.is_empty() {
                (key, Some(None))
            } else {
                (key, Some(inner.parse::<usize>().ok()))
            }
        }
        _ => (segment, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn model_parses_from_json() {
        let model = ServiceModel::from_json(
            r#"{
                "service_name": "widgets",
                "endpoint_prefix": "widgets",
                "operations": {
                    "ListWidgets": {"name": "ListWidgets"},
                    "GetWidget": {"name": "GetWidget", "http_method": "GET", "streaming_output": true}
                }
            }"#,
        )
        .unwrap();
        assert_eq!(model.service_name, "widgets");
        assert!(model.operation("GetWidget").unwrap().streaming_output);
        assert_eq!(model.operation("ListWidgets").unwrap().http_method, "POST");
        assert!(model.operation("DeleteWidget").is_none());
    }

    #[test]
    fn unknown_model_keys_are_rejected() {
        assert!(ServiceModel::from_json(
            r#"{"service_name": "w", "endpoint_prefix": "w", "colour": "blue"}"#
        )
        .is_err());
    }

    #[test]
    fn resolve_path_walks_objects_and_indexes() {
        let doc = json!({"Table": {"TableStatus": "ACTIVE", "Keys": ["a", "b"]}});
        assert_eq!(
            resolve_path(&doc, "Table.TableStatus"),
            Some(&json!("ACTIVE"))
        );
        assert_eq!(resolve_path(&doc, "Table.Keys[1]"), Some(&json!("b")));
        assert_eq!(resolve_path(&doc, "Table.Missing"), None);
    }

    #[test]
    fn resolve_path_multi_projects_arrays() {
        let doc = json!({
            "Reservations": [
                {"Instances": [{"State": {"Name": "running"}}, {"State": {"Name": "pending"}}]},
                {"Instances": [{"State": {"Name": "running"}}]}
            ]
        });
        let names: Vec<_> = resolve_path_multi(&doc, "Reservations[].Instances[].State.Name")
            .into_iter()
            .cloned()
            .collect();
        assert_eq!(
            names,
            vec![json!("running"), json!("pending"), json!("running")]
        );

        // The same path without [] markers projects identically.
        let names = resolve_path_multi(&doc, "Reservations.Instances.State.Name");
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn resolve_path_multi_on_terminal_array_returns_the_array() {
        let doc = json!({"Contents": [1, 2, 3]});
        let values = resolve_path_multi(&doc, "Contents");
        assert_eq!(values, vec![&json!([1, 2, 3])]);
    }
}
