//! Tool registry: name → schema + async handler.
//!
//! The registry is the containment boundary the error design leans on: a tool
//! invocation always yields a JSON value (the handler's result or a
//! structured `{"error": ...}`), never a fault that could take the session
//! down with it.

use crate::error::ToolError;
use futures::future::BoxFuture;
use parlance_realtime_types::ToolSpec;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

pub type ToolResult = Result<Value, ToolError>;

/// An async handler taking validated arguments.
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ToolResult> + Send + Sync>;

/// Declared signature of a callable tool.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema object description of the parameters.
    pub parameters: Value,
    pub required: Vec<String>,
}

impl ToolDefinition {
    /// The advertisable spec, with the `required` list folded into the schema.
    pub fn spec(&self) -> ToolSpec {
        let mut parameters = self.parameters.clone();
        if let Value::Object(map) = &mut parameters
            && !self.required.is_empty()
        {
            map.insert(
                "required".to_string(),
                Value::Array(self.required.iter().map(|r| json!(r)).collect()),
            );
        }
        ToolSpec::function(self.name.clone(), self.description.clone(), parameters)
    }
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

/// Name-keyed tool collection. Registration is last-wins: a duplicate name
/// silently replaces the prior definition and handler.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: ToolDefinition, handler: ToolHandler) {
        let mut tools = self.tools.write().expect("tool registry lock poisoned");
        let name = definition.name.clone();
        if tools
            .insert(name.clone(), RegisteredTool { definition, handler })
            .is_some()
        {
            debug!(tool = %name, "replaced existing tool registration");
        } else {
            info!(tool = %name, "registered tool");
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Specs for `session.update`, in stable name order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .values()
            .map(|tool| tool.definition.spec())
            .collect()
    }

    /// Invokes a tool by name with raw argument JSON. Never faults: every
    /// failure path folds into a `{"error": ...}` value the service can read.
    pub async fn invoke(&self, name: &str, raw_arguments: &str) -> Value {
        match self.try_invoke(name, raw_arguments).await {
            Ok(value) => value,
            Err(e) => {
                warn!(tool = %name, error = %e, "tool invocation failed");
                json!({ "error": e.to_string() })
            }
        }
    }

    async fn try_invoke(&self, name: &str, raw_arguments: &str) -> ToolResult {
        let (definition, handler) = {
            let tools = self.tools.read().expect("tool registry lock poisoned");
            let tool = tools
                .get(name)
                .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
            (tool.definition.clone(), tool.handler.clone())
        };

        let arguments = parse_arguments(raw_arguments)?;
        validate_arguments(&definition, &arguments)?;
        handler(Value::Object(arguments)).await
    }
}

fn parse_arguments(raw: &str) -> Result<Map<String, Value>, ToolError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ToolError::InvalidArguments(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(ToolError::InvalidArguments(e.to_string())),
    }
}

/// Checks required fields and declared property types before the handler runs.
fn validate_arguments(
    definition: &ToolDefinition,
    arguments: &Map<String, Value>,
) -> Result<(), ToolError> {
    for required in &definition.required {
        if !arguments.contains_key(required) {
            return Err(ToolError::InvalidArguments(format!(
                "missing required field '{required}'"
            )));
        }
    }

    let properties = definition
        .parameters
        .get("properties")
        .and_then(Value::as_object);
    if let Some(properties) = properties {
        for (key, value) in arguments {
            let declared = properties
                .get(key)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str);
            if let Some(declared) = declared
                && !json_type_matches(declared, value)
            {
                return Err(ToolError::InvalidArguments(format!(
                    "field '{key}' should be of type {declared}"
                )));
            }
        }
    }
    Ok(())
}

fn json_type_matches(declared: &str, value: &Value) -> bool {
    match declared {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn definition(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: "test tool".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "key": { "type": "string" },
                    "count": { "type": "number" }
                }
            }),
            required: vec!["key".to_string()],
        }
    }

    fn echo_handler(tag: &'static str) -> ToolHandler {
        Arc::new(move |args| Box::pin(async move { Ok(json!({ "tag": tag, "args": args })) }))
    }

    #[tokio::test]
    async fn re_registration_is_last_wins() {
        let registry = ToolRegistry::new();
        registry.register(definition("echo"), echo_handler("first"));
        registry.register(definition("echo"), echo_handler("second"));

        assert_eq!(registry.names(), vec!["echo".to_string()]);
        let result = registry.invoke("echo", r#"{"key":"k"}"#).await;
        assert_eq!(result["tag"], "second");
    }

    #[tokio::test]
    async fn replaced_handler_closure_state_is_dropped() {
        struct DropFlag(Arc<AtomicU32>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicU32::new(0));
        let flag = Arc::new(DropFlag(drops.clone()));
        let handler: ToolHandler = Arc::new(move |_| {
            let _keep = flag.clone();
            Box::pin(async { Ok(Value::Null) })
        });

        let registry = ToolRegistry::new();
        registry.register(definition("echo"), handler);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        registry.register(definition("echo"), echo_handler("new"));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_structured_error() {
        let registry = ToolRegistry::new();
        let result = registry.invoke("nope", "{}").await;
        assert_eq!(result["error"], "unknown tool 'nope'");
    }

    #[tokio::test]
    async fn missing_required_field_is_rejected_before_handler() {
        let registry = ToolRegistry::new();
        registry.register(
            definition("echo"),
            Arc::new(|_| Box::pin(async { panic!("handler must not run") })),
        );
        let result = registry.invoke("echo", r#"{"count": 3}"#).await;
        assert!(
            result["error"]
                .as_str()
                .unwrap()
                .contains("missing required field 'key'")
        );
    }

    #[tokio::test]
    async fn type_mismatch_is_rejected() {
        let registry = ToolRegistry::new();
        registry.register(definition("echo"), echo_handler("t"));
        let result = registry.invoke("echo", r#"{"key":"k","count":"three"}"#).await;
        assert!(
            result["error"]
                .as_str()
                .unwrap()
                .contains("field 'count' should be of type number")
        );
    }

    #[tokio::test]
    async fn handler_error_is_contained() {
        let registry = ToolRegistry::new();
        registry.register(
            definition("echo"),
            Arc::new(|_| Box::pin(async { Err(ToolError::Handler("provider offline".into())) })),
        );
        let result = registry.invoke("echo", r#"{"key":"k"}"#).await;
        assert_eq!(result["error"], "provider offline");
    }

    #[tokio::test]
    async fn empty_arguments_are_an_empty_object() {
        let registry = ToolRegistry::new();
        let mut def = definition("echo");
        def.required.clear();
        registry.register(def, echo_handler("t"));
        let result = registry.invoke("echo", "").await;
        assert_eq!(result["args"], json!({}));
    }

    #[test]
    fn spec_folds_required_into_schema() {
        let spec = definition("echo").spec();
        assert_eq!(spec.name, "echo");
        assert_eq!(spec.parameters["required"], json!(["key"]));
    }
}
