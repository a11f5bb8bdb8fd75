// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::{Tool, ToolCall, ToolOutput};

/// A tool schema — mirrors yawl_model::ToolSchema but keeps the tools crate
/// independent from the model crate.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Central registry holding all available tools.
///
/// Every invocation is validated against the tool's declared parameter
/// schema before dispatch; a type mismatch or unknown tool becomes an error
/// output the model can read, never a panic.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Produce schemas for all registered tools, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name));
        };
        if let Err(reason) = validate_args(&tool.parameters_schema(), &call.args) {
            return ToolOutput::err(&call.id, format!("invalid arguments: {reason}"));
        }
        tool.execute(call).await
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate `args` against a JSON-Schema object declaration: the argument
/// value must be an object, every `required` property must be present, and
/// every provided property must match its declared type.  Properties not
/// declared in the schema are rejected when the schema says
/// `additionalProperties: false`.
fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(args_obj) = args.as_object() else {
        return Err(format!("expected an argument object, got {args}"));
    };
    let properties = schema.get("properties").and_then(|p| p.as_object());

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for name in required.iter().filter_map(|v| v.as_str()) {
            if !args_obj.contains_key(name) {
                return Err(format!("missing required parameter '{name}'"));
            }
        }
    }

    let reject_unknown = schema
        .get("additionalProperties")
        .and_then(|v| v.as_bool())
        .map(|allow| !allow)
        .unwrap_or(false);

    for (name, value) in args_obj {
        let declared = properties.and_then(|p| p.get(name));
        let Some(decl) = declared else {
            if reject_unknown {
                return Err(format!("unknown parameter '{name}'"));
            }
            continue;
        };
        if let Some(expected) = decl.get("type").and_then(|t| t.as_str()) {
            if !value_matches_type(value, expected) {
                return Err(format!(
                    "parameter '{name}' should be of type {expected}, got {value}"
                ));
            }
        }
    }
    Ok(())
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
