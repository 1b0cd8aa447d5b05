//! Tool registry and executor.
//!
//! Every tool the model may call lives behind the [`Tool`] trait. The
//! [`ToolRegistry`] validates arguments against each tool's declared
//! parameters, enforces the per-call timeout, and turns every failure
//! (unknown tool, bad arguments, error, timeout, panic) into a
//! [`ToolOutput::Failure`] payload that is handed back to the model.

mod dns;
mod interfaces;
mod lookup;
mod ports;
mod probe;
mod web;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::config::ToolTimeouts;

pub use dns::ResolveDns;
pub use interfaces::{GetDeviceDetails, ListNetworkDevices};
pub use lookup::{GetPublicIp, LookupMacVendor};
pub use ports::{parse_port_spec, PortScan};
pub use probe::{PingHost, TracerouteHost};
pub use web::WebSearch;

/// Timeout used by tools that do not declare their own.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// A tool the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name advertised to the model.
    fn name(&self) -> &str;

    /// Natural-language description the model uses to pick the tool.
    fn description(&self) -> &str;

    /// Declared parameters. Validation and defaults are applied by the registry.
    fn parameters(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    /// Upper bound on a single call.
    fn timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }

    async fn execute(&self, args: ToolArgs) -> anyhow::Result<ToolOutput>;
}

/// Parameter value types understood by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
}

impl ParamKind {
    fn json_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
        }
    }
}

/// One declared tool parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub description: &'static str,
    pub required: bool,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
            default: None,
        }
    }

    pub fn optional(
        name: &'static str,
        kind: ParamKind,
        description: &'static str,
        default: Value,
    ) -> Self {
        Self {
            name,
            kind,
            description,
            required: false,
            default: Some(default),
        }
    }
}

/// Name, description and JSON schema advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

fn parameters_schema(params: &[ParamSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in params {
        let mut prop = json!({
            "type": param.kind.json_type(),
            "description": param.description,
        });
        if let Some(default) = &param.default {
            prop["default"] = default.clone();
        }
        properties.insert(param.name.to_string(), prop);
        if param.required {
            required.push(Value::String(param.name.to_string()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Arguments that passed validation, with defaults filled in.
#[derive(Debug, Clone, Default)]
pub struct ToolArgs {
    values: Map<String, Value>,
}

impl ToolArgs {
    fn validate(tool: &str, params: &[ParamSpec], raw: Value) -> Result<Self, ToolError> {
        let invalid = |reason: String| ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason,
        };

        let mut values = match raw {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(invalid(format!(
                    "arguments must be a JSON object, got: {}",
                    other
                )))
            }
        };

        for param in params {
            let supplied = values.get(param.name).filter(|v| !v.is_null()).cloned();
            let value = match (supplied, &param.default) {
                (Some(value), _) => value,
                (None, Some(default)) => default.clone(),
                (None, None) if param.required => {
                    return Err(invalid(format!(
                        "missing required parameter '{}'",
                        param.name
                    )))
                }
                (None, None) => continue,
            };

            let normalized = match param.kind {
                ParamKind::String if value.is_string() => value,
                ParamKind::String => {
                    return Err(invalid(format!(
                        "parameter '{}' must be a string, got: {}",
                        param.name, value
                    )))
                }
                ParamKind::Integer => {
                    // Models occasionally send "4" or 4.0 for an integer.
                    let parsed = match &value {
                        Value::Number(n) => n.as_i64().or_else(|| {
                            n.as_f64()
                                .filter(|f| f.fract() == 0.0)
                                .map(|f| f as i64)
                        }),
                        Value::String(s) => s.trim().parse::<i64>().ok(),
                        _ => None,
                    };
                    match parsed {
                        Some(n) => Value::from(n),
                        None => {
                            return Err(invalid(format!(
                                "parameter '{}' must be an integer, got: {}",
                                param.name, value
                            )))
                        }
                    }
                }
            };
            values.insert(param.name.to_string(), normalized);
        }

        Ok(Self { values })
    }

    pub fn str(&self, name: &str) -> anyhow::Result<&str> {
        self.values
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("Missing '{}' argument", name))
    }

    pub fn int(&self, name: &str) -> anyhow::Result<i64> {
        self.values
            .get(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow::anyhow!("Missing '{}' argument", name))
    }
}

/// Payload returned to the model for one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ToolOutput {
    /// Free-form text, e.g. raw ping output.
    Text(String),
    /// Structured result, e.g. a port-scan summary.
    Json(Value),
    /// The call failed; the message is shown to the model.
    Failure(String),
}

impl ToolOutput {
    pub fn is_failure(&self) -> bool {
        matches!(self, ToolOutput::Failure(_))
    }

    /// Render the payload as the text sent to the model.
    pub fn to_string_lossy(&self) -> String {
        match self {
            ToolOutput::Text(s) => s.clone(),
            ToolOutput::Json(value) => {
                serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
            }
            ToolOutput::Failure(message) => format!("Error: {}", message),
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("{tool} failed: {message}")]
    Failed { tool: String, message: String },

    #[error("{tool} timed out after {:.1}s", .after.as_secs_f32())]
    TimedOut { tool: String, after: Duration },

    #[error("{tool} crashed before returning a result")]
    Panicked { tool: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("A tool named '{0}' is already registered")]
    DuplicateName(String),
}

/// Fixed catalogue of tools, read-only once shared.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the nine network-operations tools.
    pub fn with_network_tools(timeouts: &ToolTimeouts) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register(ListNetworkDevices)?;
        registry.register(GetDeviceDetails)?;
        registry.register(PingHost::new(timeouts.probe))?;
        registry.register(PortScan::new(timeouts.probe))?;
        registry.register(ResolveDns::new(timeouts.lookup))?;
        registry.register(TracerouteHost::new(timeouts.probe))?;
        registry.register(LookupMacVendor::new(timeouts.lookup))?;
        registry.register(GetPublicIp::new(timeouts.lookup))?;
        registry.register(WebSearch::new(timeouts.lookup))?;
        Ok(registry)
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(Arc::new(tool));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas for every tool, in registration order.
    pub fn describe_all(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .map(|tool| ToolSchema {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: parameters_schema(&tool.parameters()),
            })
            .collect()
    }

    /// Execute a tool call; every failure comes back as [`ToolOutput::Failure`].
    pub async fn execute(&self, name: &str, args: Value) -> ToolOutput {
        match self.try_execute(name, args).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "tool call failed");
                ToolOutput::Failure(e.to_string())
            }
        }
    }

    /// Execute a tool call, keeping the failure kind.
    ///
    /// The tool runs on its own task with the timeout applied inside it, so a
    /// caller that stops waiting leaves behind a call that is still bounded.
    pub async fn try_execute(&self, name: &str, args: Value) -> Result<ToolOutput, ToolError> {
        let tool = self
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let args = ToolArgs::validate(name, &tool.parameters(), args)?;
        let limit = tool.timeout();

        tracing::debug!(tool = %name, timeout_secs = limit.as_secs_f32(), "dispatching tool call");

        let handle = tokio::spawn(async move { tokio::time::timeout(limit, tool.execute(args)).await });

        match handle.await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(e))) => Err(ToolError::Failed {
                tool: name.to_string(),
                message: format!("{:#}", e),
            }),
            Ok(Err(_elapsed)) => Err(ToolError::TimedOut {
                tool: name.to_string(),
                after: limit,
            }),
            Err(join_err) => {
                tracing::error!(tool = %name, error = %join_err, "tool task aborted");
                Err(ToolError::Panicked {
                    tool: name.to_string(),
                })
            }
        }
    }
}
