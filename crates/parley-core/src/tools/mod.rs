use crate::traits::{Tool, ToolContext};
use crate::types::ToolDef;
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{Instrument, debug, info_span, warn};

type ToolFn = dyn Fn(Value, ToolContext) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// Flat name → handler catalog.
///
/// Handlers never fail the batch: errors come back as `{"error": ...}`
/// payloads and unknown names as `{"warning": ...}` so the assistant always
/// receives one output per requested call.
#[derive(Default)]
#[allow(missing_debug_implementations)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration under the same name replaces
    /// the earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "tool registered twice, replacing previous handler");
        }
    }

    /// Register a closure-backed tool.
    pub fn register_fn<F>(&mut self, def: ToolDef, handler: F)
    where
        F: Fn(Value, ToolContext) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnTool {
            def,
            handler: Box::new(handler),
        }));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Definitions for the enabled subset. An empty filter enables every
    /// registered tool.
    pub fn definitions(&self, enabled: &[String]) -> Vec<ToolDef> {
        self.tools
            .iter()
            .filter(|(name, _)| enabled.is_empty() || enabled.iter().any(|e| e == *name))
            .map(|(_, tool)| tool.definition())
            .collect()
    }

    /// Execute a tool call by name with its raw JSON arguments.
    pub async fn execute(&self, name: &str, arguments: &str, ctx: &ToolContext) -> Value {
        let span = info_span!("tool_execute", tool = %name, contact = %ctx.contact);
        async {
            let Some(tool) = self.tools.get(name) else {
                warn!("unknown tool requested, skipping");
                return json!({ "warning": format!("unknown tool: {name}") });
            };

            let arguments = match parse_arguments(arguments) {
                Ok(arguments) => arguments,
                Err(e) => return json!({ "error": format!("invalid arguments: {e}") }),
            };
            debug!(arguments = %arguments, "tool arguments");

            match tool.execute(arguments, ctx).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(error = %e, "tool failed");
                    json!({ "error": e.to_string() })
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn parse_arguments(raw: &str) -> serde_json::Result<Value> {
    if raw.trim().is_empty() {
        Ok(json!({}))
    } else {
        serde_json::from_str(raw)
    }
}

/// Fetch a required string argument.
pub fn required_str<'a>(arguments: &'a Value, name: &str) -> Result<&'a str> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("missing required parameter: {name}"))
}

struct FnTool {
    def: ToolDef,
    handler: Box<ToolFn>,
}

#[async_trait]
impl Tool for FnTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<Value> {
        (self.handler)(arguments, ctx.clone()).await
    }
}
