//! Conversion between Parley types and the Assistants API wire format.

use parley_core::{Run, RunStatus, ToolCall, ToolCallOutput, ToolDef};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
pub(crate) struct WireObject {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireRun {
    pub id: String,
    pub thread_id: String,
    pub status: String,
    #[serde(default)]
    pub required_action: Option<WireRequiredAction>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireRequiredAction {
    #[serde(default)]
    pub submit_tool_outputs: Option<WireSubmitToolOutputs>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireSubmitToolOutputs {
    #[serde(default)]
    pub tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireToolCall {
    pub id: String,
    pub function: WireFunction,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireMessageList {
    #[serde(default)]
    pub data: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireMessage {
    pub role: String,
    #[serde(default)]
    pub content: Vec<WireContent>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<WireText>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireText {
    pub value: String,
}

/// Map the wire status onto the statuses the run loop drives.
/// `cancelling` is still moving; `incomplete` will never finish.
pub(crate) fn status_from_wire(status: &str) -> anyhow::Result<RunStatus> {
    Ok(match status {
        "queued" => RunStatus::Queued,
        "in_progress" | "cancelling" => RunStatus::InProgress,
        "requires_action" => RunStatus::RequiresAction,
        "completed" => RunStatus::Completed,
        "failed" | "incomplete" => RunStatus::Failed,
        "cancelled" => RunStatus::Cancelled,
        "expired" => RunStatus::Expired,
        other => anyhow::bail!("unknown run status: {other}"),
    })
}

pub(crate) fn run_from_wire(wire: WireRun) -> anyhow::Result<Run> {
    let status = status_from_wire(&wire.status)?;
    let tool_calls = wire
        .required_action
        .and_then(|action| action.submit_tool_outputs)
        .map(|submit| {
            submit
                .tool_calls
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Run {
        id: wire.id,
        thread_id: wire.thread_id,
        status,
        tool_calls,
    })
}

/// Text of the newest assistant message. The list is requested newest
/// first; multiple text blocks are joined with newlines.
pub(crate) fn latest_assistant_text(list: WireMessageList) -> Option<String> {
    let message = list.data.into_iter().find(|m| m.role == "assistant")?;
    let text: Vec<String> = message
        .content
        .into_iter()
        .filter(|c| c.kind == "text")
        .filter_map(|c| c.text.map(|t| t.value))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join("\n"))
    }
}

pub(crate) fn format_tools(tools: &[ToolDef]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            })
        })
        .collect()
}

pub(crate) fn format_tool_outputs(outputs: &[ToolCallOutput]) -> Value {
    let outputs: Vec<Value> = outputs
        .iter()
        .map(|o| json!({ "tool_call_id": o.call_id, "output": o.output }))
        .collect();
    json!({ "tool_outputs": outputs })
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_with_required_action_yields_tool_calls() {
        let wire: WireRun = serde_json::from_value(json!({
            "id": "run_1",
            "object": "thread.run",
            "thread_id": "thread_1",
            "status": "requires_action",
            "required_action": {
                "type": "submit_tool_outputs",
                "submit_tool_outputs": {
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "add_tag", "arguments": "{\"tag\":\"hot\"}" }
                    }]
                }
            }
        }))
        .unwrap();

        let run = run_from_wire(wire).unwrap();
        assert_eq!(run.status, RunStatus::RequiresAction);
        assert_eq!(run.tool_calls.len(), 1);
        assert_eq!(run.tool_calls[0].name, "add_tag");
        assert_eq!(run.tool_calls[0].arguments, r#"{"tag":"hot"}"#);
    }

    #[test]
    fn completed_run_has_no_tool_calls() {
        let wire: WireRun = serde_json::from_value(json!({
            "id": "run_1",
            "thread_id": "thread_1",
            "status": "completed",
            "required_action": null
        }))
        .unwrap();
        let run = run_from_wire(wire).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.tool_calls.is_empty());
    }

    #[test]
    fn transitional_statuses_are_mapped() {
        assert_eq!(
            status_from_wire("cancelling").unwrap(),
            RunStatus::InProgress
        );
        assert_eq!(status_from_wire("incomplete").unwrap(), RunStatus::Failed);
        assert!(status_from_wire("bogus").is_err());
    }

    #[test]
    fn latest_assistant_text_skips_user_messages() {
        let list: WireMessageList = serde_json::from_value(json!({
            "data": [
                { "role": "assistant", "content": [
                    { "type": "text", "text": { "value": "Hello ||", "annotations": [] } },
                    { "type": "image_file", "image_file": { "file_id": "f" } },
                    { "type": "text", "text": { "value": "Bye", "annotations": [] } }
                ]},
                { "role": "user", "content": [
                    { "type": "text", "text": { "value": "hi", "annotations": [] } }
                ]}
            ]
        }))
        .unwrap();
        assert_eq!(latest_assistant_text(list).as_deref(), Some("Hello ||\nBye"));
    }

    #[test]
    fn latest_assistant_text_none_without_assistant() {
        let list: WireMessageList = serde_json::from_value(json!({ "data": [] })).unwrap();
        assert!(latest_assistant_text(list).is_none());
    }

    #[test]
    fn tool_outputs_use_wire_field_names() {
        let body = format_tool_outputs(&[ToolCallOutput {
            call_id: "call_1".to_owned(),
            output: "{\"ok\":true}".to_owned(),
        }]);
        assert_eq!(body["tool_outputs"][0]["tool_call_id"], "call_1");
        assert_eq!(body["tool_outputs"][0]["output"], "{\"ok\":true}");
    }
}
