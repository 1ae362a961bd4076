//! Drives one assistant run to a reply, handling tool-call round trips.

use anyhow::Result;
use parley_core::tools::ToolRegistry;
use parley_core::{AssistantBackend, Run, RunStatus, ToolCallOutput, ToolContext};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::{AssistantConfig, Templates};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RunLimits {
    pub poll_interval: Duration,
    /// Polls per depth level before giving up.
    pub max_attempts: u32,
    /// Tool-output submissions before giving up.
    pub max_depth: u32,
}

impl From<&AssistantConfig> for RunLimits {
    fn from(config: &AssistantConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_attempts: config.max_attempts.max(1),
            max_depth: config.max_depth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    /// Assistant text, or an apology when the run did not complete.
    Reply(String),
    Cancelled,
}

/// Poll `run` until it settles. `requires_action` executes the requested
/// tools, submits every output and keeps polling the same run one level
/// deeper.
pub(crate) async fn drive_run(
    assistant: &dyn AssistantBackend,
    tools: &ToolRegistry,
    ctx: &ToolContext,
    run: &Run,
    limits: RunLimits,
    templates: &Templates,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let span = info_span!("assistant_run", thread = %run.thread_id, run = %run.id);
    async {
        let mut depth = 0;
        loop {
            let Some(settled) = poll_until_settled(assistant, run, limits, cancel).await? else {
                if cancel.is_cancelled() {
                    info!("run cancelled");
                    return Ok(RunOutcome::Cancelled);
                }
                warn!(depth, attempts = limits.max_attempts, "run still pending, giving up");
                return Ok(RunOutcome::Reply(templates.run_timeout.clone()));
            };

            match settled.status {
                RunStatus::Completed => {
                    let text = assistant.latest_message(&run.thread_id).await?;
                    info!(depth, "run completed");
                    return Ok(RunOutcome::Reply(text.unwrap_or_default()));
                }
                RunStatus::RequiresAction => {
                    if depth >= limits.max_depth {
                        warn!(depth, "tool-call depth exceeded");
                        return Ok(RunOutcome::Reply(templates.run_trouble.clone()));
                    }
                    let outputs = execute_tool_calls(tools, ctx, &settled).await;
                    assistant
                        .submit_tool_outputs(&run.thread_id, &run.id, &outputs)
                        .await?;
                    depth += 1;
                    debug!(depth, submitted = outputs.len(), "tool outputs submitted");
                }
                status => {
                    warn!(status = %status, "run ended without completing");
                    return Ok(RunOutcome::Reply(templates.failed(status.as_str())));
                }
            }
        }
    }
    .instrument(span)
    .await
}

/// Poll first, then sleep between polls. `None` when attempts ran out or
/// the token was cancelled.
async fn poll_until_settled(
    assistant: &dyn AssistantBackend,
    run: &Run,
    limits: RunLimits,
    cancel: &CancellationToken,
) -> Result<Option<Run>> {
    for attempt in 1..=limits.max_attempts {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let current = assistant.get_run(&run.thread_id, &run.id).await?;
        debug!(attempt, status = %current.status, "polled run");
        if !matches!(current.status, RunStatus::Queued | RunStatus::InProgress) {
            return Ok(Some(current));
        }
        if attempt < limits.max_attempts {
            tokio::select! {
                () = tokio::time::sleep(limits.poll_interval) => {}
                () = cancel.cancelled() => return Ok(None),
            }
        }
    }
    Ok(None)
}

/// One output per call, in request order. Failures become error payloads.
async fn execute_tool_calls(
    tools: &ToolRegistry,
    ctx: &ToolContext,
    run: &Run,
) -> Vec<ToolCallOutput> {
    let mut outputs = Vec::with_capacity(run.tool_calls.len());
    for call in &run.tool_calls {
        let output = tools.execute(&call.name, &call.arguments, ctx).await;
        outputs.push(ToolCallOutput {
            call_id: call.id.clone(),
            output: output.to_string(),
        });
    }
    outputs
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ToolCall;
    use parley_core::fakes::{FakeTool, ScriptedAssistant, tool_context};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    const LIMITS: RunLimits = RunLimits {
        poll_interval: Duration::from_secs(2),
        max_attempts: 30,
        max_depth: 5,
    };

    fn queued_run() -> Run {
        Run {
            id: "run-0".to_owned(),
            thread_id: "thread-0".to_owned(),
            status: RunStatus::Queued,
            tool_calls: Vec::new(),
        }
    }

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments: arguments.to_owned(),
        }
    }

    async fn drive(assistant: &ScriptedAssistant, tools: &ToolRegistry) -> RunOutcome {
        drive_run(
            assistant,
            tools,
            &tool_context(),
            &queued_run(),
            LIMITS,
            &Templates::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn completed_run_returns_latest_message() {
        let assistant = ScriptedAssistant::new("Hello || Bye");
        assistant.push_step(RunStatus::Queued, vec![]);
        assistant.push_step(RunStatus::InProgress, vec![]);

        let outcome = drive(&assistant, &ToolRegistry::new()).await;
        assert_eq!(outcome, RunOutcome::Reply("Hello || Bye".to_owned()));
        assert_eq!(assistant.polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn tool_calls_are_executed_and_submitted() {
        let assistant = ScriptedAssistant::new("done");
        assistant.push_step(
            RunStatus::RequiresAction,
            vec![
                call("c1", "lookup", "{}"),
                call("c2", "missing", "{}"),
            ],
        );

        let lookup = Arc::new(FakeTool::new("lookup", json!({"found": true})));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::clone(&lookup) as Arc<dyn parley_core::Tool>);

        let outcome = drive(&assistant, &tools).await;
        assert_eq!(outcome, RunOutcome::Reply("done".to_owned()));
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);

        let submissions = assistant.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].len(), 2);
        assert_eq!(submissions[0][0].call_id, "c1");
        assert_eq!(submissions[0][0].output, r#"{"found":true}"#);
        assert_eq!(submissions[0][1].call_id, "c2");
        assert!(submissions[0][1].output.contains("unknown tool: missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn endless_tool_calls_stop_after_max_depth() {
        let assistant = ScriptedAssistant::new("never");
        assistant.set_fallback(RunStatus::RequiresAction, vec![call("c", "missing", "{}")]);

        let outcome = drive(&assistant, &ToolRegistry::new()).await;
        assert_eq!(
            outcome,
            RunOutcome::Reply(Templates::default().run_trouble)
        );
        assert_eq!(assistant.submissions().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_names_status() {
        for status in [RunStatus::Failed, RunStatus::Cancelled, RunStatus::Expired] {
            let assistant = ScriptedAssistant::new("unused");
            assistant.push_step(status, vec![]);

            let outcome = drive(&assistant, &ToolRegistry::new()).await;
            let RunOutcome::Reply(text) = outcome else {
                panic!("expected reply");
            };
            assert!(text.contains(&format!("(run {})", status.as_str())), "{text}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pending_run_times_out_after_max_attempts() {
        let assistant = ScriptedAssistant::new("late");
        assistant.set_fallback(RunStatus::InProgress, vec![]);

        let start = tokio::time::Instant::now();
        let outcome = drive(&assistant, &ToolRegistry::new()).await;
        assert_eq!(outcome, RunOutcome::Reply(Templates::default().run_timeout));
        assert_eq!(assistant.polls(), 30);
        // 29 sleeps between 30 polls.
        assert!(start.elapsed() >= Duration::from_secs(58));
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let assistant = Arc::new(ScriptedAssistant::new("late"));
        assistant.set_fallback(RunStatus::InProgress, vec![]);
        let cancel = CancellationToken::new();

        let task = {
            let assistant = Arc::clone(&assistant);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                drive_run(
                    assistant.as_ref(),
                    &ToolRegistry::new(),
                    &tool_context(),
                    &queued_run(),
                    LIMITS,
                    &Templates::default(),
                    &cancel,
                )
                .await
            })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(assistant.polls() < 30);
    }
}
