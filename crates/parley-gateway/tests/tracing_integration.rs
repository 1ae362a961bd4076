use std::io::BufRead;
use std::sync::Arc;

use parley_core::fakes::{FakeTool, tool_context};
use parley_core::tools::ToolRegistry;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

/// Run tool calls with tracing captured to a temp file, then assert the
/// registry's spans land in the JSONL output.
#[tokio::test]
async fn tool_execution_produces_expected_spans() {
    let dir = tempfile::tempdir().unwrap();
    let trace_file = dir.path().join("traces.jsonl");

    let file_appender = tracing_appender::rolling::never(dir.path(), "traces.jsonl");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let jsonl_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_span_list(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_filter(tracing_subscriber::EnvFilter::new("debug"));

    let subscriber = tracing_subscriber::Registry::default().with(jsonl_layer);
    let dispatch = tracing::dispatcher::Dispatch::new(subscriber);
    let default_guard = tracing::dispatcher::set_default(&dispatch);

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FakeTool::new(
        "get_contact",
        serde_json::json!({"name": "Aina"}),
    )));
    let ctx = tool_context();

    let found = registry.execute("get_contact", "{}", &ctx).await;
    assert_eq!(found["name"], "Aina");
    let missing = registry.execute("book_calendar", "{}", &ctx).await;
    assert!(missing.get("warning").is_some());

    drop(default_guard);
    drop(guard);

    let file = std::fs::File::open(&trace_file).unwrap();
    let lines: Vec<String> = std::io::BufReader::new(file)
        .lines()
        .map(|l| l.unwrap())
        .filter(|l| !l.is_empty())
        .collect();

    assert!(!lines.is_empty(), "trace file should not be empty");

    for line in &lines {
        let _: serde_json::Value = serde_json::from_str(line)
            .unwrap_or_else(|e| panic!("invalid JSON: {e}\nline: {line}"));
    }

    let all_text = lines.join("\n");

    assert!(
        all_text.contains("tool_execute"),
        "missing tool_execute span in traces"
    );
    assert!(
        all_text.contains("get_contact"),
        "missing tool name in traces"
    );
    assert!(
        all_text.contains("unknown tool requested"),
        "missing unknown-tool warning in traces"
    );
}
