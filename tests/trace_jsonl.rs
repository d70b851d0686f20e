use signal_fusion::{ClassificationTrace, JsonlTraceSink, Label, TraceSink};
use tempfile::tempdir;

#[derive(Debug, serde::Deserialize)]
struct TraceRow {
    index: usize,
    feedback_id: String,
    label: String,
    error_code: Option<String>,
}

fn make_trace(index: usize, label: Label) -> ClassificationTrace {
    ClassificationTrace {
        timestamp_ms: 0,
        index,
        feedback_id: format!("fb-{index}"),
        language: "sw".to_string(),
        model: "qwen:0.5b".to_string(),
        prompt_template_slug: "triage_v1".to_string(),
        template_hash: "template_hash".to_string(),
        label,
        raw_reply: (label != Label::Error).then(|| label.to_string()),
        latency_ms: 12,
        error_code: (label == Label::Error).then(|| "timeout".to_string()),
        error: None,
    }
}

#[test]
fn jsonl_trace_sink_writes_events_and_flushes_on_join() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");

    let (sink, worker) = JsonlTraceSink::new(&path).unwrap();
    sink.record(make_trace(0, Label::Yes)).unwrap();
    sink.record(make_trace(1, Label::Error)).unwrap();

    drop(sink);
    worker.join().unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines.len(), 2);

    let first: TraceRow = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first.index, 0);
    assert_eq!(first.feedback_id, "fb-0");
    assert_eq!(first.label, "YES");

    let second: TraceRow = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(second.label, "ERROR");
    assert_eq!(second.error_code.as_deref(), Some("timeout"));
}
