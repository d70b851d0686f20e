use std::process::Command;

use tempfile::tempdir;

fn sigfuse() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sigfuse"));
    cmd.env_remove("SIGFUSE_MODEL")
        .env_remove("SIGFUSE_TIMEOUT_SECONDS")
        .env_remove("SIGFUSE_OLLAMA_URL")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn evaluate_prints_both_tables_and_writes_fused_csv() {
    let dir = tempdir().unwrap();
    let logs = dir.path().join("logs.csv");
    let results = dir.path().join("results.csv");
    let out = dir.path().join("fused.csv");
    let report = dir.path().join("report.md");

    std::fs::write(&logs, "failure_label,log_prob\n1,0.8\n0,0.2\n").unwrap();
    std::fs::write(
        &results,
        "id,text,language,llm_prediction\n1,Portal down,en,YES\n2,All good,en,NO\n",
    )
    .unwrap();

    let output = sigfuse()
        .arg("evaluate")
        .arg("--logs")
        .arg(&logs)
        .arg("--results")
        .arg(&results)
        .arg("--out")
        .arg(&out)
        .arg("--report")
        .arg(&report)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Logs-only model"));
    assert!(stdout.contains("Fused model"));
    assert!(stdout.contains("Portal down"));

    let fused = std::fs::read_to_string(&out).unwrap();
    assert_eq!(fused.lines().count(), 3);
    assert!(std::fs::read_to_string(&report).unwrap().contains("# Fused Risk Evaluation"));
}

#[test]
fn missing_input_exits_non_zero_and_names_the_artifact() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("fused.csv");

    let output = sigfuse()
        .arg("evaluate")
        .arg("--logs")
        .arg(dir.path().join("logs.csv"))
        .arg("--results")
        .arg(dir.path().join("results.csv"))
        .arg("--out")
        .arg(&out)
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("deployment log table"), "stderr: {stderr}");
    assert!(!out.exists());
}

#[test]
fn invalid_threshold_is_rejected() {
    let dir = tempdir().unwrap();
    let logs = dir.path().join("logs.csv");
    let results = dir.path().join("results.csv");
    std::fs::write(&logs, "failure_label,log_prob\n1,0.8\n").unwrap();
    std::fs::write(&results, "id,text,language,llm_prediction\n1,x,en,YES\n").unwrap();

    let status = sigfuse()
        .args(["evaluate", "--threshold", "1.5"])
        .arg("--logs")
        .arg(&logs)
        .arg("--results")
        .arg(&results)
        .arg("--out")
        .arg(dir.path().join("fused.csv"))
        .status()
        .unwrap();
    assert!(!status.success());
}

#[test]
fn zero_timeout_is_rejected_before_any_model_call() {
    let dir = tempdir().unwrap();
    let feedback = dir.path().join("feedback.json");
    let out = dir.path().join("results.csv");
    std::fs::write(&feedback, r#"[{"id": "a", "text": "x", "lang": "en"}]"#).unwrap();

    let output = sigfuse()
        .args(["classify", "--timeout-secs", "0", "--delay-ms", "0"])
        .arg("--feedback")
        .arg(&feedback)
        .arg("--out")
        .arg(&out)
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("timeout_secs"), "stderr: {stderr}");
    assert!(!out.exists());
}

#[cfg(unix)]
#[test]
fn classify_uses_configured_model_command() {
    let dir = tempdir().unwrap();
    let feedback = dir.path().join("feedback.json");
    let out = dir.path().join("results.csv");
    let trace = dir.path().join("trace.jsonl");
    let config = dir.path().join("sigfuse.json");

    std::fs::write(
        &feedback,
        r#"[{"id": "a", "text": "login broken", "lang": "en"}, {"id": "b", "text": "nice", "lang": "en"}]"#,
    )
    .unwrap();
    std::fs::write(
        &config,
        r#"{"command": {"program": "sh", "args": ["-c", "cat >/dev/null; echo NO"]}, "delay_ms": 0}"#,
    )
    .unwrap();

    let output = sigfuse()
        .arg("--config")
        .arg(&config)
        .arg("classify")
        .arg("--feedback")
        .arg(&feedback)
        .arg("--out")
        .arg(&out)
        .arg("--trace")
        .arg(&trace)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let csv = std::fs::read_to_string(&out).unwrap();
    let rows: Vec<&str> = csv.lines().collect();
    assert_eq!(rows[0], "id,text,language,llm_prediction");
    assert_eq!(rows[1], "a,login broken,en,NO");
    assert_eq!(rows[2], "b,nice,en,NO");
    assert_eq!(std::fs::read_to_string(&trace).unwrap().lines().count(), 2);
}
