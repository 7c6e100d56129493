//! End-to-end runs of the flag -> package -> history loop through the CLI.

mod common;

use common::CliWorkspace;

#[test]
fn flag_package_and_history() {
    let ws = CliWorkspace::init(&[]);

    let stdout = ws.run_ok(&[
        "flag",
        "--stream",
        "transformer",
        "--verdict",
        "LABEL: SARCASTIC\nCERTAINTY: 0.87",
        "oh great, another monday",
    ]);
    assert_eq!(stdout.trim(), "1 labeled samples");
    let stdout = ws.run_ok(&[
        "flag",
        "--stream",
        "transformer",
        "--verdict",
        "LABEL: NORMAL",
        "the report is due friday, \"final\" draft",
    ]);
    assert_eq!(stdout.trim(), "2 labeled samples");

    let status = ws.run_json(&["status"]);
    let streams = status["streams"].as_array().expect("streams");
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0]["stream"], "transformer");
    assert_eq!(streams[0]["count"], 2);
    let batch = streams[0]["batch"].as_str().expect("batch").to_string();

    let log = std::fs::read_to_string(ws.flagged_dir().join(format!("transformer_{batch}.csv")))
        .expect("read log");
    assert_eq!(
        log,
        "label,comment\r\n1,\"oh great, another monday\"\r\n0,\"the report is due friday, \"\"final\"\" draft\"\r\n"
    );

    let outcome = ws.run_json(&["package"]);
    assert_eq!(outcome["outcome"], "published");
    assert_eq!(outcome["version"]["files"].as_array().map(Vec::len), Some(1));
    assert!(outcome["version"].get("parent_id").is_none());
    assert_eq!(outcome["rotations"][0]["retired"], batch.as_str());
    assert_eq!(outcome["rotations"][0]["records"], 2);
    let first_version = outcome["version"]["id"].as_str().expect("id").to_string();

    assert_eq!(ws.run_ok(&["package"]).trim(), "nothing to package");

    ws.run_ok(&[
        "flag",
        "--stream",
        "logistic",
        "--verdict",
        "LABEL: NORMAL",
        "it rained",
    ]);
    let outcome = ws.run_json(&["package", "--stream", "logistic"]);
    assert_eq!(outcome["version"]["parent_id"], first_version.as_str());

    let history = ws.run_json(&["history"]);
    let history = history.as_array().expect("history array");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1]["id"], first_version.as_str());

    let status = ws.run_json(&["status"]);
    assert_eq!(status["latest_version"], history[0]["id"]);
}

#[test]
fn unparseable_verdict_is_skipped() {
    let ws = CliWorkspace::init(&[]);
    let stdout = ws.run_ok(&[
        "flag",
        "--stream",
        "transformer",
        "--verdict",
        "model crashed",
        "hello",
    ]);
    assert_eq!(stdout.trim(), "verdict not recognized, nothing recorded");
    let status = ws.run_json(&["status"]);
    assert_eq!(status["streams"].as_array().map(Vec::len), Some(0));
}

#[test]
fn init_refuses_existing_workspace() {
    let ws = CliWorkspace::init(&["--project", "demo", "--dataset", "tweets"]);
    let output = ws.run(&["init"]);
    assert!(!output.status.success());
    ws.run_ok(&["init", "--force"]);
    let status = ws.run_json(&["status"]);
    assert_eq!(status["collection"], "sarcasm_detector/kaggle_sarcasm");
}

#[test]
fn invalid_stream_names_are_rejected() {
    let ws = CliWorkspace::init(&[]);
    let output = ws.run(&[
        "flag",
        "--stream",
        "../escape",
        "--verdict",
        "LABEL: NORMAL",
        "x",
    ]);
    assert!(!output.status.success());
}

#[cfg(unix)]
#[test]
fn classify_and_flag_with_configured_model() {
    let ws = CliWorkspace::init(&[
        "--model",
        r#"logistic=sh -c 'cat >/dev/null; echo "{\"scores\": {\"NORMAL\": 0.2, \"SARCASTIC\": 0.8}}"'"#,
    ]);
    let stdout = ws.run_ok(&[
        "classify",
        "--stream",
        "logistic",
        "--flag",
        "i just love waiting in line",
    ]);
    let mut lines = stdout.lines();
    assert_eq!(lines.next(), Some("LABEL: SARCASTIC"));
    assert_eq!(lines.next(), Some("CERTAINTY: 0.80"));
    assert!(lines.next().is_some_and(|line| line.starts_with("COMPUTE TIME: ")));
    assert_eq!(lines.next(), Some("1 labeled samples"));
}
