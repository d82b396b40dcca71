//! Runs the built binary in local mode against a scripted agent.
#![cfg(unix)]

use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};

use serde_json::Value;

/// Answers the gate's first downstream request with the id it was sent,
/// then idles.
const AGENT: &str = r#"read line
id=$(printf '%s' "$line" | sed 's/.*"id":\([0-9]*\).*/\1/')
caps='"agentCapabilities":{},"authMethods":[]'
printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":1,%s}}\n' "$id" "$caps"
sleep 30"#;

#[test]
fn local_mode_proxies_stdio_and_writes_the_audit_log() {
    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("logs").join("audit.jsonl");

    let mut gate = Command::new(env!("CARGO_BIN_EXE_acp-gate"))
        .args(["--agent-cmd", "sh", "--agent-arg", "-c", "--agent-arg", AGENT])
        .arg("--audit-db")
        .arg(&audit)
        .env("XDG_CONFIG_HOME", dir.path())
        .env("HOME", dir.path())
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdin = gate.stdin.take().unwrap();
    let stdout = gate.stdout.take().unwrap();

    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": { "protocolVersion": 1, "clientCapabilities": {} }
    });
    writeln!(stdin, "{request}").unwrap();
    stdin.flush().unwrap();

    let mut line = String::new();
    BufReader::new(stdout).read_line(&mut line).unwrap();
    let reply: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"]["protocolVersion"], 1);

    // End of stdin ends the connection.
    drop(stdin);
    let status = gate.wait().unwrap();
    assert!(status.success(), "{status}");

    let contents = std::fs::read_to_string(&audit).unwrap();
    let records: Vec<Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records.len(), 2);

    assert_eq!(records[0]["direction"], "upstream_to_downstream");
    assert_eq!(records[0]["method"], "initialize");
    assert_eq!(records[0]["is_request"], true);
    assert_eq!(records[0]["raw"]["protocolVersion"], 1);

    assert_eq!(records[1]["direction"], "downstream_to_upstream");
    assert_eq!(records[1]["method"], "initialize");
    assert_eq!(records[1]["is_request"], false);
}

#[test]
fn missing_agent_command_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_acp-gate"))
        .arg("--audit-db")
        .arg(dir.path().join("audit.jsonl"))
        .env("XDG_CONFIG_HOME", dir.path())
        .env("HOME", dir.path())
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no agent command"), "{stderr}");
}
