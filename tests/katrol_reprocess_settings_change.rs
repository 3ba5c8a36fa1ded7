use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_katrold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn katrold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn db_path(workspace: &PathBuf) -> PathBuf {
    workspace.join("katrol.sqlite3")
}

fn curved_nh1(result: &serde_json::Value) -> f64 {
    result
        .get("results")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|r| r.get("curvedScores"))
        .and_then(|m| m.get("NH1"))
        .and_then(|v| v.as_f64())
        .expect("NH1 curved value")
}

#[test]
fn reprocessing_always_curves_from_the_raw_baseline() {
    let workspace = temp_dir("katrol-reprocess");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "years.upsert",
        json!({ "name": "2024/2025", "active": true }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.upsert",
        json!({ "students": [
            { "nisn": "0051", "name": "Ani Lestari", "classId": "3" }
        ]}),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "settings.upsert",
        json!({ "classId": "3", "subject": "Matematika", "kkm": 70, "maxCurved": 90 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "scores.save",
        json!({
            "classId": "3", "subject": "Matematika", "semester": 1,
            "edits": [
                { "nisn": "0051", "assessmentType": "NH1", "score": 50.0 },
                { "nisn": "0051", "assessmentType": "UTS", "score": 80.0 }
            ]
        }),
    );

    let scope = json!({ "classId": "3", "subject": "Matematika", "semester": 1 });

    // First run under kkm=70/max=90: 50 -> 50 + 20*20/70.
    let first = request_ok(&mut stdin, &mut reader, "6", "katrol.process", scope.clone());
    assert_eq!(curved_nh1(&first), 55.71);

    // Raise the bar and re-run: 50 -> 50 + 25*20/75. A double-curve from
    // 55.71 would land at 60.85 instead.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "settings.upsert",
        json!({ "classId": "3", "subject": "Matematika", "kkm": 75, "maxCurved": 95 }),
    );
    let second = request_ok(&mut stdin, &mut reader, "8", "katrol.process", scope.clone());
    assert_eq!(curved_nh1(&second), 56.67);

    // Editing the raw score refreshes the baseline for the next run.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "scores.save",
        json!({
            "classId": "3", "subject": "Matematika", "semester": 1,
            "edits": [ { "nisn": "0051", "assessmentType": "NH1", "score": 60.0 } ]
        }),
    );
    let third = request_ok(&mut stdin, &mut reader, "10", "katrol.process", scope.clone());
    assert_eq!(curved_nh1(&third), 64.0);

    // Even with the nilai rows gone (legacy import shape), the persisted
    // raw snapshot, not the curved values, feeds the next run.
    {
        use rusqlite::Connection;
        let conn = Connection::open(db_path(&workspace)).expect("open db");
        conn.execute("DELETE FROM nilai", []).expect("clear nilai");
    }
    let fourth = request_ok(&mut stdin, &mut reader, "11", "katrol.process", scope);
    assert_eq!(curved_nh1(&fourth), 64.0);

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}
