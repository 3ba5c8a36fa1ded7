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

#[test]
fn unscored_students_and_sparse_columns_are_handled_not_dropped() {
    let workspace = temp_dir("katrol-partial");
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
            { "nisn": "0051", "name": "Ani Lestari", "classId": "3" },
            { "nisn": "0053", "name": "Citra Dewi", "classId": "3" }
        ]}),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "settings.upsert",
        json!({ "classId": "3", "subject": "IPA", "kkm": 70, "maxCurved": 90 }),
    );
    // NH1 never appears; NH5 exists only as an unscored slot; NH10 must sort
    // after NH2.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "scores.save",
        json!({
            "classId": "3", "subject": "IPA", "semester": 2,
            "edits": [
                { "nisn": "0051", "assessmentType": "NH2", "score": 65.0 },
                { "nisn": "0051", "assessmentType": "NH10", "score": 75.0 },
                { "nisn": "0051", "assessmentType": "NH5", "score": null }
            ]
        }),
    );

    let scope = json!({ "classId": "3", "subject": "IPA", "semester": 2 });
    let processed = request_ok(&mut stdin, &mut reader, "6", "katrol.process", scope);

    assert_eq!(
        processed.get("periodicTags").expect("tags"),
        &json!(["NH2", "NH10"])
    );

    let results = processed
        .get("results")
        .and_then(|v| v.as_array())
        .expect("results");
    assert_eq!(results.len(), 2);

    // The all-null NH5 column is not a column; the discovered slots plus
    // UTS/UAS are exactly the keys of every score map.
    let ani_raw = results[0]
        .get("rawScores")
        .and_then(|v| v.as_object())
        .expect("raw map");
    let mut keys: Vec<&String> = ani_raw.keys().collect();
    keys.sort();
    assert_eq!(keys, ["NH10", "NH2", "UAS", "UTS"]);

    // Citra has no rows at all and still comes back, unprocessed.
    let citra = &results[1];
    assert_eq!(citra.get("nisn").and_then(|v| v.as_str()), Some("0053"));
    assert!(citra.get("periodicMeanRaw").expect("mean").is_null());
    assert!(citra.get("finalRaw").expect("final").is_null());
    assert!(citra.get("finalCurved").expect("final curved").is_null());
    assert_eq!(
        citra.get("status").and_then(|v| v.as_str()),
        Some("Belum Diproses")
    );

    // A class with no active students is reported, not an error.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "settings.upsert",
        json!({ "classId": "9", "subject": "IPA", "kkm": 70, "maxCurved": 90 }),
    );
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "katrol.process",
        json!({ "classId": "9", "subject": "IPA", "semester": 2 }),
    );
    assert_eq!(
        empty.get("results").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
    assert_eq!(
        empty.get("warnings").expect("warnings"),
        &json!(["no_active_students"])
    );

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}
