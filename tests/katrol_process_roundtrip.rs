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

fn seed_class(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s2",
        "years.upsert",
        json!({ "name": "2024/2025", "active": true }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s3",
        "students.upsert",
        json!({ "students": [
            { "nisn": "0051", "name": "Ani Lestari", "classId": "3" },
            { "nisn": "0052", "name": "Budi Santoso", "classId": "3" }
        ]}),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s4",
        "settings.upsert",
        json!({ "classId": "3", "subject": "Matematika", "kkm": 70, "maxCurved": 90 }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s5",
        "scores.save",
        json!({
            "classId": "3", "subject": "Matematika", "semester": 1,
            "edits": [
                { "nisn": "0051", "assessmentType": "NH1", "score": 60.0 },
                { "nisn": "0051", "assessmentType": "NH2", "score": 80.0 },
                { "nisn": "0051", "assessmentType": "NH3", "score": null },
                { "nisn": "0051", "assessmentType": "UTS", "score": 50.0 },
                { "nisn": "0051", "assessmentType": "UAS", "score": 90.0 },
                { "nisn": "0052", "assessmentType": "NH1", "score": 40.0 },
                { "nisn": "0052", "assessmentType": "NH3", "score": 55.0 },
                { "nisn": "0052", "assessmentType": "UAS", "score": 65.0 }
            ]
        }),
    );
}

fn num(result: &serde_json::Value, key: &str) -> Option<f64> {
    let v = result.get(key).expect(key);
    if v.is_null() {
        None
    } else {
        v.as_f64()
    }
}

#[test]
fn process_persists_curved_aggregates_and_reruns_identically() {
    let workspace = temp_dir("katrol-roundtrip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed_class(&mut stdin, &mut reader, &workspace);

    let scope = json!({ "classId": "3", "subject": "Matematika", "semester": 1 });

    let first = request_ok(&mut stdin, &mut reader, "p1", "katrol.process", scope.clone());
    assert_eq!(first.get("saved").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(
        first.get("periodicTags").expect("tags"),
        &json!(["NH1", "NH2", "NH3"])
    );
    assert_eq!(
        first.get("academicYear").and_then(|v| v.as_str()),
        Some("2024/2025")
    );

    let results = first.get("results").and_then(|v| v.as_array()).expect("results");
    assert_eq!(results.len(), 2);

    // Sorted by name: Ani first.
    let ani = &results[0];
    assert_eq!(ani.get("nisn").and_then(|v| v.as_str()), Some("0051"));
    assert_eq!(num(ani, "periodicMeanRaw"), Some(70.0));
    assert_eq!(num(ani, "periodicMeanCurved"), Some(71.43));
    assert_eq!(num(ani, "finalRaw"), Some(70.0));
    assert_eq!(num(ani, "finalCurved"), Some(72.29));
    assert_eq!(num(ani, "minRaw"), Some(50.0));
    assert_eq!(num(ani, "maxRaw"), Some(90.0));
    assert_eq!(ani.get("status").and_then(|v| v.as_str()), Some("Tuntas"));
    let ani_curved = ani.get("curvedScores").expect("curved map");
    assert_eq!(ani_curved.get("NH1").and_then(|v| v.as_f64()), Some(62.86));
    assert_eq!(ani_curved.get("NH2").and_then(|v| v.as_f64()), Some(80.0));
    assert!(ani_curved.get("NH3").expect("NH3 cell").is_null());
    assert_eq!(ani_curved.get("UTS").and_then(|v| v.as_f64()), Some(55.71));
    assert_eq!(ani_curved.get("UAS").and_then(|v| v.as_f64()), Some(90.0));

    let budi = &results[1];
    assert_eq!(budi.get("nisn").and_then(|v| v.as_str()), Some("0052"));
    assert_eq!(num(budi, "periodicMeanRaw"), Some(47.5));
    assert_eq!(num(budi, "periodicMeanCurved"), Some(53.93));
    assert_eq!(num(budi, "finalRaw"), Some(55.0));
    assert_eq!(num(budi, "finalCurved"), Some(59.29));
    assert_eq!(
        budi.get("status").and_then(|v| v.as_str()),
        Some("Belum Tuntas")
    );

    // Re-running the same scope is idempotent and upserts in place.
    let second = request_ok(&mut stdin, &mut reader, "p2", "katrol.process", scope.clone());
    assert_eq!(second.get("results"), first.get("results"));

    let stored = request_ok(&mut stdin, &mut reader, "p3", "katrol.results", scope);
    let stored_rows = stored.get("results").and_then(|v| v.as_array()).expect("rows");
    assert_eq!(stored_rows.len(), 2);
    assert_eq!(
        stored_rows[0]
            .get("settings")
            .and_then(|s| s.get("kkm"))
            .and_then(|v| v.as_i64()),
        Some(70)
    );
    assert_eq!(
        stored_rows[0]
            .get("settings")
            .and_then(|s| s.get("maxCurved"))
            .and_then(|v| v.as_i64()),
        Some(90)
    );
    assert!(stored_rows[0]
        .get("processedAt")
        .and_then(|v| v.as_str())
        .is_some());

    // No duplicate rows at the storage level either.
    {
        use rusqlite::Connection;
        let conn = Connection::open(db_path(&workspace)).expect("open db");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM nilai_katrol", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 2);
    }

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}
