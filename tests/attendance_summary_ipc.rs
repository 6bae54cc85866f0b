use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradeboardd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradeboardd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
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
    serde_json::from_str(line.trim()).expect("parse response")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(value["ok"], json!(true), "{} failed: {}", method, value);
    value["result"].clone()
}

fn approx(v: &serde_json::Value, expected: f64) {
    let got = v.as_f64().unwrap_or(f64::NAN);
    assert!((got - expected).abs() < 1e-6, "expected {}, got {}", expected, v);
}

fn tables() -> serde_json::Value {
    json!({
        "students": [
            { "id": "s1", "name": "Aida", "classId": "c11b" },
            { "id": "s2", "name": "Bolat", "classId": "c11b" },
            { "id": "s3", "name": "Dana", "classId": "c9a" }
        ],
        "classes": [{ "id": "c9a", "name": "9 A" }, { "id": "c11b", "name": "11 B" }],
        "terms": [{ "id": "q1", "name": "Quarter 1" }, { "id": "q2", "name": "Quarter 2" }],
        "assessments": [
            { "studentId": "s1", "subjectId": "math", "termId": "q1", "workType": "formative", "percent": 80 }
        ],
        "attendance": [
            { "studentId": "s1", "termId": "q1", "present": true },
            { "studentId": "s1", "termId": "q1", "present": false },
            { "studentId": "s2", "termId": "q1", "status": "late" },
            { "studentId": "s3", "termId": "q1", "status": "present" },
            { "studentId": "s3", "termId": "q2", "status": "absent" },
            { "studentId": "s1", "termId": "summer", "present": 1 }
        ]
    })
}

#[test]
fn attendance_rate_pools_and_groups_by_class() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(&mut stdin, &mut reader, "1", "dataset.load", json!({ "tables": tables() }));

    let overall = request_ok(&mut stdin, &mut reader, "2", "attendance.summary", json!({}));
    assert_eq!(overall["kind"], json!("scalar"));
    approx(&overall["value"], 400.0 / 6.0);
    assert_eq!(overall["count"], json!(6));

    let q1 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.summary",
        json!({ "filter": { "termId": "q1" } }),
    );
    approx(&q1["value"], 75.0);

    let by_class = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.summary",
        json!({ "groupBy": "class" }),
    );
    let matrix = &by_class["matrix"];
    let keys: Vec<&str> = matrix["columns"]
        .as_array()
        .map(|cols| cols.iter().filter_map(|c| c["key"].as_str()).collect())
        .unwrap_or_default();
    // Attendance-only terms sit before the pooled column.
    assert_eq!(keys, vec!["q1", "q2", "summer", "all"]);

    let rows = matrix["rows"].as_array().cloned().unwrap_or_default();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["key"], json!("c9a"));
    approx(&rows[0]["cells"][0], 100.0);
    approx(&rows[0]["cells"][1], 0.0);
    assert_eq!(rows[0]["cells"][2], json!(null));
    approx(&rows[0]["cells"][3], 50.0);

    assert_eq!(rows[1]["key"], json!("c11b"));
    approx(&rows[1]["cells"][0], 200.0 / 3.0);
    assert_eq!(rows[1]["cells"][1], json!(null));
    approx(&rows[1]["cells"][2], 100.0);
    approx(&rows[1]["cells"][3], 75.0);

    let _ = child.kill();
}

#[test]
fn attendance_rejects_subject_scoped_queries() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(&mut stdin, &mut reader, "1", "dataset.load", json!({ "tables": tables() }));

    let by_subject = request(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.summary",
        json!({ "filter": { "subjectId": "math" } }),
    );
    assert_eq!(by_subject["error"]["code"], json!("bad_params"));

    let by_teacher = request(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.summary",
        json!({ "groupBy": "teacher" }),
    );
    assert_eq!(by_teacher["error"]["code"], json!("bad_params"));

    let by_student = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.summary",
        json!({ "groupBy": "student", "filter": { "classId": "c11b", "termId": "q1" } }),
    );
    let rows = by_student["matrix"]["rows"].as_array().cloned().unwrap_or_default();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["label"], json!("Aida"));
    approx(&rows[0]["cells"][0], 50.0);
    approx(&rows[1]["cells"][0], 100.0);

    let _ = child.kill();
}
