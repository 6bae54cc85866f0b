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

fn row(student: &str, subject: &str, term: &str, percent: f64) -> serde_json::Value {
    json!({
        "studentId": student,
        "subjectId": subject,
        "termId": term,
        "classId": "c1",
        "workType": "formative",
        "percent": percent
    })
}

fn tables() -> serde_json::Value {
    json!({
        "terms": [{ "id": "q1", "name": "Quarter 1" }, { "id": "q2", "name": "Quarter 2" }],
        "assessments": [
            row("good", "math", "q1", 90.0),
            row("good", "bio", "q1", 90.0),
            row("good", "chem", "q1", 75.0),
            row("failing", "math", "q1", 90.0),
            row("failing", "bio", "q1", 90.0),
            row("failing", "chem", "q1", 40.0),
            row("excellent", "math", "q1", 90.0),
            row("excellent", "bio", "q1", 90.0),
            row("excellent", "chem", "q1", 90.0),
            row("failing", "math", "q2", 95.0)
        ]
    })
}

fn status_of(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student: &str,
    term: &str,
) -> serde_json::Value {
    let result = request_ok(
        stdin,
        reader,
        "status",
        "status.of",
        json!({ "studentId": student, "termId": term }),
    );
    result["status"].clone()
}

#[test]
fn worst_grade_decides_term_status() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(&mut stdin, &mut reader, "1", "dataset.load", json!({ "tables": tables() }));

    assert_eq!(status_of(&mut stdin, &mut reader, "good", "q1"), json!("good"));
    assert_eq!(status_of(&mut stdin, &mut reader, "failing", "q1"), json!("failing"));
    assert_eq!(status_of(&mut stdin, &mut reader, "excellent", "q1"), json!("excellent"));

    // Terms are independent: the q1 failure does not leak into q2.
    assert_eq!(status_of(&mut stdin, &mut reader, "failing", "q2"), json!("excellent"));

    // No final records for the pair means no status at all.
    assert_eq!(status_of(&mut stdin, &mut reader, "good", "q2"), json!(null));
    assert_eq!(status_of(&mut stdin, &mut reader, "nobody", "q1"), json!(null));

    let _ = child.kill();
}

#[test]
fn status_list_filters_pairs_but_keeps_whole_term_status() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(&mut stdin, &mut reader, "1", "dataset.load", json!({ "tables": tables() }));

    let all = request_ok(&mut stdin, &mut reader, "2", "status.list", json!({}));
    assert_eq!(all["statuses"].as_array().map(|a| a.len()), Some(4));

    // Filtering on math still reports the chemistry-driven failure.
    let math_q1 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "status.list",
        json!({ "filter": { "subjectId": "math", "termId": "q1" } }),
    );
    let entries = math_q1["statuses"].as_array().cloned().unwrap_or_default();
    assert_eq!(entries.len(), 3);
    let failing = entries
        .iter()
        .find(|e| e["studentId"] == json!("failing"))
        .expect("failing entry");
    assert_eq!(failing["termId"], json!("q1"));
    assert_eq!(failing["status"], json!("failing"));

    let _ = child.kill();
}

#[test]
fn status_of_requires_both_keys() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(&mut stdin, &mut reader, "1", "dataset.load", json!({ "tables": tables() }));

    let missing = request(
        &mut stdin,
        &mut reader,
        "2",
        "status.of",
        json!({ "studentId": "good" }),
    );
    assert_eq!(missing["ok"], json!(false));
    assert_eq!(missing["error"]["code"], json!("bad_params"));

    // Integer ids are accepted the same way as strings.
    let numeric = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "status.of",
        json!({ "studentId": 42, "termId": "q1" }),
    );
    assert_eq!(numeric["studentId"], json!("42"));
    assert_eq!(numeric["status"], json!(null));

    let _ = child.kill();
}
