use crate::aggregate;
use crate::ipc::error::ok;
use crate::ipc::helpers::{current_snapshot, parse_filter, required_id};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let snapshot = match current_snapshot(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filter = match parse_filter(req, &snapshot) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let rows = snapshot.context().filtered(&filter);
    tracing::debug!(count = rows.len(), "grades.list");
    ok(
        &req.id,
        json!({
            "snapshotId": snapshot.id,
            "finalGrades": rows,
        }),
    )
}

fn handle_status_of(state: &mut AppState, req: &Request) -> serde_json::Value {
    let snapshot = match current_snapshot(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_id(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_id(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "termId": term_id,
            "status": snapshot.status_of(&student_id, &term_id).map(|s| s.as_str()),
        }),
    )
}

fn handle_status_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let snapshot = match current_snapshot(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filter = match parse_filter(req, &snapshot) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let entries = aggregate::list_statuses(&snapshot.context(), &filter);
    ok(
        &req.id,
        json!({
            "snapshotId": snapshot.id,
            "statuses": entries,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.list" => Some(handle_grades_list(state, req)),
        "status.of" => Some(handle_status_of(state, req)),
        "status.list" => Some(handle_status_list(state, req)),
        _ => None,
    }
}
