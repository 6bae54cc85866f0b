use crate::attendance::attendance_summary;
use crate::ipc::error::{engine_err, ok_model};
use crate::ipc::helpers::{current_snapshot, parse_filter, parse_group_by};
use crate::ipc::types::{AppState, Request};

fn handle_attendance_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let snapshot = match current_snapshot(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filter = match parse_filter(req, &snapshot) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let group_by = match parse_group_by(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match attendance_summary(&snapshot.context(), &filter, group_by) {
        Ok(result) => ok_model(&req.id, &result),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.summary" => Some(handle_attendance_summary(state, req)),
        _ => None,
    }
}
