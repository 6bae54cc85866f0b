use crate::ingest;
use crate::ipc::error::{engine_err, err, ok_model};
use crate::ipc::helpers::current_snapshot;
use crate::ipc::types::{AppState, Request};
use crate::snapshot::Snapshot;
use std::sync::Arc;

/// Types the raw tables, runs the full pipeline and swaps the snapshot in.
/// Any failure leaves the previous snapshot current.
fn handle_dataset_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(tables) = req.params.get("tables") else {
        return err(&req.id, "bad_params", "missing tables", None);
    };

    let (raw, report) = match ingest::parse_tables(tables) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "dataset rejected at ingestion");
            return engine_err(&req.id, &e);
        }
    };

    let snapshot = match Snapshot::build(raw, report) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "dataset rejected by recompute");
            return engine_err(&req.id, &e);
        }
    };

    let c = snapshot.coverage;
    tracing::info!(
        snapshot = %snapshot.id,
        rows_in = c.rows_in,
        rows_used = c.rows_used,
        dropped_unparseable = c.dropped_unparseable,
        dropped_no_score = c.dropped_no_score,
        dropped_unknown_work_type = c.dropped_unknown_work_type,
        final_grades = snapshot.final_grades.len(),
        statuses = snapshot.statuses.len(),
        "dataset loaded"
    );

    let summary = snapshot.summary();
    state.snapshot = Some(Arc::new(snapshot));
    state.loads += 1;
    ok_model(&req.id, &summary)
}

fn handle_dataset_info(state: &mut AppState, req: &Request) -> serde_json::Value {
    let snapshot = match current_snapshot(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    ok_model(&req.id, &snapshot.summary())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dataset.load" => Some(handle_dataset_load(state, req)),
        "dataset.info" => Some(handle_dataset_info(state, req)),
        _ => None,
    }
}
