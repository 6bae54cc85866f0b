use crate::aggregate::{self, AggregateFilter, Dimension};
use crate::ipc::error::{engine_err, err};
use crate::ipc::types::{AppState, Request};
use crate::snapshot::Snapshot;
use std::sync::Arc;

pub fn required_id(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(crate::ingest::value_as_id)
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn current_snapshot(
    state: &AppState,
    req: &Request,
) -> Result<Arc<Snapshot>, serde_json::Value> {
    state
        .snapshot
        .clone()
        .ok_or_else(|| err(&req.id, "no_dataset", "load a dataset first", None))
}

pub fn parse_filter(
    req: &Request,
    snapshot: &Snapshot,
) -> Result<AggregateFilter, serde_json::Value> {
    aggregate::parse_aggregate_filter(req.params.get("filter"), &snapshot.context())
        .map_err(|e| engine_err(&req.id, &e))
}

pub fn parse_group_by(req: &Request) -> Result<Option<Dimension>, serde_json::Value> {
    match req.params.get("groupBy") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let parsed = v.as_str().and_then(Dimension::parse);
            let Some(d) = parsed else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "groupBy must be one of class, subject, gradeLevel, teacher, student",
                    Some(serde_json::json!({ "groupBy": v })),
                ));
            };
            Ok(Some(d))
        }
    }
}
