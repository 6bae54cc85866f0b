use crate::aggregate::{self, Metric};
use crate::ipc::error::{err, ok_model};
use crate::ipc::helpers::{current_snapshot, parse_filter, parse_group_by};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn parse_metric(req: &Request) -> Result<Metric, serde_json::Value> {
    let raw = req.params.get("metric").and_then(|v| v.as_str());
    let Some(raw) = raw else {
        return Err(err(&req.id, "bad_params", "missing metric", None));
    };
    Metric::parse(raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            format!("unknown metric: {}", raw),
            Some(json!({
                "allowed": Metric::ALL.iter().map(|m| m.as_str()).collect::<Vec<_>>()
            })),
        )
    })
}

fn handle_analytics_aggregate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let snapshot = match current_snapshot(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filter = match parse_filter(req, &snapshot) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let metric = match parse_metric(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let group_by = match parse_group_by(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    tracing::debug!(
        metric = metric.as_str(),
        group_by = ?group_by,
        "analytics.aggregate"
    );
    let result = aggregate::query_aggregate(&snapshot.context(), &filter, metric, group_by);
    ok_model(&req.id, &result)
}

fn handle_analytics_status_distribution(
    state: &mut AppState,
    req: &Request,
) -> serde_json::Value {
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

    let result = aggregate::status_distribution(&snapshot.context(), &filter, group_by);
    ok_model(&req.id, &result)
}

fn handle_analytics_filters_options(state: &mut AppState, req: &Request) -> serde_json::Value {
    let snapshot = match current_snapshot(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    ok_model(&req.id, &aggregate::filter_options(&snapshot.context()))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.aggregate" => Some(handle_analytics_aggregate(state, req)),
        "analytics.statusDistribution" => Some(handle_analytics_status_distribution(state, req)),
        "analytics.filtersOptions" => Some(handle_analytics_filters_options(state, req)),
        _ => None,
    }
}
