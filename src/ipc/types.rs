use crate::snapshot::Snapshot;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    /// Last fully computed snapshot. A load swaps the whole Arc, so a query
    /// never sees grades from one load next to statuses from another.
    pub snapshot: Option<Arc<Snapshot>>,
    pub loads: u64,
}
