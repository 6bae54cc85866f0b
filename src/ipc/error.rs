use crate::error::EngineError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn engine_err(id: &str, e: &EngineError) -> serde_json::Value {
    let details = match e {
        EngineError::InvalidTable { table, .. } => Some(json!({ "table": table })),
        _ => None,
    };
    err(id, e.code(), e.to_string(), details)
}

/// Serializes a result model into an ok response.
pub fn ok_model<T: serde::Serialize>(id: &str, model: &T) -> serde_json::Value {
    match serde_json::to_value(model) {
        Ok(v) => ok(id, v),
        Err(e) => err(id, "serialize_failed", e.to_string(), None),
    }
}
