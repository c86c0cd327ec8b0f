//! Decoding of task tool results.
//!
//! The task tools answer with a standard tool result whose text content
//! items each hold a JSON document as a string. These functions unwrap that
//! nesting and never fail outright: anything unreadable is logged and
//! skipped, or mapped to a safe default.

use crate::model::AssignedTask;
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
struct UpdateOutcome {
    success: bool,
}

/// Content items of a raw tool result, or `None` if there is no array.
fn content_items(result: &Value) -> Option<&Vec<Value>> {
    result.get("content").and_then(Value::as_array)
}

fn item_text(item: &Value) -> Option<&str> {
    item.get("text").and_then(Value::as_str)
}

/// Decode a `get_assigned_tasks` result.
///
/// Each text item must parse to an object with a `data` array of task
/// records. A record that fails to decode is dropped without affecting the
/// rest.
pub fn decode_assigned_tasks(result: &Value) -> Vec<AssignedTask> {
    let Some(items) = content_items(result) else {
        tracing::warn!("get_assigned_tasks result has no content array");
        return Vec::new();
    };
    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        let message: Vec<&str> = items.iter().filter_map(item_text).collect();
        tracing::warn!(message = %message.join(" "), "get_assigned_tasks reported an error");
        return Vec::new();
    }

    let mut tasks = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item_text(item) else {
            tracing::debug!(index, "Skipping non-text content item");
            continue;
        };
        let payload: Value = match serde_json::from_str(text) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(index, "Content item is not JSON: {e}");
                continue;
            }
        };
        let Some(records) = payload.get("data").and_then(Value::as_array) else {
            tracing::warn!(index, "Content item has no data array");
            continue;
        };
        for record in records {
            match AssignedTask::deserialize(record) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    let id = record.get("id").cloned().unwrap_or(Value::Null);
                    tracing::warn!(%id, "Skipping malformed task record: {e}");
                }
            }
        }
    }
    tasks
}

/// Decode an `update_task` result: the first content item's text must parse
/// to `{"success": bool}`. Anything else counts as `false`.
pub fn decode_update_result(result: &Value) -> bool {
    let Some(text) = content_items(result)
        .and_then(|items| items.first())
        .and_then(item_text)
    else {
        tracing::warn!("update_task result has no text content");
        return false;
    };
    match serde_json::from_str::<UpdateOutcome>(text) {
        Ok(outcome) => outcome.success,
        Err(e) => {
            tracing::warn!("Failed to decode update_task result: {e}");
            false
        }
    }
}
