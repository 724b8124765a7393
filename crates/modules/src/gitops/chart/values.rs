// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chart values: parsing, fetching from URLs and merging.

use agentk_adapters::HttpResponse;
use serde_json::{Map, Value};

/// Merge `src` into `dst`. Maps merge key by key; any other non-null value
/// in `src` replaces the one in `dst`.
pub fn merge_values(dst: &mut Value, src: &Value) {
    match (dst, src) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                match dst.get_mut(key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        dst.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (dst, src) => *dst = src.clone(),
    }
}

/// Parse a YAML or JSON values document. An empty document is an empty map.
pub(crate) fn parse_values(data: &[u8]) -> Result<Value, String> {
    let value: Value = serde_yaml::from_slice(data).map_err(|e| format!("unmarshaling chart values: {e}"))?;
    match value {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) => Ok(value),
        _ => Err("unmarshaling chart values: document is not a map".to_string()),
    }
}

fn is_values_content_type(content_type: &str) -> bool {
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    media_type.eq_ignore_ascii_case("application/json") || media_type.eq_ignore_ascii_case("application/yaml")
}

/// Values from a URL response. `max_size` bytes or more is treated as a
/// truncated file.
pub(crate) fn values_from_response(resp: &HttpResponse, max_size: usize) -> Result<Value, String> {
    match resp.status {
        200 => {}
        204 => return Ok(Value::Object(Map::new())),
        status => return Err(format!("unexpected HTTP status code: {status}")),
    }
    let content_type = resp.content_type.as_deref().unwrap_or_default();
    if !is_values_content_type(content_type) {
        return Err(format!("unexpected Content-Type in response: {content_type:?}"));
    }
    if resp.body.len() >= max_size {
        return Err(format!("max file size reached: {max_size} bytes"));
    }
    parse_values(&resp.body).map_err(|e| format!("parsing error: {e}"))
}

#[cfg(test)]
#[path = "values_tests.rs"]
mod tests;
