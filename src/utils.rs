use crate::error::{AppError, AppResult};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::warn;

static E164: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+[1-9]\d{1,14}$").unwrap());

/// A number is dialable when it is E.164 formatted and explicitly whitelisted.
pub fn validate_phone_number(phone: &str, whitelist: &HashSet<String>) -> AppResult<()> {
    if !E164.is_match(phone) {
        warn!(phone=%phone, "rejecting phone number that is not E.164");
        return Err(AppError::validation(format!(
            "phone number '{phone}' is not in E.164 format"
        )));
    }
    if !whitelist.contains(phone) {
        warn!(phone=%phone, "rejecting phone number that is not whitelisted");
        return Err(AppError::validation(format!(
            "phone number '{phone}' is not whitelisted"
        )));
    }
    Ok(())
}

/// Raw webhook form body as a flat JSON object, kept on call events for auditing.  Repeated keys
/// keep their last value.
pub fn form_to_json(body: &str) -> Value {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(body).unwrap_or_else(|e| {
        warn!(error=%e, "failed to decode webhook body for the call event log");
        Vec::new()
    });
    let map: Map<String, Value> = pairs
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    Value::Object(map)
}

/// First `max_chars` characters of `text`, respecting char boundaries.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
