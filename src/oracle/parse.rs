//! Parsing of untrusted oracle output.
//!
//! Model output may be bare JSON, fenced in markdown, or embedded in prose.
//! Every parser extracts the object first and then deserializes the
//! documented fields, so a failure is always a recoverable error string.

use serde::Deserialize;

use crate::pipeline::types::{ArchiveDecision, UnsubscribeLink};

/// A Gmail-style filter proposed for a user request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProposedFilter {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub has_words: String,
    pub does_not_have_words: String,
    pub size: FilterSize,
    pub has_attachment: bool,
    pub include_chats: bool,
    pub action: FilterAction,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSize {
    pub greater_than: bool,
    #[serde(rename = "sizeInMB")]
    pub size_in_mb: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterAction {
    pub delete: bool,
    pub archive: bool,
    pub mark_as_read: bool,
    pub star: bool,
    pub label: String,
    pub forward_to: String,
}

pub fn parse_archive_decision(raw: &str) -> Result<ArchiveDecision, String> {
    let json_str = extract_json_object(raw);
    let mut decision: ArchiveDecision =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;
    decision.confidence = clamp_unit(decision.confidence);
    decision.importance_score = clamp_unit(decision.importance_score);
    decision.summary = decision.summary.filter(|s| !s.trim().is_empty());
    Ok(decision)
}

/// Rule ids from an `{"id": [...]}` match response, in oracle order.
///
/// Accepts numbers or numeric strings, and a bare id instead of a list.
pub fn parse_nl_match(raw: &str) -> Result<Vec<i64>, String> {
    let json_str = extract_json_object(raw);
    let value: serde_json::Value =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    let ids = match value.get("id").or_else(|| value.get("ids")) {
        Some(serde_json::Value::Array(items)) => items.clone(),
        Some(serde_json::Value::Null) | None => Vec::new(),
        Some(single) => vec![single.clone()],
    };

    ids.iter()
        .map(|v| match v {
            serde_json::Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| format!("rule id is not an integer: {n}")),
            serde_json::Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("rule id is not an integer: '{s}'")),
            other => Err(format!("unexpected rule id value: {other}")),
        })
        .collect()
}

pub fn parse_unsubscribe(raw: &str) -> Result<UnsubscribeLink, String> {
    let json_str = extract_json_object(raw);
    let mut link: UnsubscribeLink =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;
    link.confidence = clamp_unit(link.confidence);
    link.link = link
        .link
        .map(|l| l.trim().trim_start_matches('<').trim_end_matches('>').to_string())
        .filter(|l| !l.is_empty() && l != "null");
    Ok(link)
}

pub fn parse_proposed_filter(raw: &str) -> Result<ProposedFilter, String> {
    let json_str = extract_json_object(raw);
    serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))
}

/// Free-text reply with any surrounding code fence removed.
pub fn parse_text(raw: &str) -> Result<String, String> {
    let mut text = raw.trim();
    if let Some(inner) = text.strip_prefix("```") {
        let inner = inner.split_once('\n').map_or("", |(_, rest)| rest);
        text = inner.trim_end().strip_suffix("```").unwrap_or(inner).trim();
    }
    if text.is_empty() {
        return Err("empty response".to_string());
    }
    Ok(text.to_string())
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
pub fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
