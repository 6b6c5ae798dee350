//! Lenient JSON recovery for model output
//!
//! Models wrap JSON in markdown fences, leave trailing commas and add prose
//! around the payload. `parse_json_response` tries progressively looser
//! strategies and never fails: the caller's default (or the raw text under
//! `raw_response`) is returned when nothing parses.
//!
//! Author: hephaex@gmail.com

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Key holding unparseable text when the caller supplied no default
pub const RAW_RESPONSE_KEY: &str = "raw_response";

/// Key wrapping a bare top-level array
pub const ITEMS_KEY: &str = "items";

static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
static TRAILING_COMMA: OnceLock<Option<Regex>> = OnceLock::new();
static OBJECT_SPAN: OnceLock<Option<Regex>> = OnceLock::new();
static ARRAY_SPAN: OnceLock<Option<Regex>> = OnceLock::new();

fn pattern(cell: &'static OnceLock<Option<Regex>>, source: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(source).ok()).as_ref()
}

/// Parse model output into a JSON object.
///
/// Strategies, in order: fenced block contents, the trimmed text as-is,
/// trailing commas removed, the outermost `{...}` span (as-is then
/// comma-fixed), the outermost `[...]` span wrapped under `items`.
pub fn parse_json_response(raw: &str, default: Option<Value>) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return default.unwrap_or_else(|| single_key(RAW_RESPONSE_KEY, Value::from("")));
    }

    let cleaned = pattern(&FENCE, r"(?s)```(?:json)?\s*\n?(.*?)\n?\s*```")
        .and_then(|re| re.captures(trimmed))
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |inner| inner.as_str().trim());

    if let Some(value) = try_parse(cleaned) {
        return value;
    }
    if let Some(value) = try_parse(&fix_trailing_commas(cleaned)) {
        return value;
    }

    if let Some(span) = pattern(&OBJECT_SPAN, r"(?s)\{.*\}").and_then(|re| re.find(cleaned)) {
        let span = span.as_str();
        if let Some(value) = try_parse(span).or_else(|| try_parse(&fix_trailing_commas(span))) {
            return value;
        }
    }

    if let Some(span) = pattern(&ARRAY_SPAN, r"(?s)\[.*\]").and_then(|re| re.find(cleaned)) {
        if let Some(value) = try_parse(span.as_str()) {
            return value;
        }
    }

    tracing::warn!(
        response_preview = %cleaned.chars().take(200).collect::<String>(),
        "json_parse_failed"
    );
    default.unwrap_or_else(|| single_key(RAW_RESPONSE_KEY, Value::from(raw)))
}

/// Objects pass through, arrays are wrapped under `items`, scalars are rejected
fn try_parse(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text).ok()? {
        value @ Value::Object(_) => Some(value),
        Value::Array(items) => Some(single_key(ITEMS_KEY, Value::Array(items))),
        _ => None,
    }
}

fn single_key(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

fn fix_trailing_commas(text: &str) -> String {
    match pattern(&TRAILING_COMMA, r",\s*([}\]])") {
        Some(re) => re.replace_all(text, "$1").into_owned(),
        None => text.to_string(),
    }
}

// ============================================================================
// Validated reports
// ============================================================================

/// Normalized summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub executive_summary: String,
    /// `{title, summary}` objects as returned by the model
    pub section_summaries: Vec<Value>,
    pub bullet_highlights: Vec<String>,
    pub key_takeaways: Vec<String>,
}

/// Normalized risk report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub overall_risk_score: String,
    pub risk_items: Vec<Value>,
    pub total_risks: u64,
}

/// Normalized comparison
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub summary: String,
    pub similarities: Vec<String>,
    pub differences: Vec<Value>,
}

fn as_object(data: &Value) -> Option<&Map<String, Value>> {
    data.as_object()
}

fn text_field(data: &Value, key: &str, default: &str) -> String {
    match as_object(data).and_then(|map| map.get(key)) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => default.to_string(),
        Some(other) => other.to_string(),
    }
}

fn list_field(data: &Value, key: &str) -> Vec<Value> {
    match as_object(data).and_then(|map| map.get(key)) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.clone()],
    }
}

fn string_list_field(data: &Value, key: &str) -> Vec<String> {
    list_field(data, key)
        .into_iter()
        .map(|item| match item {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect()
}

pub fn validate_summary(data: &Value) -> SummaryReport {
    SummaryReport {
        executive_summary: text_field(data, "executive_summary", ""),
        section_summaries: list_field(data, "section_summaries"),
        bullet_highlights: string_list_field(data, "bullet_highlights"),
        key_takeaways: string_list_field(data, "key_takeaways"),
    }
}

/// `total_risks` falls back to the number of risk items
pub fn validate_risks(data: &Value) -> RiskReport {
    let risk_items = list_field(data, "risk_items");
    let total_risks = as_object(data)
        .and_then(|map| map.get("total_risks"))
        .and_then(Value::as_u64)
        .unwrap_or(risk_items.len() as u64);

    RiskReport {
        overall_risk_score: text_field(data, "overall_risk_score", "Medium"),
        risk_items,
        total_risks,
    }
}

pub fn validate_comparison(data: &Value) -> ComparisonReport {
    ComparisonReport {
        summary: text_field(data, "summary", ""),
        similarities: string_list_field(data, "similarities"),
        differences: list_field(data, "differences"),
    }
}
