//! Small helpers shared by the queue, the HTTP dispatcher and the CLI.

/// Longest error text carried into logs and `last_error`
const MAX_COMPACT_CHARS: usize = 180;

/// Trimmed text, or `None` when absent or blank
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Whether `value` is an absolute `http(s)` URL
pub fn is_http_url(value: &str) -> bool {
    ["http://", "https://"]
        .iter()
        .any(|scheme| value.starts_with(scheme))
}

/// Trim and cap remote error text before it is logged or persisted
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(MAX_COMPACT_CHARS).collect()
}

pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
