//! Shared utilities

/// Truncate a string to `max` characters, appending "..." if truncated.
/// Operates on Unicode char boundaries, not bytes.
pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// Single-line preview of message content
pub fn preview(content: &str, max: usize) -> String {
    truncate_chars(&content.replace('\n', " "), max)
}

/// Format a millisecond timestamp for display
pub fn format_timestamp(millis: i64) -> String {
    use chrono::{TimeZone, Utc};
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
