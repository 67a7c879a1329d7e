//! Utility functions for the Raven client
//!
//! Event ids, timestamps, tag merging, truncation and client IP lookup.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::HashMap;
use uuid::Uuid;

/// Generate a fresh event id
///
/// UUID v4 rendered as 32 lowercase hex digits without dashes, the form the
/// collector expects.
pub fn generate_event_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Current time in the collector's timestamp format
pub fn current_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// `YYYY-MM-DDTHH:MM:SS`, UTC, no offset suffix
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Merge call tags over default tags; on key collision the call tag wins
pub fn merge_tags(
    defaults: &HashMap<String, String>,
    call: Option<HashMap<String, String>>,
) -> HashMap<String, String> {
    let mut merged = defaults.clone();
    if let Some(call) = call {
        merged.extend(call);
    }
    merged
}

/// Truncate to at most `max_len` bytes, respecting char boundaries
///
/// Adds "... (truncated)" suffix when truncation occurs.
pub fn truncate_body(body: &str, max_len: usize) -> String {
    if body.len() <= max_len {
        return body.to_string();
    }
    let mut end = max_len;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}

/// Extract real IP address from request, handling proxies
///
/// Checks headers in this order:
/// 1. X-Real-IP (set by nginx)
/// 2. X-Forwarded-For (standard proxy header, takes first IP)
/// 3. Falls back to connection peer address
pub fn extract_ip(headers: &HashMap<String, String>, peer_addr: Option<&str>) -> Option<String> {
    if let Some(ip) = headers.get("x-real-ip") {
        return Some(ip.clone());
    }

    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Some(ip) = forwarded.split(',').next() {
            return Some(ip.trim().to_string());
        }
    }

    peer_addr.map(|s| s.to_string())
}

/// Text carried by a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Parse a boolean flag the way environment switches are usually written
pub fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_generate_event_id() {
        let id1 = generate_event_id();
        let id2 = generate_event_id();

        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 32);
        assert!(id1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_format_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 5).unwrap();
        assert_eq!(format_timestamp(at), "2024-01-15T10:30:05");
        assert_eq!(current_timestamp().len(), 19);
    }

    #[test]
    fn test_merge_tags_call_wins() {
        let defaults = tags(&[("a", "1")]);
        let merged = merge_tags(&defaults, Some(tags(&[("a", "2"), ("b", "3")])));
        assert_eq!(merged, tags(&[("a", "2"), ("b", "3")]));
    }

    #[test]
    fn test_merge_tags_without_call_tags() {
        let defaults = tags(&[("env", "prod")]);
        assert_eq!(merge_tags(&defaults, None), defaults);
    }

    #[test]
    fn test_truncate_body_short() {
        assert_eq!(truncate_body("Hello, World!", 100), "Hello, World!");
    }

    #[test]
    fn test_truncate_body_long() {
        let body = "A".repeat(1000);
        let result = truncate_body(&body, 50);

        assert_eq!(result.len(), 50 + "... (truncated)".len());
        assert!(result.ends_with("... (truncated)"));
    }

    #[test]
    fn test_truncate_body_multibyte_boundary() {
        let result = truncate_body("ééé", 3);
        assert_eq!(result, "é... (truncated)");
    }

    #[test]
    fn test_extract_ip_from_x_real_ip() {
        let headers = tags(&[("x-real-ip", "192.168.1.100")]);
        let ip = extract_ip(&headers, Some("10.0.0.1"));
        assert_eq!(ip, Some("192.168.1.100".to_string()));
    }

    #[test]
    fn test_extract_ip_from_x_forwarded_for() {
        let headers = tags(&[("x-forwarded-for", "192.168.1.100, 10.0.0.1")]);
        let ip = extract_ip(&headers, Some("127.0.0.1"));
        assert_eq!(ip, Some("192.168.1.100".to_string()));
    }

    #[test]
    fn test_extract_ip_fallback_to_peer() {
        let ip = extract_ip(&HashMap::new(), Some("203.0.113.1"));
        assert_eq!(ip, Some("203.0.113.1".to_string()));
        assert_eq!(extract_ip(&HashMap::new(), None), None);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("YES"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("off"));
    }
}
