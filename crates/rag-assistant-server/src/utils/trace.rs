use axum::http::HeaderMap;
use uuid::Uuid;

pub const TRACE_HEADER: &str = "x-trace-id";
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Trace id from the incoming header, or a fresh UUID when absent
pub fn resolve_trace_id(headers: &HeaderMap) -> String {
    headers
        .get(TRACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(new_trace_id)
}

pub fn new_trace_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn or_new_trace_id(trace_id: Option<&str>) -> String {
    trace_id
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(new_trace_id)
}

/// Tenant routing header on internal interfaces
pub fn resolve_tenant(headers: &HeaderMap) -> Option<String> {
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn header_wins_over_fresh_uuid() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACE_HEADER, HeaderValue::from_static("trace-abc"));
        assert_eq!(resolve_trace_id(&headers), "trace-abc");
    }

    #[test]
    fn fresh_uuid_when_missing() {
        let headers = HeaderMap::new();
        let id = resolve_trace_id(&headers);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn blank_explicit_id_is_replaced() {
        let id = or_new_trace_id(Some("  "));
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(or_new_trace_id(Some("t-1")), "t-1");
    }
}
