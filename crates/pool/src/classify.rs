//! Single table mapping a low-level navigation/browser cause to the
//! closed error taxonomy. One function handles every cause since this
//! system drives exactly one browser backend.

use prebid_monitor_core::{ErrorCode, Transience};

/// The underlying cause of a failed navigation, as distinguished from the
/// raw CDP/browser error text. Kept separate from `ErrorCode` because a
/// cause is derived from free-form strings and an `ErrorCode` is the
/// closed, persisted token.
#[derive(Debug, Clone)]
pub enum NavigationCause {
    Dns,
    ConnectionRefused,
    ConnectionReset,
    TlsInvalid,
    TlsExpired,
    Http(u16),
    Timeout,
    Aborted,
    Other(String),
}

/// Classify a raw error string surfaced by the browser/navigation layer
/// into a `NavigationCause`. Matching is substring-based and
/// case-insensitive.
pub fn classify_navigation_error(raw: &str) -> NavigationCause {
    let lower = raw.to_lowercase();

    if lower.contains("err_name_not_resolved") || lower.contains("name not resolved") || lower.contains("dns") {
        return NavigationCause::Dns;
    }
    if lower.contains("err_connection_refused") || lower.contains("connection refused") {
        return NavigationCause::ConnectionRefused;
    }
    if lower.contains("err_connection_reset") || lower.contains("connection reset") {
        return NavigationCause::ConnectionReset;
    }
    if lower.contains("err_cert_date_invalid") || lower.contains("cert_expired") || lower.contains("certificate has expired") {
        return NavigationCause::TlsExpired;
    }
    if lower.contains("err_cert") || lower.contains("ssl") || lower.contains("tls") {
        return NavigationCause::TlsInvalid;
    }
    if lower.contains("err_timed_out") || lower.contains("timeout") || lower.contains("timed out") {
        return NavigationCause::Timeout;
    }
    if lower.contains("err_aborted") || lower.contains("aborted") {
        return NavigationCause::Aborted;
    }
    if let Some(status) = extract_http_status(&lower) {
        return NavigationCause::Http(status);
    }

    NavigationCause::Other(raw.to_string())
}

fn extract_http_status(lower: &str) -> Option<u16> {
    let idx = lower.find("http ").map(|i| i + "http ".len())?;
    lower[idx..].chars().take_while(|c| c.is_ascii_digit()).collect::<String>().parse().ok()
}

/// Map a cause to the persisted token and its transience. Unknown causes
/// fall back to `PROCESSING_ERROR` (transient).
pub fn classify(cause: &NavigationCause) -> (String, Transience) {
    let code = match cause {
        NavigationCause::Dns => ErrorCode::DnsUnresolved,
        NavigationCause::ConnectionRefused => ErrorCode::ConnectionRefused,
        NavigationCause::ConnectionReset => ErrorCode::ConnectionReset,
        NavigationCause::TlsInvalid => ErrorCode::TlsInvalid,
        NavigationCause::TlsExpired => ErrorCode::TlsExpired,
        NavigationCause::Http(status) => ErrorCode::Http(*status),
        NavigationCause::Timeout => ErrorCode::Timeout,
        NavigationCause::Aborted => ErrorCode::NavigationAborted,
        NavigationCause::Other(_) => ErrorCode::ProcessingError,
    };
    (code.as_token(), code.transience())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_cause_maps_to_permanent_token() {
        let cause = classify_navigation_error("net::ERR_NAME_NOT_RESOLVED");
        let (token, transience) = classify(&cause);
        assert_eq!(token, "DNS_UNRESOLVED");
        assert_eq!(transience, Transience::Permanent);
    }

    #[test]
    fn http_status_is_extracted_from_cause_text() {
        let cause = classify_navigation_error("navigation failed with HTTP 404 response");
        match cause {
            NavigationCause::Http(404) => {}
            other => panic!("expected Http(404), got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_cause_falls_back_to_processing_error() {
        let cause = classify_navigation_error("some bespoke browser hiccup");
        let (token, transience) = classify(&cause);
        assert_eq!(token, "PROCESSING_ERROR");
        assert_eq!(transience, Transience::Transient);
    }
}
