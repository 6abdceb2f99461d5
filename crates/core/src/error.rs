use thiserror::Error;

/// Closed error taxonomy. Every variant carries or maps to a short token
/// (see `ErrorCode`) that is what actually gets persisted and compared —
/// the `Display` text is for logs only.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("source unreadable: {0}")]
    SourceUnreadable(String),

    #[error("range out of bounds: start {start} > total {total}")]
    RangeOutOfBounds { start: usize, total: usize },

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// The closed set of short tokens used everywhere a classified failure is
/// recorded: persisted in `UrlRecord::error_code`, written to artifact
/// classification files, and matched against in tests. Never construct an
/// error-code string literal outside this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    DnsUnresolved,
    ConnectionRefused,
    ConnectionReset,
    Timeout,
    TlsInvalid,
    TlsExpired,
    Http(u16),
    BrowserPageError,
    NavigationAborted,
    PageClosed,
    ProbeTimeout,
    ProbeEvalError,
    Cancelled,
    ProcessingError,
}

impl ErrorCode {
    pub fn as_token(&self) -> String {
        match self {
            ErrorCode::DnsUnresolved => "DNS_UNRESOLVED".to_string(),
            ErrorCode::ConnectionRefused => "CONNECTION_REFUSED".to_string(),
            ErrorCode::ConnectionReset => "CONNECTION_RESET".to_string(),
            ErrorCode::Timeout => "TIMEOUT".to_string(),
            ErrorCode::TlsInvalid => "TLS_INVALID".to_string(),
            ErrorCode::TlsExpired => "TLS_EXPIRED".to_string(),
            ErrorCode::Http(status) => format!("HTTP_{status}"),
            ErrorCode::BrowserPageError => "BROWSER_PAGE_ERROR".to_string(),
            ErrorCode::NavigationAborted => "NAVIGATION_ABORTED".to_string(),
            ErrorCode::PageClosed => "PAGE_CLOSED".to_string(),
            ErrorCode::ProbeTimeout => "PROBE_TIMEOUT".to_string(),
            ErrorCode::ProbeEvalError => "PROBE_EVAL_ERROR".to_string(),
            ErrorCode::Cancelled => "CANCELLED".to_string(),
            ErrorCode::ProcessingError => "PROCESSING_ERROR".to_string(),
        }
    }

    /// Parse a persisted token back into a code, for codes we recognize.
    /// Unknown or `HTTP_<status>` tokens not matching a known shape fall
    /// back to `ProcessingError`.
    pub fn from_token(token: &str) -> Self {
        match token {
            "DNS_UNRESOLVED" => ErrorCode::DnsUnresolved,
            "CONNECTION_REFUSED" => ErrorCode::ConnectionRefused,
            "CONNECTION_RESET" => ErrorCode::ConnectionReset,
            "TIMEOUT" => ErrorCode::Timeout,
            "TLS_INVALID" => ErrorCode::TlsInvalid,
            "TLS_EXPIRED" => ErrorCode::TlsExpired,
            "BROWSER_PAGE_ERROR" => ErrorCode::BrowserPageError,
            "NAVIGATION_ABORTED" => ErrorCode::NavigationAborted,
            "PAGE_CLOSED" => ErrorCode::PageClosed,
            "PROBE_TIMEOUT" => ErrorCode::ProbeTimeout,
            "PROBE_EVAL_ERROR" => ErrorCode::ProbeEvalError,
            "CANCELLED" => ErrorCode::Cancelled,
            other => {
                if let Some(status) = other.strip_prefix("HTTP_").and_then(|s| s.parse().ok()) {
                    ErrorCode::Http(status)
                } else {
                    ErrorCode::ProcessingError
                }
            }
        }
    }

    /// Whether this code consumes a retry attempt (`Transient`) or is
    /// treated as final (`Permanent`). See spec §7.
    pub fn transience(&self) -> Transience {
        match self {
            ErrorCode::DnsUnresolved => Transience::Permanent,
            ErrorCode::TlsExpired => Transience::Permanent,
            ErrorCode::Http(status) => match status {
                408 | 429 => Transience::Transient,
                400..=499 => Transience::Permanent,
                _ => Transience::Transient,
            },
            ErrorCode::Cancelled => Transience::Permanent,
            _ => Transience::Transient,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transience {
    Transient,
    Permanent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_is_permanent() {
        assert_eq!(ErrorCode::DnsUnresolved.transience(), Transience::Permanent);
    }

    #[test]
    fn timeout_is_transient() {
        assert_eq!(ErrorCode::Timeout.transience(), Transience::Transient);
    }

    #[test]
    fn http_404_is_permanent_but_429_is_transient() {
        assert_eq!(ErrorCode::Http(404).transience(), Transience::Permanent);
        assert_eq!(ErrorCode::Http(429).transience(), Transience::Transient);
        assert_eq!(ErrorCode::Http(408).transience(), Transience::Transient);
        assert_eq!(ErrorCode::Http(500).transience(), Transience::Transient);
    }

    #[test]
    fn token_roundtrip() {
        for code in [
            ErrorCode::DnsUnresolved,
            ErrorCode::ConnectionRefused,
            ErrorCode::Timeout,
            ErrorCode::TlsInvalid,
            ErrorCode::BrowserPageError,
            ErrorCode::Cancelled,
        ] {
            let token = code.as_token();
            assert_eq!(ErrorCode::from_token(&token).as_token(), token);
        }
        assert_eq!(ErrorCode::from_token("HTTP_404").as_token(), "HTTP_404");
        assert_eq!(
            ErrorCode::from_token("something_unknown").as_token(),
            "PROCESSING_ERROR"
        );
    }
}
