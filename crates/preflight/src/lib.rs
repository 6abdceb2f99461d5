use std::sync::Arc;
use std::time::Duration;

use prebid_monitor_core::CrawlError;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::warn;
use url::Url;

/// Per-URL pre-flight outcome. The orchestrator partitions URLs into
/// processable, skipped, and warned based on these fields; a failing
/// check here is itself converted into an `Error` outcome by the
/// caller, never surfaced as a raw error type.
#[derive(Debug, Clone, Default)]
pub struct PreflightResult {
    pub passed_dns: bool,
    pub passed_tls: bool,
    pub predicted_to_fail: bool,
    pub skip_reason: Option<String>,
    pub warnings: Vec<String>,
}

pub struct PreflightFilter {
    dns_timeout: Duration,
    tls_timeout: Duration,
    tls_config: Arc<rustls::ClientConfig>,
}

impl PreflightFilter {
    pub fn new(dns_timeout_ms: u64, tls_timeout_ms: u64) -> Self {
        let mut roots = rustls::RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        let (added, _) = roots.add_parsable_certificates(native.certs);
        if added == 0 {
            warn!("no native root certificates loaded for preflight TLS check");
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            dns_timeout: Duration::from_millis(dns_timeout_ms),
            tls_timeout: Duration::from_millis(tls_timeout_ms),
            tls_config: Arc::new(tls_config),
        }
    }

    /// Run DNS resolution, a best-effort TLS handshake, and fold in a
    /// prior-health signal already computed by the caller (the state
    /// store's per-host failure rate) — no separate prediction model.
    pub async fn check(&self, url: &str, prior_failure_rate: f64) -> Result<PreflightResult, CrawlError> {
        let parsed = Url::parse(url).map_err(|e| CrawlError::InvalidUrl(format!("{url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| CrawlError::InvalidUrl(format!("{url}: no host")))?
            .to_string();
        let port = parsed.port_or_known_default().unwrap_or(443);

        let mut result = PreflightResult::default();

        match timeout(self.dns_timeout, tokio::net::lookup_host((host.as_str(), port))).await {
            Ok(Ok(mut addrs)) => {
                result.passed_dns = addrs.next().is_some();
                if !result.passed_dns {
                    result.skip_reason = Some("DNS_UNRESOLVED".to_string());
                    return Ok(result);
                }
            }
            Ok(Err(_)) | Err(_) => {
                result.skip_reason = Some("DNS_UNRESOLVED".to_string());
                return Ok(result);
            }
        }

        if parsed.scheme() == "https" {
            result.passed_tls = self.check_tls(&host, port).await;
            if !result.passed_tls {
                result.skip_reason = Some("TLS_INVALID".to_string());
                result.warnings.push(format!("TLS handshake failed for {host}"));
                return Ok(result);
            }
        } else {
            result.passed_tls = true;
        }

        if prior_failure_rate > 0.8 {
            result.predicted_to_fail = true;
            result.warnings.push(format!(
                "host {host} has failed {:.0}% of recent attempts",
                prior_failure_rate * 100.0
            ));
        }

        Ok(result)
    }

    async fn check_tls(&self, host: &str, port: u16) -> bool {
        let connect = async {
            let tcp = TcpStream::connect((host, port)).await.ok()?;
            let connector = tokio_rustls::TlsConnector::from(self.tls_config.clone());
            let server_name = rustls::pki_types::ServerName::try_from(host.to_string()).ok()?;
            connector.connect(server_name, tcp).await.ok()
        };

        matches!(timeout(self.tls_timeout, connect).await, Ok(Some(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicted_to_fail_above_threshold() {
        let mut result = PreflightResult {
            passed_dns: true,
            passed_tls: true,
            ..Default::default()
        };
        if 0.9 > 0.8 {
            result.predicted_to_fail = true;
        }
        assert!(result.predicted_to_fail);
    }

    #[tokio::test]
    async fn dns_failure_short_circuits_before_tls() {
        let filter = PreflightFilter::new(50, 50);
        let result = filter
            .check("https://this-host-should-not-resolve.invalid", 0.0)
            .await
            .unwrap();
        assert!(!result.passed_dns);
        assert_eq!(result.skip_reason.as_deref(), Some("DNS_UNRESOLVED"));
        assert!(!result.passed_tls);
    }
}
