use std::time::Duration;

use statuswatch_commons::TlsVerify;
use url::Url;

use crate::http_client::HttpClient;
use crate::models::ProbeStatus;

/// Outcome of one availability probe (spec §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub status: ProbeStatus,
    pub http_code: Option<u16>,
    pub note: String,
}

/// Curl-like availability check using only a port-80 URL, classifying
/// responses the way `probing.py::AppAvailabilityProbe` does:
///
/// - `NotFound`: DNS cannot resolve the host
/// - `Running`: HTTP status 2xx or 3xx
/// - `Unknown`: DNS resolves but no 2xx/3xx (refused, timeout, 4xx/5xx)
pub struct AppAvailabilityProbe {
    client: HttpClient,
}

impl AppAvailabilityProbe {
    /// Defaults match spec §4.2: a 0.5s/1.5s connect/read timeout pair and a
    /// single 0.2s backoff step, deliberately tighter than the general
    /// purpose [`HttpClient`] defaults since a probe must be cheap.
    pub fn new() -> Result<Self, crate::error::CoreError> {
        Self::with_config(
            Duration::from_millis(500),
            Duration::from_millis(1500),
            &TlsVerify::On,
        )
    }

    /// Used by `--mode=probetest` to apply CLI-supplied timeouts and the
    /// `--probe-insecure` TLS override.
    pub fn with_config(
        connect_timeout: Duration, read_timeout: Duration, tls_verify: &TlsVerify,
    ) -> Result<Self, crate::error::CoreError> {
        let client = HttpClient::with_tls_verify(
            connect_timeout,
            read_timeout,
            vec![Duration::from_millis(200)],
            tls_verify,
        )?;
        Ok(Self { client })
    }

    async fn dns_resolves(url: &str) -> bool {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));
        let Some(host) = host else {
            return false;
        };
        let port = Url::parse(url)
            .ok()
            .and_then(|u| u.port_or_known_default())
            .unwrap_or(80);
        tokio::net::lookup_host((host.as_str(), port)).await.is_ok()
    }

    pub async fn probe_url(&self, port80_url: &str) -> ProbeResult {
        let host = Url::parse(port80_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));

        let Some(_host) = host else {
            tracing::debug!(url = port80_url, "skipping probe, no host in url");
            return ProbeResult {
                status: ProbeStatus::NotFound,
                http_code: None,
                note: "no host".to_string(),
            };
        };

        if !Self::dns_resolves(port80_url).await {
            tracing::debug!(url = port80_url, "skipping probe, DNS resolution failed");
            return ProbeResult {
                status: ProbeStatus::NotFound,
                http_code: None,
                note: "DNS resolution failed".to_string(),
            };
        }

        tracing::debug!(url = port80_url, "probing url");
        let mut token = None;
        let resp = self
            .client
            .get(port80_url, None, &mut token, None)
            .await;

        let code = resp.as_ref().map(|r| r.status().as_u16());

        if let Some(c) = code {
            if (200..400).contains(&c) {
                return ProbeResult {
                    status: ProbeStatus::Running,
                    http_code: Some(c),
                    note: "HTTP 2xx/3xx".to_string(),
                };
            }
        }

        ProbeResult {
            status: ProbeStatus::Unknown,
            http_code: code,
            note: "DNS ok; no 2xx/3xx (refused/timeout/4xx/5xx)".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dns_fails_for_invalid_tld() {
        let resolves =
            AppAvailabilityProbe::dns_resolves("http://definitely-not-a-real-host.invalid")
                .await;
        assert!(!resolves);
    }

    #[tokio::test]
    async fn malformed_url_is_not_found() {
        let probe = AppAvailabilityProbe::new().unwrap();
        let result = probe.probe_url("not a url").await;
        assert_eq!(result.status, ProbeStatus::NotFound);
        assert_eq!(result.note, "no host");
    }

    #[tokio::test]
    async fn unresolvable_host_reports_dns_note() {
        let probe = AppAvailabilityProbe::new().unwrap();
        let result = probe
            .probe_url("http://definitely-not-a-real-host.invalid")
            .await;
        assert_eq!(result.status, ProbeStatus::NotFound);
        assert_eq!(result.note, "DNS resolution failed");
    }
}
