use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

use url::Url;

use crate::error::ConfigError;

/// How TLS certificate verification should be handled for outbound requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsVerify {
    On,
    Off,
    CaBundle(PathBuf),
}

impl TlsVerify {
    fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();
        match lower.as_str() {
            "" | "1" | "true" | "yes" | "on" => TlsVerify::On,
            "0" | "false" | "no" | "off" => TlsVerify::Off,
            _ => TlsVerify::CaBundle(PathBuf::from(shellexpand_home(trimmed))),
        }
    }
}

fn shellexpand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    path.to_string()
}

/// DNS resolution mode used when computing an in-cluster app URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsMode {
    Short,
    Fqdn,
}

/// Settings that drive the shiny/shiny-proxy in-cluster URL resolver (C7).
#[derive(Debug, Clone)]
pub struct AppUrlConfig {
    pub dns_mode: DnsMode,
    pub dns_suffix: Option<String>,
    pub port: u16,
    pub scheme: String,
    pub shinyproxy_service_suffix: String,
    pub shinyproxy_path_prefix: String,
}

impl Default for AppUrlConfig {
    fn default() -> Self {
        Self {
            dns_mode: DnsMode::Short,
            dns_suffix: None,
            port: 80,
            scheme: "http".to_string(),
            shinyproxy_service_suffix: "shinyproxyapp".to_string(),
            shinyproxy_path_prefix: "/app".to_string(),
        }
    }
}

/// Settings that gate the adaptive availability probe in the egress queue (C4/C2).
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Lowercased statuses for which probing applies. Empty means probing is disabled.
    pub statuses: HashSet<String>,
    /// Lowercased app types for which probing applies.
    pub apps: HashSet<String>,
    pub nxdomain_confirm: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            statuses: ["running", "deleted"].iter().map(|s| s.to_string()).collect(),
            apps: ["shiny", "shiny-proxy"].iter().map(|s| s.to_string()).collect(),
            nxdomain_confirm: 2,
        }
    }
}

impl ProbeConfig {
    pub fn enabled(&self) -> bool {
        !self.statuses.is_empty()
    }

    fn parse_csv_set(raw: &str) -> HashSet<String> {
        raw.split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Immutable, process-wide configuration captured once at startup.
///
/// Per the "hidden global state" design note, nothing downstream re-reads
/// the environment once this struct has been constructed (diagnostics mode
/// is the sole exception, and it re-derives a fresh copy for display).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub namespace: String,
    pub label_selector: String,
    pub kubeconfig: Option<PathBuf>,
    pub base_url: String,
    pub token_api_endpoint: String,
    pub app_status_api_endpoint: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub debug: bool,
    pub tls_verify: TlsVerify,
    pub app_url: AppUrlConfig,
    pub probe: ProbeConfig,
}

impl AppConfig {
    /// Build configuration from the process environment plus the two CLI-owned
    /// values (namespace, label selector) that are not environment variables.
    pub fn from_env(namespace: String, label_selector: String) -> Result<Self, ConfigError> {
        let base_url = validate_base_url(env::var("BASE_URL").ok().as_deref())?;

        let token_api_endpoint = env::var("TOKEN_API_ENDPOINT")
            .unwrap_or_else(|_| format!("{base_url}/api/v1/token-auth/"));
        let app_status_api_endpoint = env::var("APP_STATUS_API_ENDPOINT")
            .unwrap_or_else(|_| format!("{base_url}/api/v1/app-status/"));

        let kubeconfig = env::var("KUBECONFIG").ok().and_then(|p| {
            let path = PathBuf::from(p);
            path.metadata().is_ok().then_some(path)
        });

        let debug = is_truthy(&env::var("DEBUG").unwrap_or_default());

        let tls_verify = TlsVerify::parse(&env::var("TLS_SSL_VERIFICATION").unwrap_or_default());

        let dns_mode = match env::var("APP_URL_DNS_MODE")
            .unwrap_or_else(|_| "short".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "fqdn" => DnsMode::Fqdn,
            _ => DnsMode::Short,
        };

        let app_url_port = match env::var("APP_URL_PORT").ok() {
            None => 80,
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                var: "APP_URL_PORT",
                value: raw,
            })?,
        };

        let app_url = AppUrlConfig {
            dns_mode,
            dns_suffix: env::var("APP_URL_DNS_SUFFIX").ok(),
            port: app_url_port,
            scheme: env::var("APP_URL_SCHEME").unwrap_or_else(|_| "http".to_string()),
            shinyproxy_service_suffix: env::var("SHINYPROXY_SERVICE_SUFFIX")
                .unwrap_or_else(|_| "shinyproxyapp".to_string()),
            shinyproxy_path_prefix: env::var("SHINYPROXY_PATH_PREFIX")
                .unwrap_or_else(|_| "/app".to_string()),
        };

        let probe_statuses_raw = env::var("APP_PROBE_STATUSES").unwrap_or_default();
        let statuses = if matches!(
            probe_statuses_raw.trim().to_ascii_lowercase().as_str(),
            "" | "none" | "off"
        ) {
            HashSet::new()
        } else {
            ProbeConfig::parse_csv_set(&probe_statuses_raw)
        };

        let apps_raw = env::var("APP_PROBE_APPS").unwrap_or_else(|_| "shiny,shiny-proxy".to_string());
        let apps = ProbeConfig::parse_csv_set(&apps_raw);

        let nxdomain_confirm = match env::var("APP_PROBE_NXDOMAIN_CONFIRM").ok() {
            None => 2,
            Some(raw) => {
                let parsed = raw.parse::<u32>().ok().filter(|v| *v >= 1);
                parsed.ok_or_else(|| ConfigError::InvalidValue {
                    var: "APP_PROBE_NXDOMAIN_CONFIRM",
                    value: raw,
                })?
            }
        };

        Ok(Self {
            namespace,
            label_selector,
            kubeconfig,
            base_url,
            token_api_endpoint,
            app_status_api_endpoint,
            username: env::var("USERNAME").ok(),
            password: env::var("PASSWORD").ok(),
            debug,
            tls_verify,
            app_url,
            probe: ProbeConfig {
                statuses,
                apps,
                nxdomain_confirm,
            },
        })
    }

    pub fn ping_endpoint(&self) -> String {
        format!("{}/openapi/v1/are-you-there", self.base_url)
    }
}

/// Validates `BASE_URL`: required, and must parse as a URL (spec §7's
/// `ConfigError` taxonomy entry — "invalid env" is fatal at startup rather
/// than silently producing an unusable endpoint). The trailing slash is
/// stripped so endpoint derivation never doubles one up. Takes the raw env
/// value as a parameter so it is testable without touching process state.
fn validate_base_url(raw: Option<&str>) -> Result<String, ConfigError> {
    let raw = raw.ok_or(ConfigError::MissingVar("BASE_URL"))?;
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::MissingVar("BASE_URL"));
    }
    Url::parse(trimmed).map_err(|source| ConfigError::InvalidUrl {
        var: "BASE_URL",
        source,
    })?;
    Ok(trimmed.to_string())
}

fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
