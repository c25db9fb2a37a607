use statuswatch_commons::{
    AppUrlConfig,
    DnsMode,
};

use crate::models::{
    AppType,
    StatusRecord,
};

/// Builds the service DNS name according to the configured DNS mode
/// (spec §4.6), mirroring `app_urls.py::_host_for`.
fn host_for(config: &AppUrlConfig, service: &str, namespace: &str) -> String {
    match config.dns_mode {
        DnsMode::Fqdn => format!("{service}.{namespace}.svc.cluster.local"),
        DnsMode::Short => match &config.dns_suffix {
            Some(suffix) if !suffix.is_empty() => format!("{service}.{namespace}.{suffix}"),
            _ => format!("{service}.{namespace}"),
        },
    }
}

/// Returns a cluster-internal HTTP URL for the given record, or `None` if
/// the app type is unsupported or required fields are missing (spec §4.6).
/// Only `shiny-proxy` releases currently resolve to a URL; `shiny` pods are
/// addressed through a ShinyProxy frontend and have no URL of their own.
pub fn resolve(
    config: &AppUrlConfig, record: &StatusRecord, fallback_namespace: Option<&str>,
) -> Option<String> {
    if record.app_type != AppType::ShinyProxy {
        return None;
    }
    if record.release.is_empty() {
        return None;
    }

    let namespace = record
        .namespace
        .as_deref()
        .filter(|n| !n.is_empty())
        .or(fallback_namespace)
        .unwrap_or("default");

    let service = format!(
        "{}-{}",
        record.release, config.shinyproxy_service_suffix
    );
    let host = host_for(config, &service, namespace);
    let path_prefix = config.shinyproxy_path_prefix.trim_end_matches('/');
    let path = format!("{path_prefix}/{}/", record.release);

    Some(format!(
        "{}://{}:{}{}",
        config.scheme, host, config.port, path
    ))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use statuswatch_commons::AppUrlConfig;

    use super::*;

    fn record(app_type: AppType, release: &str, namespace: Option<&str>) -> StatusRecord {
        StatusRecord {
            release: release.to_string(),
            status: crate::models::Status::new("Running"),
            event_ts: Utc::now(),
            creation_ts: Utc::now(),
            deletion_ts: None,
            pod_msg: String::new(),
            container_msg: String::new(),
            app_type,
            app_url: None,
            namespace: namespace.map(str::to_string),
            pod_name: None,
            probe: None,
            probe_deadline_epoch: None,
            probe_next_epoch: None,
            nx_consecutive: 0,
        }
    }

    #[test]
    fn shiny_proxy_resolves_short_dns_by_default() {
        let config = AppUrlConfig::default();
        let rec = record(AppType::ShinyProxy, "myrelease", Some("myns"));
        let url = resolve(&config, &rec, None).unwrap();
        assert_eq!(
            url,
            "http://myrelease-shinyproxyapp.myns:80/app/myrelease/"
        );
    }

    #[test]
    fn fqdn_mode_builds_cluster_local_host() {
        let mut config = AppUrlConfig::default();
        config.dns_mode = DnsMode::Fqdn;
        let rec = record(AppType::ShinyProxy, "myrelease", Some("myns"));
        let url = resolve(&config, &rec, None).unwrap();
        assert_eq!(
            url,
            "http://myrelease-shinyproxyapp.myns.svc.cluster.local:80/app/myrelease/"
        );
    }

    #[test]
    fn shiny_app_type_has_no_url() {
        let config = AppUrlConfig::default();
        let rec = record(AppType::Shiny, "myrelease", Some("myns"));
        assert!(resolve(&config, &rec, None).is_none());
    }

    #[test]
    fn missing_namespace_falls_back_to_default() {
        let config = AppUrlConfig::default();
        let rec = record(AppType::ShinyProxy, "myrelease", None);
        let url = resolve(&config, &rec, None).unwrap();
        assert!(url.contains("myrelease-shinyproxyapp.default"));
    }
}
