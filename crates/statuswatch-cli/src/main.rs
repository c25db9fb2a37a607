mod cli;

use clap::Parser;
use statuswatch_commons::AppConfig;
use statuswatch_core::Coordinator;
use tokio_util::sync::CancellationToken;

use crate::cli::{
    Cli,
    Mode,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(msg) = cli.validate() {
        eprintln!("error: {msg}");
        std::process::exit(2);
    }

    let config = match AppConfig::from_env(cli.namespace.clone(), cli.label_selector.clone()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    let log_level = if config.debug { "debug" } else { cli.log_level.as_str() };
    statuswatch_commons::logging::init(log_level);

    match cli.mode {
        Mode::Diagnostics => {
            print_diagnostics(&config);
        }
        Mode::Probetest => {
            let code = run_probetest(&cli).await;
            std::process::exit(code);
        }
        Mode::Normal => {
            run_normal(config).await;
        }
    }
}

/// Prints the effective configuration and exits 0 (spec §6's diagnostics
/// mode). Re-derives directly from `config` rather than re-reading the
/// environment, since the ambient-config design note only exempts
/// diagnostics from the "capture once" rule at the point of initial read.
fn print_diagnostics(config: &AppConfig) {
    println!("namespace: {}", config.namespace);
    println!("label_selector: {}", config.label_selector);
    println!(
        "kubeconfig: {}",
        config
            .kubeconfig
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<in-cluster>".to_string())
    );
    println!("base_url: {}", config.base_url);
    println!("token_api_endpoint: {}", config.token_api_endpoint);
    println!("app_status_api_endpoint: {}", config.app_status_api_endpoint);
    println!("ping_endpoint: {}", config.ping_endpoint());
    println!("debug: {}", config.debug);
    println!("tls_verify: {:?}", config.tls_verify);
    println!("app_url.dns_mode: {:?}", config.app_url.dns_mode);
    println!("app_url.dns_suffix: {:?}", config.app_url.dns_suffix);
    println!("app_url.port: {}", config.app_url.port);
    println!("app_url.scheme: {}", config.app_url.scheme);
    println!(
        "app_url.shinyproxy_service_suffix: {}",
        config.app_url.shinyproxy_service_suffix
    );
    println!(
        "app_url.shinyproxy_path_prefix: {}",
        config.app_url.shinyproxy_path_prefix
    );
    println!("probe.enabled: {}", config.probe.enabled());
    println!("probe.statuses: {:?}", config.probe.statuses);
    println!("probe.apps: {:?}", config.probe.apps);
    println!("probe.nxdomain_confirm: {}", config.probe.nxdomain_confirm);
}

/// Runs a single availability probe and maps the result onto the exit codes
/// spec §6 reserves for `--mode=probetest`: 0 Running, 3 NotFound, 4
/// Unknown/other.
async fn run_probetest(cli: &Cli) -> i32 {
    use statuswatch_commons::TlsVerify;
    use statuswatch_core::models::ProbeStatus;
    use std::time::Duration;

    let url = cli.probe_url.as_deref().expect("validated by Cli::validate");
    let tls_verify = if cli.probe_insecure {
        TlsVerify::Off
    } else {
        TlsVerify::On
    };

    let prober = match statuswatch_core::prober::AppAvailabilityProbe::with_config(
        Duration::from_secs_f64(cli.probe_connect_timeout),
        Duration::from_secs_f64(cli.probe_read_timeout),
        &tls_verify,
    ) {
        Ok(p) => p,
        Err(err) => {
            eprintln!("failed to build prober: {err}");
            return 4;
        }
    };

    let result = prober.probe_url(url).await;
    println!(
        "{}",
        serde_json::json!({
            "status": format!("{:?}", result.status),
            "http_code": result.http_code,
            "note": result.note,
            "url": url,
        })
    );

    match result.status {
        ProbeStatus::Running => 0,
        ProbeStatus::NotFound => 3,
        ProbeStatus::Unknown => 4,
    }
}

/// Runs the sidecar pipeline until a signal is received or setup/the watch
/// loop hits a fatal error.
async fn run_normal(config: AppConfig) {
    let cancel = CancellationToken::new();
    let coordinator = Coordinator::new(config);

    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received");
        shutdown_cancel.cancel();
    });

    if let Err(err) = coordinator.run(cancel).await {
        tracing::error!(error = %err, "fatal error, exiting");
        std::process::exit(1);
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{
        signal,
        SignalKind,
    };

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
