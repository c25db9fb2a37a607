use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::Api;
use statuswatch_commons::AppConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::http_client::{
    HttpClient,
    TokenFetcher,
};
use crate::models::StatusRecord;
use crate::prober::AppAvailabilityProbe;
use crate::queue::EgressQueue;
use crate::reducer::{
    Reducer,
    RemainingPods,
};
use crate::watch::{
    PodEvent,
    WatchLoop,
};

/// Fetches an auth token from `token_api_endpoint` using the configured
/// username/password, mirroring `event_listener.py::EventListener.fetch_token`.
struct CredentialTokenFetcher {
    http: HttpClient,
    endpoint: String,
    username: String,
    password: String,
}

impl CredentialTokenFetcher {
    fn new(config: &AppConfig) -> Result<Self, CoreError> {
        let username = config
            .username
            .clone()
            .ok_or_else(|| CoreError::Auth("USERNAME is not set".to_string()))?;
        let password = config
            .password
            .clone()
            .ok_or_else(|| CoreError::Auth("PASSWORD is not set".to_string()))?;
        let http = HttpClient::with_tls_verify(
            Duration::from_millis(3050),
            Duration::from_secs(20),
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)],
            &config.tls_verify,
        )?;
        Ok(Self {
            http,
            endpoint: config.token_api_endpoint.clone(),
            username,
            password,
        })
    }
}

#[async_trait]
impl TokenFetcher for CredentialTokenFetcher {
    async fn fetch(&self) -> Result<String, CoreError> {
        let body = serde_json::json!({
            "username": self.username,
            "password": self.password,
        });
        let mut unused_token = None;
        let response = self
            .http
            .post(&self.endpoint, &body, None, &mut unused_token, None)
            .await
            .ok_or_else(|| CoreError::Auth("token endpoint did not respond".to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::Other(anyhow::anyhow!(e)))?;
        body.get("token")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                CoreError::Auth("no token was fetched - are the credentials correct?".to_string())
            })
    }
}

/// Top-level wiring (C6): ping check, Kubernetes client bootstrap, token
/// fetch, and the watch loop / reducer / egress queue pipeline, mirroring
/// `event_listener.py::EventListener.setup` + `.listen`.
pub struct Coordinator {
    config: AppConfig,
}

impl Coordinator {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Runs the full pipeline until `cancel` fires or a fatal watch error
    /// is hit. Mirrors the setup-then-listen sequence of the original
    /// implementation, but setup failures are returned rather than logged
    /// and swallowed.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), CoreError> {
        tracing::info!("running setup process");
        self.ping().await?;

        let client = self.build_kube_client().await?;

        let token_fetcher = CredentialTokenFetcher::new(&self.config)?;
        token_fetcher.fetch().await?;
        tracing::info!("token fetched successfully");

        tracing::info!("initializing event stream");

        let (pod_tx, pod_rx) = mpsc::unbounded_channel::<PodEvent>();
        let (record_tx, record_rx) = mpsc::unbounded_channel::<StatusRecord>();

        let watch_loop = WatchLoop::new(
            client.clone(),
            &self.config.namespace,
            self.config.label_selector.clone(),
        );

        let prober = self.build_prober().await?;
        let egress_http = HttpClient::with_tls_verify(
            Duration::from_millis(3050),
            Duration::from_secs(20),
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)],
            &self.config.tls_verify,
        )?;
        let queue = EgressQueue::new(
            egress_http,
            prober,
            self.config.probe.clone(),
            self.config.app_url.clone(),
            self.config.app_status_api_endpoint.clone(),
        );

        let namespace = self.config.namespace.clone();
        let watch_future = watch_loop.run(pod_tx, cancel.clone());
        let bridge_future = bridge_pod_events(client, namespace, pod_rx, record_tx);
        let queue_future = queue.run(record_rx, &token_fetcher, cancel);

        let (watch_result, _, _) = tokio::join!(watch_future, bridge_future, queue_future);
        watch_result?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CoreError> {
        tracing::debug!("verifying that the serve API is up and available");
        let http = HttpClient::with_tls_verify(
            Duration::from_millis(3050),
            Duration::from_secs(20),
            vec![Duration::from_secs(1)],
            &self.config.tls_verify,
        )?;
        let mut token = None;
        let response = http
            .get(&self.config.ping_endpoint(), None, &mut token, None)
            .await;
        match response {
            Some(resp) if resp.status().is_success() => {
                tracing::info!("serve API responded to ping check");
                Ok(())
            }
            _ => Err(CoreError::PingFailed),
        }
    }

    /// Probes the ping endpoint once as a smoke test of the prober itself;
    /// on failure availability checks are disabled entirely rather than
    /// failing startup (spec §4.6 step 4).
    async fn build_prober(&self) -> Result<Option<AppAvailabilityProbe>, CoreError> {
        let prober = AppAvailabilityProbe::new()?;
        let result = prober.probe_url(&self.config.ping_endpoint()).await;
        if result.status == crate::models::ProbeStatus::Running {
            Ok(Some(prober))
        } else {
            tracing::warn!("prober smoke test failed, disabling availability probing");
            Ok(None)
        }
    }

    async fn build_kube_client(&self) -> Result<kube::Client, CoreError> {
        let client = match &self.config.kubeconfig {
            Some(path) => {
                tracing::debug!(path = %path.display(), "attempting to load KUBECONFIG");
                let kubeconfig = kube::config::Kubeconfig::read_from(path).map_err(|e| {
                    CoreError::Config(statuswatch_commons::ConfigError::KubeconfigUnreadable {
                        path: path.display().to_string(),
                        source: Box::new(e),
                    })
                })?;
                let kube_config = kube::Config::from_custom_kubeconfig(
                    kubeconfig,
                    &kube::config::KubeConfigOptions::default(),
                )
                .await?;
                kube::Client::try_from(kube_config)?
            }
            None => {
                tracing::warn!("no KUBECONFIG provided - attempting to use default config");
                kube::Client::try_default().await?
            }
        };
        tracing::info!("kubernetes client successfully set");
        Ok(client)
    }
}

/// Bridges raw pod events into reduced [`StatusRecord`]s, performing the
/// remaining-pods check against the live API when a deletion is observed
/// (spec §4.3's rolling-update override) before handing the record to the
/// egress queue.
async fn bridge_pod_events(
    client: kube::Client, namespace: String, mut pod_rx: mpsc::UnboundedReceiver<PodEvent>,
    record_tx: mpsc::UnboundedSender<StatusRecord>,
) {
    let mut reducer = Reducer::new();

    while let Some(event) = pod_rx.recv().await {
        let (pod, is_deletion) = match &event {
            PodEvent::Upsert(pod) => (pod, false),
            PodEvent::Deleted(pod) => (pod, true),
        };

        let remaining = if is_deletion {
            match pod.release() {
                Some(release) => match count_release_pods(&client, &namespace, release).await {
                    Ok(count) => RemainingPods::Count(count),
                    Err(err) => {
                        tracing::warn!(error = %err, "remaining-pods check failed, falling back to legacy deletion handling");
                        RemainingPods::NotChecked
                    }
                },
                None => RemainingPods::NotChecked,
            }
        } else {
            RemainingPods::NotChecked
        };

        // app_url is resolved by the egress queue itself, which holds the
        // configured AppUrlConfig; resolving it here against defaults would
        // silently ignore APP_URL_* overrides.
        let Some(record) = reducer.update(pod, remaining) else {
            continue;
        };

        if record_tx.send(record).is_err() {
            break;
        }
    }
}

async fn count_release_pods(
    client: &kube::Client, namespace: &str, release: &str,
) -> Result<usize, CoreError> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let list_params = ListParams::default().labels(&format!("release={release}"));
    let list = api.list(&list_params).await?;
    Ok(list.items.len())
}
