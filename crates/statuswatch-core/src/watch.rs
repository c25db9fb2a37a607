use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{
    ListParams,
    WatchEvent,
    WatchParams,
};
use kube::{
    Api,
    ResourceExt,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::WatchError;
use crate::models::PodView;
use crate::pod_view;

/// A pod create/update or delete, already projected to [`PodView`] so the
/// reducer downstream never touches the live `kube`-typed object.
#[derive(Debug, Clone)]
pub enum PodEvent {
    Upsert(PodView),
    Deleted(PodView),
}

/// Resumable pod watch (C5): classifies every failure per spec §4.5/§7 and
/// decides whether to count it toward the retry budget, reset the resource
/// version cursor, or simply back off and keep watching.
pub struct WatchLoop {
    api: Api<Pod>,
    label_selector: String,
    max_retries: u32,
    retry_delay: Duration,
    network_error_delay: Duration,
}

impl WatchLoop {
    pub fn new(client: kube::Client, namespace: &str, label_selector: String) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            label_selector,
            max_retries: 10,
            retry_delay: Duration::from_secs(3),
            network_error_delay: Duration::from_secs(5),
        }
    }

    /// Lists pods once (no watch) to obtain a starting `resource_version`
    /// cursor, per spec §4.5's "Initial cursor" rule. Also used to mint a
    /// fresh cursor after a `410 Gone`.
    async fn list_initial_resource_version(&self) -> Result<String, WatchError> {
        let list_params = ListParams::default().labels(&self.label_selector);
        let list = self
            .api
            .list(&list_params)
            .await
            .map_err(WatchError::from)?;
        Ok(list.metadata.resource_version.unwrap_or_default())
    }

    /// Runs until cancelled, a fatal error is hit, or the receiver is dropped.
    pub async fn run(
        &self, tx: mpsc::UnboundedSender<PodEvent>, cancel: CancellationToken,
    ) -> Result<(), WatchError> {
        let mut resource_version = String::new();
        let mut retries = 0u32;

        'outer: loop {
            if cancel.is_cancelled() {
                break;
            }

            if resource_version.is_empty() {
                match self.list_initial_resource_version().await {
                    Ok(rv) => resource_version = rv,
                    Err(err) => {
                        self.handle_error(err, &mut retries, &mut resource_version)
                            .await?;
                        continue 'outer;
                    }
                }
            }

            let watch_params = WatchParams::default()
                .labels(&self.label_selector)
                .timeout(240);
            let stream = match self.api.watch(&watch_params, &resource_version).await {
                Ok(stream) => stream,
                Err(err) => {
                    self.handle_error(err.into(), &mut retries, &mut resource_version)
                        .await?;
                    continue 'outer;
                }
            };
            let mut stream = Box::pin(stream);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'outer,
                    next = stream.next() => {
                        let Some(event) = next else {
                            // Stream ended cleanly; the apiserver closes watch
                            // connections periodically. Restart from the same cursor.
                            break;
                        };

                        match event {
                            Ok(WatchEvent::Added(pod)) | Ok(WatchEvent::Modified(pod)) => {
                                if let Some(rv) = pod.resource_version() {
                                    resource_version = rv;
                                }
                                retries = 0;
                                let view = pod_view::project(&pod);
                                let out = if view.deletion_ts.is_some() {
                                    PodEvent::Deleted(view)
                                } else {
                                    PodEvent::Upsert(view)
                                };
                                if tx.send(out).is_err() {
                                    break 'outer;
                                }
                            }
                            Ok(WatchEvent::Deleted(pod)) => {
                                if let Some(rv) = pod.resource_version() {
                                    resource_version = rv;
                                }
                                retries = 0;
                                let mut view = pod_view::project(&pod);
                                view.deletion_ts.get_or_insert_with(Utc::now);
                                if tx.send(PodEvent::Deleted(view)).is_err() {
                                    break 'outer;
                                }
                            }
                            Ok(WatchEvent::Bookmark(bm)) => {
                                resource_version = bm.metadata.resource_version;
                            }
                            Ok(WatchEvent::Error(err_resp)) => {
                                let watch_err = classify_error_response(&err_resp);
                                self.handle_error(watch_err, &mut retries, &mut resource_version).await?;
                                break;
                            }
                            Err(err) => {
                                self.handle_error(err.into(), &mut retries, &mut resource_version).await?;
                                break;
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_error(
        &self, err: WatchError, retries: &mut u32, resource_version: &mut String,
    ) -> Result<(), WatchError> {
        match &err {
            WatchError::Gone => {
                tracing::warn!("resource version expired (410 Gone), resetting watch cursor");
                resource_version.clear();
                tokio::time::sleep(self.retry_delay).await;
                Ok(())
            }
            WatchError::Network(msg) => {
                tracing::warn!(error = %msg, "network error on watch stream, retrying without counting");
                tokio::time::sleep(self.network_error_delay).await;
                Ok(())
            }
            WatchError::Auth(_) | WatchError::ServerError(_) | WatchError::Api(_)
            | WatchError::Protocol(_) | WatchError::Data(_) => {
                *retries += 1;
                if *retries > self.max_retries {
                    return Err(WatchError::Fatal(anyhow::anyhow!(
                        "watch retry budget exhausted after {} attempts: {err}",
                        *retries
                    )));
                }
                tracing::warn!(retries = *retries, error = %err, "watch error, retrying");
                tokio::time::sleep(self.retry_delay).await;
                Ok(())
            }
            WatchError::Fatal(_) => Err(err),
        }
    }
}

fn classify_error_response(resp: &kube::core::ErrorResponse) -> WatchError {
    match resp.code {
        410 => WatchError::Gone,
        401 | 403 => WatchError::Auth(resp.message.clone()),
        500..=599 => WatchError::ServerError(resp.message.clone()),
        _ => WatchError::Api(resp.message.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_gone_as_cursor_reset() {
        let resp = kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "too old resource version".to_string(),
            reason: "Gone".to_string(),
            code: 410,
        };
        assert!(matches!(classify_error_response(&resp), WatchError::Gone));
    }

    #[test]
    fn classifies_403_as_auth() {
        let resp = kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        };
        assert!(matches!(classify_error_response(&resp), WatchError::Auth(_)));
    }

    #[test]
    fn classifies_503_as_server_error() {
        let resp = kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "unavailable".to_string(),
            reason: "ServiceUnavailable".to_string(),
            code: 503,
        };
        assert!(matches!(classify_error_response(&resp), WatchError::ServerError(_)));
    }

    #[test]
    fn classifies_other_codes_as_api_error() {
        let resp = kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "conflict".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        };
        assert!(matches!(classify_error_response(&resp), WatchError::Api(_)));
    }
}
