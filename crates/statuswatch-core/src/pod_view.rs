use chrono::{
    DateTime,
    Utc,
};
use k8s_openapi::api::core::v1::{
    ContainerStatus,
    Pod,
};

use crate::models::{
    ContainerStateView,
    PodView,
};

/// Projects a live orchestrator `Pod` into the decoupled [`PodView`] the
/// reducer (C3) consumes, per the "duck-typed pod objects" design note.
pub fn project(pod: &Pod) -> PodView {
    let meta = &pod.metadata;
    let status = pod.status.as_ref();
    let spec = pod.spec.as_ref();

    let images = spec
        .map(|s| {
            s.containers
                .iter()
                .filter_map(|c| c.image.clone())
                .collect()
        })
        .unwrap_or_default();

    PodView {
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        labels: meta
            .labels
            .clone()
            .map(|m| m.into_iter().collect())
            .unwrap_or_default(),
        images,
        phase: status.and_then(|s| s.phase.clone()),
        message: status.and_then(|s| s.message.clone()),
        creation_ts: meta
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .unwrap_or_else(Utc::now),
        deletion_ts: meta.deletion_timestamp.as_ref().map(|t| t.0),
        init_container_statuses: status
            .and_then(|s| s.init_container_statuses.as_ref())
            .map(|v| v.iter().map(project_container_status).collect())
            .unwrap_or_default(),
        container_statuses: status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|v| v.iter().map(project_container_status).collect())
            .unwrap_or_default(),
    }
}

fn project_container_status(cs: &ContainerStatus) -> ContainerStateView {
    let state = cs.state.clone().unwrap_or_default();
    ContainerStateView {
        waiting_reason: state.waiting.as_ref().and_then(|w| w.reason.clone()),
        waiting_message: state.waiting.as_ref().and_then(|w| w.message.clone()),
        terminated_reason: state.terminated.as_ref().and_then(|t| t.reason.clone()),
        terminated_message: state.terminated.as_ref().and_then(|t| t.message.clone()),
        running: state.running.is_some(),
        ready: cs.ready,
    }
}

/// Fallback timestamp used when a deletion event carries no explicit
/// `deletionTimestamp` (should not happen in practice, but the reducer must
/// never panic on a malformed event per spec §7's `DataError` handling).
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
