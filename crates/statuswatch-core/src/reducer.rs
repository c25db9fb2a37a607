use std::collections::HashMap;

use chrono::Utc;

use crate::models::{
    AppType,
    ContainerStateView,
    PodView,
    Status,
    StatusRecord,
};

/// Derives the raw `(status, container_msg, pod_msg)` triple for a pod,
/// mirroring `status_data.py::StatusData.get_status` exactly: init
/// containers are checked first (a `Completed` terminated init container is
/// skipped rather than treated as a blocking reason), then regular
/// containers, then the pod's own phase as a last resort.
pub fn determine_status(pod: &PodView) -> (String, String, String) {
    let pod_msg = pod.message.clone().unwrap_or_default();

    if let Some(result) = scan_container_statuses(&pod.init_container_statuses, true) {
        return (result.0, result.1, pod_msg);
    }

    if let Some(result) = scan_container_statuses(&pod.container_statuses, false) {
        return (result.0, result.1, pod_msg);
    }

    // No container state was decisive; fall back to the pod's own phase.
    // A pod with a live status object always carries a phase in practice; an
    // absent phase is treated as `Unknown` rather than propagating `None`
    // into a field the wire payload requires to be present (spec invariant I4).
    let phase = pod.phase.clone().unwrap_or_else(|| "Unknown".to_string());
    (phase, String::new(), pod_msg)
}

fn scan_container_statuses(
    statuses: &[ContainerStateView], is_init: bool,
) -> Option<(String, String)> {
    for cs in statuses {
        if let Some(reason) = &cs.terminated_reason {
            if is_init && reason == "Completed" {
                continue;
            }
            return Some((
                Status::new(reason.clone()).to_string(),
                cs.terminated_message.clone().unwrap_or_default(),
            ));
        }

        if let Some(reason) = &cs.waiting_reason {
            return Some((
                reason.clone(),
                cs.waiting_message.clone().unwrap_or_default(),
            ));
        }

        if cs.running && cs.ready {
            return Some((Status::RUNNING.to_string(), String::new()));
        }

        return Some((Status::PENDING.to_string(), String::new()));
    }
    None
}

/// Detects the application flavor from pod labels and container images
/// (spec §4.3), case-insensitively.
pub fn detect_app_type(pod: &PodView) -> AppType {
    if let Some(app_label) = pod.labels.get("app") {
        if app_label.to_ascii_lowercase().contains("shinyproxy") {
            return AppType::ShinyProxy;
        }
    }

    let is_shiny = pod.images.iter().any(|image| {
        let lower = image.to_ascii_lowercase();
        lower.contains("shiny") || lower.contains("rstudio")
    });
    if is_shiny {
        return AppType::Shiny;
    }

    AppType::Unknown
}

/// Outcome of resolving a pending deletion against a fresh remaining-pods
/// count (spec §4.3's "rolling update" override rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingPods {
    /// The remaining-pods check was not performed; fall back to the legacy
    /// behavior of honoring the deletion as-is.
    NotChecked,
    Count(usize),
}

/// Per-release status map (C3), owned exclusively by the watch loop.
#[derive(Debug, Default)]
pub struct Reducer {
    map: HashMap<String, StatusRecord>,
}

impl Reducer {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Applies one pod event, enforcing invariants I1–I4. Returns the
    /// release's updated record, or `None` if the event was dropped (I1) or
    /// carried no release label.
    pub fn update(&mut self, pod: &PodView, remaining: RemainingPods) -> Option<StatusRecord> {
        let release = pod.release()?.to_string();
        let (raw_status, container_msg, pod_msg) = determine_status(pod);
        let app_type = detect_app_type(pod);

        let existing = self.map.get(&release);

        // I1: drop strictly-older creation_ts updates, unless they carry a deletion.
        if let Some(existing) = existing {
            if pod.creation_ts < existing.creation_ts && pod.deletion_ts.is_none() {
                return None;
            }
        }

        // A deletion is allowed to bypass the drop-check above even when it
        // carries an older creation_ts than a newer sibling pod already
        // stored for this release; the stored creation_ts must never regress
        // in that case, or a later stale duplicate between the two
        // timestamps would slip past I1 and overwrite the newer state.
        let creation_ts = existing.map_or(pod.creation_ts, |e| e.creation_ts.max(pod.creation_ts));

        let mut status = raw_status;
        let mut deletion_ts = pod.deletion_ts;

        if let Some(deletion_ts_value) = deletion_ts {
            let supersedes_creation = existing
                .map(|e| deletion_ts_value > e.creation_ts)
                .unwrap_or(true);

            if supersedes_creation {
                match remaining {
                    RemainingPods::Count(count) if count > 1 => {
                        // A newer replica is healthy elsewhere in the release;
                        // this terminating pod must not mask it.
                        deletion_ts = None;
                        status = existing
                            .map(|e| e.status.as_str().to_string())
                            .unwrap_or(status);
                    }
                    RemainingPods::Count(_) | RemainingPods::NotChecked => {
                        status = Status::DELETED.to_string();
                    }
                }
            }
        }

        let mut event_ts = Utc::now();
        if let Some(existing) = existing {
            // I3: event_ts is monotonically non-decreasing per release.
            event_ts = event_ts.max(existing.event_ts);
        }

        let record = StatusRecord {
            release: release.clone(),
            status: Status::new(status),
            event_ts,
            creation_ts,
            deletion_ts,
            pod_msg,
            container_msg,
            app_type,
            app_url: None,
            namespace: Some(pod.namespace.clone()),
            pod_name: Some(pod.name.clone()),
            probe: None,
            probe_deadline_epoch: None,
            probe_next_epoch: None,
            nx_consecutive: 0,
        };

        self.map.insert(release, record.clone());
        Some(record)
    }

    pub fn snapshot(&self, release: &str) -> Option<StatusRecord> {
        self.map.get(release).cloned()
    }

    /// Returns the record of the release with the maximum `event_ts`.
    pub fn latest(&self) -> Option<StatusRecord> {
        self.map.values().max_by_key(|r| r.event_ts).cloned()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as Map;

    use chrono::{
        Duration,
        TimeZone,
    };

    use super::*;

    fn base_pod(release: &str, creation: chrono::DateTime<Utc>) -> PodView {
        let mut labels = Map::new();
        labels.insert("release".to_string(), release.to_string());
        PodView {
            name: "pod-1".to_string(),
            namespace: "default".to_string(),
            labels,
            images: vec!["myrepo/shiny-app:latest".to_string()],
            phase: Some("Running".to_string()),
            message: None,
            creation_ts: creation,
            deletion_ts: None,
            init_container_statuses: vec![],
            container_statuses: vec![],
        }
    }

    fn ts(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn phase_fallback_when_no_container_statuses() {
        let pod = base_pod("r1", ts(0));
        let (status, container_msg, _) = determine_status(&pod);
        assert_eq!(status, "Running");
        assert_eq!(container_msg, "");
    }

    #[test]
    fn init_container_completed_is_skipped() {
        let mut pod = base_pod("r1", ts(0));
        pod.init_container_statuses = vec![ContainerStateView {
            terminated_reason: Some("Completed".to_string()),
            ..Default::default()
        }];
        pod.container_statuses = vec![ContainerStateView {
            running: true,
            ready: true,
            ..Default::default()
        }];
        let (status, _, _) = determine_status(&pod);
        assert_eq!(status, "Running");
    }

    #[test]
    fn init_container_waiting_blocks_before_main_containers() {
        let mut pod = base_pod("r1", ts(0));
        pod.init_container_statuses = vec![ContainerStateView {
            waiting_reason: Some("PodInitializing".to_string()),
            ..Default::default()
        }];
        pod.container_statuses = vec![ContainerStateView {
            running: true,
            ready: true,
            ..Default::default()
        }];
        let (status, _, _) = determine_status(&pod);
        assert_eq!(status, "PodInitializing");
    }

    #[test]
    fn running_but_not_ready_is_pending() {
        let mut pod = base_pod("r1", ts(0));
        pod.container_statuses = vec![ContainerStateView {
            running: true,
            ready: false,
            ..Default::default()
        }];
        let (status, _, _) = determine_status(&pod);
        assert_eq!(status, "Pending");
    }

    #[test]
    fn detects_shiny_proxy_from_app_label() {
        let mut pod = base_pod("r1", ts(0));
        pod.labels
            .insert("app".to_string(), "my-shinyproxy-instance".to_string());
        assert_eq!(detect_app_type(&pod), AppType::ShinyProxy);
    }

    #[test]
    fn detects_shiny_from_image() {
        let pod = base_pod("r1", ts(0));
        assert_eq!(detect_app_type(&pod), AppType::Shiny);
    }

    #[test]
    fn detects_unknown_app_type() {
        let mut pod = base_pod("r1", ts(0));
        pod.images = vec!["nginx:latest".to_string()];
        assert_eq!(detect_app_type(&pod), AppType::Unknown);
    }

    #[test]
    fn older_creation_ts_update_is_dropped_without_deletion() {
        let mut reducer = Reducer::new();
        let first = base_pod("r1", ts(10));
        reducer.update(&first, RemainingPods::NotChecked).unwrap();

        let stale = base_pod("r1", ts(5));
        let result = reducer.update(&stale, RemainingPods::NotChecked);
        assert!(result.is_none());
        assert_eq!(reducer.snapshot("r1").unwrap().creation_ts, ts(10));
    }

    #[test]
    fn deletion_bypasses_creation_ts_check() {
        let mut reducer = Reducer::new();
        let first = base_pod("r1", ts(10));
        reducer.update(&first, RemainingPods::NotChecked).unwrap();

        let mut deleting = base_pod("r1", ts(5));
        deleting.deletion_ts = Some(ts(20));
        let result = reducer
            .update(&deleting, RemainingPods::NotChecked)
            .unwrap();
        assert_eq!(result.status.as_str(), "Deleted");
    }

    #[test]
    fn remaining_pods_above_one_suppresses_deletion() {
        let mut reducer = Reducer::new();
        let first = base_pod("r1", ts(10));
        reducer.update(&first, RemainingPods::NotChecked).unwrap();

        let mut deleting = base_pod("r1", ts(5));
        deleting.deletion_ts = Some(ts(20));
        let result = reducer
            .update(&deleting, RemainingPods::Count(2))
            .unwrap();
        assert_eq!(result.status.as_str(), "Running");
        assert!(result.deletion_ts.is_none());
        // I1: creation_ts must never regress, even when an older-creation_ts
        // deletion event is allowed to update the record.
        assert_eq!(result.creation_ts, ts(10));
    }

    #[test]
    fn suppressed_deletion_does_not_regress_creation_ts_and_still_guards_stale_updates() {
        let mut reducer = Reducer::new();
        // Pod A created at t0.
        let pod_a = base_pod("r1", ts(0));
        reducer.update(&pod_a, RemainingPods::NotChecked).unwrap();

        // Pod B, a newer replica, created at t20, bumps creation_ts forward.
        let pod_b = base_pod("r1", ts(20));
        let after_b = reducer.update(&pod_b, RemainingPods::NotChecked).unwrap();
        assert_eq!(after_b.creation_ts, ts(20));

        // Pod A terminates; remaining > 1 suppresses the deletion, but the
        // stored creation_ts must stay at t20, not regress to pod A's t0.
        let mut pod_a_terminating = base_pod("r1", ts(0));
        pod_a_terminating.deletion_ts = Some(ts(30));
        let after_delete = reducer
            .update(&pod_a_terminating, RemainingPods::Count(2))
            .unwrap();
        assert_eq!(after_delete.creation_ts, ts(20));

        // A stale duplicate timestamped between pod A and pod B must still
        // be dropped by I1, since the stored creation_ts is still t20.
        let stale_duplicate = base_pod("r1", ts(10));
        assert!(reducer
            .update(&stale_duplicate, RemainingPods::NotChecked)
            .is_none());
        assert_eq!(reducer.snapshot("r1").unwrap().creation_ts, ts(20));
    }

    #[test]
    fn remaining_pods_at_most_one_confirms_deletion() {
        let mut reducer = Reducer::new();
        let first = base_pod("r1", ts(10));
        reducer.update(&first, RemainingPods::NotChecked).unwrap();

        let mut deleting = base_pod("r1", ts(5));
        deleting.deletion_ts = Some(ts(20));
        let result = reducer
            .update(&deleting, RemainingPods::Count(1))
            .unwrap();
        assert_eq!(result.status.as_str(), "Deleted");
    }

    #[test]
    fn event_ts_is_monotonic_per_release() {
        let mut reducer = Reducer::new();
        let first = base_pod("r1", ts(10));
        let first_record = reducer.update(&first, RemainingPods::NotChecked).unwrap();

        let second = base_pod("r1", ts(10) + Duration::seconds(1));
        let second_record = reducer.update(&second, RemainingPods::NotChecked).unwrap();

        assert!(second_record.event_ts >= first_record.event_ts);
    }

    #[test]
    fn latest_returns_max_event_ts_release() {
        let mut reducer = Reducer::new();
        reducer.update(&base_pod("r1", ts(0)), RemainingPods::NotChecked);
        std::thread::sleep(std::time::Duration::from_millis(2));
        reducer.update(&base_pod("r2", ts(0)), RemainingPods::NotChecked);

        let latest = reducer.latest().unwrap();
        assert_eq!(latest.release, "r2");
    }

    #[test]
    fn missing_release_label_is_ignored() {
        let mut reducer = Reducer::new();
        let mut pod = base_pod("r1", ts(0));
        pod.labels.clear();
        assert!(reducer.update(&pod, RemainingPods::NotChecked).is_none());
        assert_eq!(reducer.len(), 0);
    }
}
