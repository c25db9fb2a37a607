use std::collections::HashMap;

use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};

/// Canonical reason translation applied opt-in by consumers (spec §4.3).
///
/// Translation is intentionally *not* applied by [`crate::reducer::Reducer`]
/// itself; it is exposed so a caller can opt in explicitly.
pub fn translate_reason(reason: &str) -> &str {
    match reason {
        "CrashLoopBackOff" => "Error",
        "ContainerCreating" => "Created",
        "PodInitializing" => "Pending",
        "ErrImagePull" | "ImagePullBackOff" => "Image Error",
        "Completed" => "Retrying...",
        "PostStartHookError" => "Pod Error",
        other => other,
    }
}

/// A free-form status string, passthrough for anything the translation map
/// does not recognize. Comparisons against well-known statuses are always
/// case-insensitive (spec §9, Open Question).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(pub String);

impl Status {
    pub const RUNNING: &'static str = "Running";
    pub const PENDING: &'static str = "Pending";
    pub const CONTAINER_CREATING: &'static str = "ContainerCreating";
    pub const DELETED: &'static str = "Deleted";
    pub const TERMINATED: &'static str = "Terminated";
    pub const ERROR: &'static str = "Error";
    pub const IMAGE_ERROR: &'static str = "ImageError";

    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_lowercase(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    pub fn eq_ignore_ascii_case(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Status {
    fn from(value: &str) -> Self {
        Status(value.to_string())
    }
}

impl From<String> for Status {
    fn from(value: String) -> Self {
        Status(value)
    }
}

/// The application flavor a release was detected to run, used to decide
/// whether a URL can be resolved (C7) and whether probing applies (C4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppType {
    Shiny,
    ShinyProxy,
    Unknown,
}

impl AppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::Shiny => "shiny",
            AppType::ShinyProxy => "shiny-proxy",
            AppType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for AppType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an availability probe (C2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ProbeStatus {
    Running,
    Unknown,
    NotFound,
}

/// The probe result block, attached to a [`StatusRecord`] once a probe has
/// confirmed or timed out a transition (spec §3, §4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeBlock {
    pub status: ProbeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_code: Option<u16>,
    pub note: String,
    pub url: String,
}

/// Canonical, per-release reduced state (spec §3).
///
/// Transient probe-scheduling fields are not part of the wire payload; they
/// live here only because the egress queue keeps its own working copy and it
/// is convenient to carry them alongside rather than in a side map. They are
/// always skipped by serde so the record's JSON shape matches [`PostPayload`]-adjacent
/// expectations when a record is logged or inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub release: String,
    pub status: Status,
    pub event_ts: DateTime<Utc>,
    pub creation_ts: DateTime<Utc>,
    pub deletion_ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pod_msg: String,
    #[serde(default)]
    pub container_msg: String,
    pub app_type: AppType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe: Option<ProbeBlock>,

    #[serde(skip)]
    pub probe_deadline_epoch: Option<i64>,
    #[serde(skip)]
    pub probe_next_epoch: Option<i64>,
    #[serde(skip, default)]
    pub nx_consecutive: u32,
}

impl StatusRecord {
    pub fn status_lc(&self) -> String {
        self.status.to_lowercase()
    }
}

/// The message block of the outbound POST payload.
#[derive(Debug, Clone, Serialize)]
pub struct EventMsg {
    #[serde(rename = "pod-msg")]
    pub pod_msg: String,
    #[serde(rename = "container-msg")]
    pub container_msg: String,
}

/// The exact wire shape POSTed to `APP_STATUS_API_ENDPOINT` (spec §6).
#[derive(Debug, Clone, Serialize)]
pub struct PostPayload {
    pub release: String,
    #[serde(rename = "new-status")]
    pub new_status: String,
    #[serde(rename = "event-ts")]
    pub event_ts: String,
    #[serde(rename = "event-msg")]
    pub event_msg: EventMsg,
}

impl From<&StatusRecord> for PostPayload {
    fn from(record: &StatusRecord) -> Self {
        PostPayload {
            release: record.release.clone(),
            new_status: record.status.as_str().to_string(),
            event_ts: format_event_ts(record.event_ts),
            event_msg: EventMsg {
                pod_msg: record.pod_msg.clone(),
                container_msg: record.container_msg.clone(),
            },
        }
    }
}

/// Formats a timestamp as ISO-8601 UTC with millisecond precision and a
/// literal `Z` suffix, matching `status_data.py::get_timestamp_as_str`.
pub fn format_event_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Container-level state, duck-typed so the reducer does not depend on a
/// particular orchestrator client's generated types (spec §9, "Duck-typed
/// pod objects").
#[derive(Debug, Clone, Default)]
pub struct ContainerStateView {
    pub waiting_reason: Option<String>,
    pub waiting_message: Option<String>,
    pub terminated_reason: Option<String>,
    pub terminated_message: Option<String>,
    pub running: bool,
    pub ready: bool,
}

/// A projection of a pod's fields that the reducer (C3) needs, decoupled
/// from the live orchestrator client's typed `Pod` (spec §9).
#[derive(Debug, Clone, Default)]
pub struct PodView {
    pub name: String,
    pub namespace: String,
    pub labels: HashMap<String, String>,
    pub images: Vec<String>,
    pub phase: Option<String>,
    pub message: Option<String>,
    pub creation_ts: DateTime<Utc>,
    pub deletion_ts: Option<DateTime<Utc>>,
    pub init_container_statuses: Vec<ContainerStateView>,
    pub container_statuses: Vec<ContainerStateView>,
}

impl PodView {
    pub fn release(&self) -> Option<&str> {
        self.labels.get("release").map(String::as_str)
    }
}
