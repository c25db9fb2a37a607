use std::collections::VecDeque;
use std::time::Duration as StdDuration;

use chrono::{
    Duration as ChronoDuration,
    Utc,
};
use statuswatch_commons::{
    AppUrlConfig,
    ProbeConfig,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::http_client::{
    HttpClient,
    TokenFetcher,
};
use crate::models::{
    PostPayload,
    ProbeStatus,
    Status,
    StatusRecord,
};
use crate::prober::AppAvailabilityProbe;
use crate::url_resolver;

/// Legacy grace window before a `Deleted` event is POSTed, matching
/// `status_queue.py::StatusQueue.process`'s hard-coded 30 second wait.
const LEGACY_DELETE_GRACE: ChronoDuration = ChronoDuration::seconds(30);
const LEGACY_REQUEUE_DELAY: StdDuration = StdDuration::from_secs(4);

/// Probe windows and re-check intervals, keyed by the status being
/// confirmed (spec §4.4's `window(status_lc)` table).
const RUNNING_WINDOW: i64 = 180;
const DELETED_WINDOW: i64 = 30;
const RUNNING_PROBE_INTERVAL: StdDuration = StdDuration::from_secs(10);
const DELETED_PROBE_INTERVAL: StdDuration = StdDuration::from_secs(5);

/// Upper bound on the consumer's own requeue-sleep, so it never busy-loops
/// while waiting out a throttled probe interval.
const MAX_REQUEUE_SLEEP: StdDuration = StdDuration::from_millis(500);

/// What the processing loop should do with the item at the front of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    DispatchNow,
    Requeue(StdDuration),
    /// Requeue without having probed at all, because `probe_next_epoch`
    /// has not yet elapsed; distinct from `Requeue` only in that no probe
    /// was spent on this pass (spec §4.4 step 2, "Else" branch).
    RequeueWithoutProbe,
}

/// Pure decision function for the legacy "wait out a Deleted event" gate,
/// used when probing is disabled or no URL is available for the release.
fn legacy_decision(record: &StatusRecord, now: chrono::DateTime<Utc>) -> Decision {
    if record.status.eq_ignore_ascii_case(Status::DELETED) && now - record.event_ts < LEGACY_DELETE_GRACE {
        return Decision::Requeue(LEGACY_REQUEUE_DELAY);
    }
    Decision::DispatchNow
}

/// Whether the probe gate should invoke the prober on this pass at all, per
/// spec §4.4 step 1/2: establish `probe_deadline_epoch = event_ts +
/// window(status_lc)` on first sight, anchored to the record's own
/// `event_ts` rather than wall-clock-at-first-check (a backed-up queue can
/// see a record well after it was produced), and only actually probe once
/// `now >= probe_next_epoch`.
fn should_probe_now(record: &mut StatusRecord, window_secs: i64, now_epoch: i64) -> bool {
    record
        .probe_deadline_epoch
        .get_or_insert(record.event_ts.timestamp() + window_secs);
    now_epoch >= record.probe_next_epoch.unwrap_or(now_epoch)
}

/// Pure decision function for the adaptive probe gate (spec §4.4): confirms
/// a `Deleted` transition via `nxdomain_confirm` consecutive DNS failures, or
/// a `Running` transition via one successful probe, before the event is
/// allowed onto the wire. A probe result is recorded on the record either way.
fn probe_decision(
    record: &mut StatusRecord, probe: &crate::prober::ProbeResult, probe_config: &ProbeConfig,
    now_epoch: i64,
) -> Decision {
    let url = record.app_url.clone().unwrap_or_default();
    record.probe = Some(crate::models::ProbeBlock {
        status: probe.status,
        http_code: probe.http_code,
        note: probe.note.clone(),
        url,
    });

    let deadline_passed = now_epoch >= record.probe_deadline_epoch.unwrap_or(now_epoch);
    let is_deleted = record.status.eq_ignore_ascii_case(Status::DELETED);
    let interval = if is_deleted {
        DELETED_PROBE_INTERVAL
    } else {
        RUNNING_PROBE_INTERVAL
    };

    if is_deleted {
        if probe.status == ProbeStatus::NotFound {
            record.nx_consecutive += 1;
        } else {
            record.nx_consecutive = 0;
        }
        if record.nx_consecutive >= probe_config.nxdomain_confirm || deadline_passed {
            return Decision::DispatchNow;
        }
        record.probe_next_epoch = Some(now_epoch + interval.as_secs() as i64);
        return Decision::Requeue(interval);
    }

    if probe.status == ProbeStatus::Running || deadline_passed {
        return Decision::DispatchNow;
    }
    record.probe_next_epoch = Some(now_epoch + interval.as_secs() as i64);
    Decision::Requeue(interval)
}

/// Egress queue (C4): FIFO delivery of [`StatusRecord`]s to the app-status
/// API, gated by an adaptive availability probe where configured and falling
/// back to the legacy fixed-delay wait for `Deleted` events otherwise.
pub struct EgressQueue {
    http: HttpClient,
    /// `None` when the coordinator's one-shot ping check against the
    /// prober endpoint failed at startup (spec §4.6 step 4); availability
    /// checks are optional, so this just falls back to the legacy grace
    /// window for every record regardless of `probe_config`.
    prober: Option<AppAvailabilityProbe>,
    probe_config: ProbeConfig,
    app_url_config: AppUrlConfig,
    endpoint: String,
}

impl EgressQueue {
    pub fn new(
        http: HttpClient, prober: Option<AppAvailabilityProbe>, probe_config: ProbeConfig,
        app_url_config: AppUrlConfig, endpoint: String,
    ) -> Self {
        Self {
            http,
            prober,
            probe_config,
            app_url_config,
            endpoint,
        }
    }

    /// Drains `rx` until cancelled or the sender is dropped.
    pub async fn run(
        mut self, mut rx: mpsc::UnboundedReceiver<StatusRecord>, token_fetcher: &dyn TokenFetcher,
        cancel: CancellationToken,
    ) {
        let mut items: VecDeque<StatusRecord> = VecDeque::new();
        let mut token: Option<String> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("egress queue shutting down");
                    break;
                }
                received = rx.recv() => {
                    match received {
                        Some(record) => items.push_back(record),
                        None => break,
                    }
                }
                _ = tokio::time::sleep(StdDuration::from_millis(250)), if !items.is_empty() => {}
            }

            self.drain_ready(&mut items, &mut token, token_fetcher).await;
        }
    }

    async fn drain_ready(
        &mut self, items: &mut VecDeque<StatusRecord>, token: &mut Option<String>,
        token_fetcher: &dyn TokenFetcher,
    ) {
        let rounds = items.len();
        for _ in 0..rounds {
            let Some(mut record) = items.pop_front() else {
                break;
            };

            if record.app_url.is_none() {
                record.app_url = url_resolver::resolve(&self.app_url_config, &record, None);
            }

            let decision = self.decide(&mut record).await;
            match decision {
                Decision::DispatchNow => {
                    self.dispatch(&record, token, token_fetcher).await;
                }
                Decision::Requeue(delay) => {
                    tracing::debug!(release = %record.release, delay_ms = delay.as_millis() as u64, "requeueing event");
                    items.push_back(record);
                    tokio::time::sleep(MAX_REQUEUE_SLEEP).await;
                }
                Decision::RequeueWithoutProbe => {
                    tracing::trace!(release = %record.release, "yielding queue, probe not due yet");
                    items.push_back(record);
                    tokio::time::sleep(MAX_REQUEUE_SLEEP).await;
                }
            }
        }
    }

    async fn decide(&self, record: &mut StatusRecord) -> Decision {
        let Some(prober) = self.prober.as_ref() else {
            return legacy_decision(record, Utc::now());
        };

        let status_applies = self.probe_config.apps.contains(&record.app_type.as_str().to_string())
            && self.probe_config.statuses.contains(&record.status_lc());

        if !self.probe_config.enabled() || !status_applies || record.app_url.is_none() {
            return legacy_decision(record, Utc::now());
        }

        let is_deleted = record.status.eq_ignore_ascii_case(Status::DELETED);
        let window = if is_deleted { DELETED_WINDOW } else { RUNNING_WINDOW };
        let now_epoch = Utc::now().timestamp();

        if !should_probe_now(record, window, now_epoch) {
            return Decision::RequeueWithoutProbe;
        }

        let Some(url) = record.app_url.clone() else {
            // Guarded by the early-return above today, but a future reorder
            // of these checks must not turn a missing URL into a panic.
            return legacy_decision(record, Utc::now());
        };
        let probe = prober.probe_url(&url).await;
        probe_decision(record, &probe, &self.probe_config, now_epoch)
    }

    async fn dispatch(
        &self, record: &StatusRecord, token: &mut Option<String>, token_fetcher: &dyn TokenFetcher,
    ) {
        let payload = PostPayload::from(record);
        let body = match serde_json::to_value(&payload) {
            Ok(v) => v,
            Err(err) => {
                tracing::error!(release = %record.release, error = %err, "failed to serialize payload");
                return;
            }
        };

        let response = self
            .http
            .post(&self.endpoint, &body, None, token, Some(token_fetcher))
            .await;

        match response {
            None => {
                tracing::warn!(release = %record.release, "status post failed, no response from server");
            }
            Some(resp) => {
                let status = resp.status();
                if status.is_success() {
                    tracing::debug!(release = %record.release, new_status = %record.status, "status posted");
                    return;
                }
                if status.as_u16() == 404 {
                    let body = resp.text().await.unwrap_or_default();
                    if body.contains("OK. OBJECT_NOT_FOUND.") {
                        tracing::debug!(release = %record.release, "release already absent server-side, treating as acceptable");
                        return;
                    }
                }
                tracing::warn!(release = %record.release, status = %status, "status post rejected");
            }
        }
    }
}
