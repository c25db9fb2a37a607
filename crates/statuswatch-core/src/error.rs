use thiserror::Error;

/// Failure domain for everything outside the watch loop's own retry
/// classification: HTTP, probing, coordinator setup.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("kubernetes client error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("the remote API did not respond to the ping check")]
    PingFailed,

    #[error("token fetch failed: {0}")]
    Auth(String),

    #[error("configuration error: {0}")]
    Config(#[from] statuswatch_commons::ConfigError),

    #[error("watch loop error: {0}")]
    Watch(#[from] WatchError),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Retry classification for the watch loop (C5), matching spec §7's
/// taxonomy. Only [`WatchError::Protocol`], [`WatchError::Auth`],
/// [`WatchError::ServerError`], [`WatchError::Api`], and
/// [`WatchError::Data`] increment the retry counter; [`WatchError::Gone`]
/// resets the cursor without counting, and [`WatchError::Network`] sleeps
/// longer without counting (recovery is expected).
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch stream protocol error: {0}")]
    Protocol(String),

    #[error("resource version expired (410 Gone)")]
    Gone,

    #[error("authentication/authorization error: {0}")]
    Auth(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("malformed event data: {0}")]
    Data(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("unrecoverable error: {0}")]
    Fatal(#[from] anyhow::Error),
}

impl From<kube::Error> for WatchError {
    fn from(err: kube::Error) -> Self {
        classify_kube_error(&err)
    }
}

fn classify_kube_error(err: &kube::Error) -> WatchError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            410 => WatchError::Gone,
            401 | 403 => WatchError::Auth(resp.message.clone()),
            500..=599 => WatchError::ServerError(resp.message.clone()),
            _ => WatchError::Api(resp.message.clone()),
        },
        // A tower/hyper service-level failure mid-stream (connection reset,
        // h2 GOAWAY, a broken upgrade) is exactly the watch stream protocol
        // breakage spec §7's `ProtocolError` entry names; it must count
        // toward `retries` like any other classified failure, unlike a
        // one-shot connect/read timeout below.
        kube::Error::Service(_) => WatchError::Protocol(err.to_string()),
        other => classify_by_message(&other.to_string()),
    }
}

/// Every remaining `kube::Error` shape (serde/deserialize failures, request
/// building, TLS/DNS, generic transport hiccups) only exposes a `Display`
/// string, so the data/network split relies on message content rather than
/// a variant match. Takes the already-stringified message so it is testable
/// without constructing a live `kube::Error`.
fn classify_by_message(msg: &str) -> WatchError {
    let lower = msg.to_ascii_lowercase();
    if lower.contains("serde") || lower.contains("deserial") || lower.contains("json") {
        return WatchError::Data(msg.to_string());
    }
    if lower.contains("protocol") || lower.contains("unexpected eof") || lower.contains("connection reset") {
        return WatchError::Protocol(msg.to_string());
    }
    // Anything left is a transport-level hiccup (connect/read timeout, DNS,
    // TLS handshake); the watch loop treats these as recoverable without
    // counting toward `retries`.
    WatchError::Network(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_is_classified_as_protocol() {
        let err = kube::Error::Service(Box::new(std::io::Error::other("connection reset by peer")));
        assert!(matches!(classify_kube_error(&err), WatchError::Protocol(_)));
    }

    #[test]
    fn message_mentioning_deserialize_is_classified_as_data() {
        let classified = classify_by_message("failed to deserialize watch event: EOF while parsing");
        assert!(matches!(classified, WatchError::Data(_)));
    }

    #[test]
    fn message_mentioning_protocol_is_classified_as_protocol() {
        let classified = classify_by_message("http2 protocol error: unexpected eof");
        assert!(matches!(classified, WatchError::Protocol(_)));
    }

    #[test]
    fn generic_message_is_classified_as_network() {
        let classified = classify_by_message("connection timed out");
        assert!(matches!(classified, WatchError::Network(_)));
    }
}
