//! Metrics for observability.
//!
//! Counters recorded through the `metrics` facade. The library installs no
//! exporter; without a recorder every call is a no-op.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `couch_mesh_` and follow Prometheus conventions:
//! counters end in `_total`, labels are low-cardinality (no URLs, no usernames).
//!
//! # Usage
//!
//! ```rust,no_run
//! use couch_mesh::metrics;
//!
//! metrics::record_remote_call("read_document", "ok");
//! metrics::record_document_outcome("unchanged");
//! ```

use metrics::{counter, histogram};
use std::time::Duration;

/// Record one HTTP round trip to a server.
///
/// `status` is `"ok"`, an HTTP status code, or `"transport_error"`.
pub fn record_remote_call(operation: &str, status: &str) {
    counter!(
        "couch_mesh_remote_calls_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a failed attempt that is about to be retried.
pub fn record_retry(operation: &str) {
    counter!("couch_mesh_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Record what happened to a service account.
pub fn record_account_outcome(outcome: &str) {
    counter!("couch_mesh_accounts_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record what happened to a replication job document.
pub fn record_document_outcome(outcome: &str) {
    counter!("couch_mesh_documents_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record the end of a server's provisioning.
pub fn record_server(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("couch_mesh_servers_total", "status" => status).increment(1);
}

/// Record how long one server took, liveness wait included.
pub fn record_server_duration(duration: Duration) {
    histogram!("couch_mesh_server_duration_seconds").record(duration.as_secs_f64());
}
