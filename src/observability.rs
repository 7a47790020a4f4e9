use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "roomledger_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "roomledger_http_request_duration_seconds";

/// Counter: direct booking attempts. Labels: source, outcome.
pub const BOOKINGS_TOTAL: &str = "roomledger_bookings_total";

/// Counter: channel webhook deliveries. Labels: outcome.
pub const WEBHOOK_DELIVERIES_TOTAL: &str = "roomledger_webhook_deliveries_total";

/// Counter: imported reservations. Labels: outcome.
pub const IMPORTS_TOTAL: &str = "roomledger_imports_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "roomledger_tenants_active";

/// Gauge: oversubscribed nights found by the last audit. Labels: property.
pub const CONFLICTS_DETECTED: &str = "roomledger_conflicts_detected";

/// Counter: admin requests refused for a missing or wrong token.
pub const AUTH_FAILURES_TOTAL: &str = "roomledger_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomledger_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomledger_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Label for one request path. Every route the server serves has its own
/// label with ids and property names as placeholders; any other path is
/// `"other"`, so clients cannot mint new series.
pub fn route_label(path: &str) -> &'static str {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match segments.as_slice() {
        ["health"] => "/health",
        [_, "room-types"] => "/:property/room-types",
        [_, "room-types", _] => "/:property/room-types/:id",
        [_, "room-types", _, "bookings"] => "/:property/room-types/:id/bookings",
        [_, "room-types", _, "availability"] => "/:property/room-types/:id/availability",
        [_, "room-types", _, "calendar"] => "/:property/room-types/:id/calendar",
        [_, "room-types", _, "changes"] => "/:property/room-types/:id/changes",
        [_, "ota", "webhook"] => "/:property/ota/webhook",
        [_, "reservations"] => "/:property/reservations",
        [_, "reservations", _] => "/:property/reservations/:id",
        [_, "imports"] => "/:property/imports",
        [_, "reconcile"] => "/:property/reconcile",
        _ => "other",
    }
}
