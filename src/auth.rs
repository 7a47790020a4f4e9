use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::observability::AUTH_FAILURES_TOTAL;

/// Shared secret gating the administrative routes.
#[derive(Clone)]
pub struct AdminToken {
    token: Arc<str>,
}

impl AdminToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::from(token.into()),
        }
    }

    /// Check an `Authorization` header value of the form `Bearer <token>`.
    pub fn verify(&self, authorization: Option<&str>) -> bool {
        let Some(presented) = authorization.and_then(|v| v.strip_prefix("Bearer ")) else {
            return false;
        };
        constant_time_eq(presented.trim().as_bytes(), self.token.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Route layer for admin endpoints. The engine never sees who is calling.
pub async fn require_admin(State(admin): State<AdminToken>, req: Request, next: Next) -> Response {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if !admin.verify(authorization) {
        tracing::warn!(path = %req.uri().path(), "admin request rejected");
        metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized" })),
        )
            .into_response();
    }
    next.run(req).await
}
