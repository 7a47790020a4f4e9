//! JSON-over-HTTP surface. `:property` in every route selects the tenant;
//! handlers translate between wire payloads and engine calls and never hold
//! engine locks themselves.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tower::limit::GlobalConcurrencyLimitLayer;
use ulid::Ulid;

use crate::auth::{self, AdminToken};
use crate::engine::{
    CalendarDay, CalendarEvent, Conflict, Engine, EngineError, IngestOutcome, NewReservation,
    RejectReason, ReservationFilter, WebhookDelivery,
};
use crate::limits::{DEFAULT_CALENDAR_DAYS, MAX_IMPORT_BATCH};
use crate::model::*;
use crate::observability::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL, route_label};
use crate::tenant::TenantManager;

#[derive(Clone)]
pub struct AppState {
    pub tenants: Arc<TenantManager>,
    pub admin: AdminToken,
}

impl AppState {
    pub fn new(tenants: Arc<TenantManager>, admin: AdminToken) -> Self {
        Self { tenants, admin }
    }

    /// An existing property. Unknown properties are 404, never created.
    fn engine(&self, property: &str) -> Result<Arc<Engine>, ApiError> {
        self.tenants
            .get(property)
            .map_err(ApiError::Property)?
            .ok_or(ApiError::NotFound("property not found"))
    }

    /// Creates the property on first use. Admin room-type registration only.
    fn engine_or_create(&self, property: &str) -> Result<Arc<Engine>, ApiError> {
        self.tenants
            .get_or_create(property)
            .map_err(ApiError::Property)
    }
}

/// Build the full router. `max_in_flight` bounds concurrently served
/// requests across all properties.
pub fn router(state: AppState, max_in_flight: usize) -> Router {
    let admin = Router::new()
        .route(
            "/:property/room-types",
            get(list_room_types).post(register_room_type),
        )
        .route("/:property/room-types/:id", put(update_room_type))
        .route("/:property/reservations", get(list_reservations))
        .route("/:property/reservations/:id", get(get_reservation))
        .route("/:property/imports", post(import_reservations))
        .route("/:property/reconcile", get(reconcile))
        .route_layer(middleware::from_fn_with_state(
            state.admin.clone(),
            auth::require_admin,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .route("/:property/room-types/:id/bookings", post(book))
        .route("/:property/room-types/:id/availability", get(availability))
        .route("/:property/room-types/:id/calendar", get(calendar))
        .route("/:property/room-types/:id/changes", get(changes))
        .route("/:property/ota/webhook", post(webhook));

    public
        .merge(admin)
        .layer(middleware::from_fn(track_metrics))
        .layer(GlobalConcurrencyLimitLayer::new(max_in_flight))
        .with_state(state)
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let route = route_label(req.uri().path());
    let start = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();
    metrics::counter!(HTTP_REQUESTS_TOTAL, "route" => route, "status" => status).increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(start.elapsed().as_secs_f64());
    response
}

// ── Errors ───────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("property unavailable: {0}")]
    Property(std::io::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry = matches!(&self, ApiError::Engine(e) if e.is_transient());
        let (status, body) = match &self {
            ApiError::Engine(EngineError::Conflict { first_blocked }) => (
                StatusCode::CONFLICT,
                json!({
                    "status": "rejected",
                    "reason": format!("No availability on {first_blocked}"),
                    "first_blocked_date": first_blocked,
                }),
            ),
            ApiError::Engine(EngineError::DuplicateDelivery(existing)) => (
                StatusCode::CONFLICT,
                json!({ "error": self.to_string(), "reservation_id": existing }),
            ),
            ApiError::Engine(e) => {
                let status = match e {
                    EngineError::Validation(_) | EngineError::LimitExceeded(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                    EngineError::AlreadyExists(_) => StatusCode::CONFLICT,
                    EngineError::Journal(_) => StatusCode::SERVICE_UNAVAILABLE,
                    EngineError::Conflict { .. } | EngineError::DuplicateDelivery(_) => {
                        StatusCode::CONFLICT
                    }
                };
                (status, json!({ "error": e.to_string() }))
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::Property(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                (StatusCode::BAD_REQUEST, json!({ "error": e.to_string() }))
            }
            ApiError::Property(e) => {
                tracing::error!("property unavailable: {e}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({ "error": "property unavailable" }),
                )
            }
        };
        let mut response = (status, Json(body)).into_response();
        if retry {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(format!("invalid payload: {}", rejection.body_text())))
}

fn parse_room_type_id(raw: &str) -> Result<RoomTypeId, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::NotFound("room type not found"))
}

fn date_param(raw: &str, field: &str) -> Result<NaiveDate, ApiError> {
    parse_date(raw).ok_or_else(|| ApiError::BadRequest(format!("invalid {field}")))
}

fn optional_date(raw: Option<&str>, field: &str) -> Result<Option<NaiveDate>, ApiError> {
    raw.filter(|s| !s.trim().is_empty())
        .map(|s| date_param(s, field))
        .transpose()
}

// ── Public routes ────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct BookingRequest {
    pub guest_name: String,
    pub guest_email: String,
    pub check_in: String,
    pub check_out: String,
}

async fn book(
    State(state): State<AppState>,
    Path((property, id)): Path<(String, String)>,
    payload: Result<Json<BookingRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let engine = state.engine(&property)?;
    let room_type_id = parse_room_type_id(&id)?;
    let req = json_body(payload)?;
    let check_in = date_param(&req.check_in, "check_in")?;
    let check_out = date_param(&req.check_out, "check_out")?;

    let reservation = engine
        .book(
            room_type_id,
            Guest::new(req.guest_name, req.guest_email),
            check_in,
            check_out,
            DIRECT_SOURCE,
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "confirmed",
            "reservation_id": reservation.id,
            "reservation": reservation,
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub check_in: String,
    pub check_out: String,
}

async fn availability(
    State(state): State<AppState>,
    Path((property, id)): Path<(String, String)>,
    Query(q): Query<AvailabilityQuery>,
) -> Result<Json<Value>, ApiError> {
    let engine = state.engine(&property)?;
    let room_type_id = parse_room_type_id(&id)?;
    let check_in = date_param(&q.check_in, "check_in")?;
    let check_out = date_param(&q.check_out, "check_out")?;
    let result = engine
        .check_availability(room_type_id, check_in, check_out)
        .await?;
    Ok(Json(json!({
        "available": result.is_available(),
        "first_blocked_date": result.first_blocked(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub from: Option<String>,
    pub days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CalendarResponse {
    pub room_type_id: RoomTypeId,
    pub from: NaiveDate,
    pub quantity: u32,
    pub days: Vec<CalendarDay>,
    pub events: Vec<CalendarEvent>,
}

async fn calendar(
    State(state): State<AppState>,
    Path((property, id)): Path<(String, String)>,
    Query(q): Query<CalendarQuery>,
) -> Result<Json<CalendarResponse>, ApiError> {
    let engine = state.engine(&property)?;
    let room_type_id = parse_room_type_id(&id)?;
    let from = optional_date(q.from.as_deref(), "from")?.unwrap_or_else(|| Utc::now().date_naive());
    let window = q.days.unwrap_or(DEFAULT_CALENDAR_DAYS);

    let snapshot = engine.calendar(room_type_id, from, window).await?;
    Ok(Json(CalendarResponse {
        room_type_id,
        from,
        quantity: snapshot.quantity,
        days: snapshot.days().collect(),
        events: snapshot.events().collect(),
    }))
}

/// Server-sent events of every commit on one room type.
async fn changes(
    State(state): State<AppState>,
    Path((property, id)): Path<(String, String)>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let engine = state.engine(&property)?;
    let room_type_id = parse_room_type_id(&id)?;
    if engine.get_room_type_state(&room_type_id).is_none() {
        return Err(EngineError::NotFound(room_type_id).into());
    }
    let rx = engine.notify.subscribe(room_type_id);
    Ok(Sse::new(change_stream(rx)).keep_alive(KeepAlive::default()))
}

fn change_stream(
    rx: broadcast::Receiver<Event>,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((Ok(to_sse(&event)), rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "change feed subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

fn to_sse(event: &Event) -> SseEvent {
    let name = match event {
        Event::RoomTypeRegistered { .. } => "room_type_registered",
        Event::RoomTypeUpdated { .. } => "room_type_updated",
        Event::ReservationCommitted { .. } => "reservation_committed",
    };
    SseEvent::default()
        .event(name)
        .json_data(event)
        .unwrap_or_else(|_| SseEvent::default().comment("unserializable event"))
}

/// Channel webhook body. Every field is optional on the wire so a missing
/// one yields the contract's `missing fields` error instead of a decode error.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(alias = "ota")]
    pub source: Option<String>,
    pub external_id: Option<Value>,
    pub room_type_id: Option<Value>,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub check_in: Option<String>,
    pub check_out: Option<String>,
}

/// Channels send ids as strings or bare numbers.
fn scalar(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl WebhookPayload {
    fn into_delivery(self) -> Option<WebhookDelivery> {
        Some(WebhookDelivery {
            source: present(self.source)?,
            external_id: present(scalar(self.external_id))?,
            room_type_id: present(scalar(self.room_type_id))?,
            guest_name: present(self.guest_name)?,
            guest_email: present(self.guest_email)?,
            check_in: present(self.check_in)?,
            check_out: present(self.check_out)?,
        })
    }
}

async fn webhook(
    State(state): State<AppState>,
    Path(property): Path<String>,
    payload: Result<Json<WebhookPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let engine = state.engine(&property)?;
    let Some(delivery) = json_body(payload)?.into_delivery() else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing fields" })),
        )
            .into_response());
    };

    let (status, body) = match engine.ingest(delivery).await? {
        IngestOutcome::Accepted(reservation) => (
            StatusCode::CREATED,
            json!({ "status": "accepted", "reservation_id": reservation.id }),
        ),
        IngestOutcome::Duplicate(existing) => (
            StatusCode::OK,
            json!({ "status": "duplicate", "reservation_id": existing }),
        ),
        IngestOutcome::Rejected(RejectReason::InvalidRoomType) => {
            (StatusCode::BAD_REQUEST, json!({ "error": "invalid room_type" }))
        }
        IngestOutcome::Rejected(RejectReason::InvalidDates) => {
            (StatusCode::BAD_REQUEST, json!({ "error": "invalid dates" }))
        }
        IngestOutcome::Rejected(reason @ RejectReason::NoAvailability { first_blocked }) => (
            StatusCode::CONFLICT,
            json!({
                "status": "rejected",
                "reason": reason.to_string(),
                "first_blocked_date": first_blocked,
            }),
        ),
    };
    Ok((status, Json(body)).into_response())
}

// ── Admin routes ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RoomTypeRequest {
    pub id: Option<RoomTypeId>,
    pub name: String,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    pub quantity: u32,
    #[serde(default)]
    pub price: u64,
}

fn default_capacity() -> u32 {
    2
}

async fn list_room_types(
    State(state): State<AppState>,
    Path(property): Path<String>,
) -> Result<Json<Vec<RoomType>>, ApiError> {
    let engine = state.engine(&property)?;
    Ok(Json(engine.list_room_types().await))
}

async fn register_room_type(
    State(state): State<AppState>,
    Path(property): Path<String>,
    payload: Result<Json<RoomTypeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let engine = state.engine_or_create(&property)?;
    let req = json_body(payload)?;
    let room_type = RoomType {
        id: req.id.unwrap_or_else(Ulid::new),
        name: req.name,
        capacity: req.capacity,
        quantity: req.quantity,
        price: req.price,
    };
    engine.register_room_type(room_type.clone()).await?;
    Ok((StatusCode::CREATED, Json(room_type)).into_response())
}

async fn update_room_type(
    State(state): State<AppState>,
    Path((property, id)): Path<(String, String)>,
    payload: Result<Json<RoomTypeRequest>, JsonRejection>,
) -> Result<Json<RoomType>, ApiError> {
    let engine = state.engine(&property)?;
    let id = parse_room_type_id(&id)?;
    let req = json_body(payload)?;
    if req.id.is_some_and(|body_id| body_id != id) {
        return Err(ApiError::BadRequest("id in body does not match path".into()));
    }
    let room_type = RoomType {
        id,
        name: req.name,
        capacity: req.capacity,
        quantity: req.quantity,
        price: req.price,
    };
    engine.update_room_type(room_type.clone()).await?;
    Ok(Json(room_type))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReservationQuery {
    pub room_type_id: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

async fn list_reservations(
    State(state): State<AppState>,
    Path(property): Path<String>,
    Query(q): Query<ReservationQuery>,
) -> Result<Json<Vec<Reservation>>, ApiError> {
    let engine = state.engine(&property)?;
    let filter = ReservationFilter {
        room_type_id: q
            .room_type_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(parse_room_type_id)
            .transpose()?,
        date_from: optional_date(q.date_from.as_deref(), "date_from")?,
        date_to: optional_date(q.date_to.as_deref(), "date_to")?,
    };
    Ok(Json(engine.list_reservations(&filter).await?))
}

async fn get_reservation(
    State(state): State<AppState>,
    Path((property, id)): Path<(String, String)>,
) -> Result<Json<Reservation>, ApiError> {
    let engine = state.engine(&property)?;
    let id = Ulid::from_string(&id).map_err(|_| ApiError::NotFound("reservation not found"))?;
    Ok(Json(engine.reservation(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ImportRow {
    pub room_type_id: RoomTypeId,
    pub source: String,
    pub external_id: Option<String>,
    pub guest_name: String,
    pub guest_email: String,
    pub check_in: String,
    pub check_out: String,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub reservations: Vec<ImportRow>,
}

#[derive(Debug, Serialize)]
pub struct ImportResult {
    pub index: usize,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<ReservationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImportRow {
    fn into_new_reservation(self) -> Result<NewReservation, EngineError> {
        let stay = parse_date(&self.check_in)
            .zip(parse_date(&self.check_out))
            .and_then(|(a, b)| StayRange::new(a, b))
            .ok_or_else(|| EngineError::Validation("invalid dates".into()))?;
        Ok(NewReservation {
            room_type_id: self.room_type_id,
            source: self.source,
            external_id: self.external_id.filter(|ext| !ext.trim().is_empty()),
            guest: Guest::new(self.guest_name, self.guest_email),
            stay,
        })
    }
}

/// Rows are imported one by one; each row reports its own outcome.
async fn import_reservations(
    State(state): State<AppState>,
    Path(property): Path<String>,
    payload: Result<Json<ImportRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let engine = state.engine(&property)?;
    let req = json_body(payload)?;
    if req.reservations.len() > MAX_IMPORT_BATCH {
        return Err(EngineError::LimitExceeded("import batch too large").into());
    }

    let mut results = Vec::with_capacity(req.reservations.len());
    let mut imported = 0usize;
    for (index, row) in req.reservations.into_iter().enumerate() {
        let outcome = match row.into_new_reservation() {
            Ok(new) => engine.import_reservation(new).await,
            Err(e) => Err(e),
        };
        results.push(match outcome {
            Ok(reservation) => {
                imported += 1;
                ImportResult {
                    index,
                    status: "imported",
                    reservation_id: Some(reservation.id),
                    error: None,
                }
            }
            Err(EngineError::DuplicateDelivery(existing)) => ImportResult {
                index,
                status: "duplicate",
                reservation_id: Some(existing),
                error: None,
            },
            Err(e) => ImportResult {
                index,
                status: "error",
                reservation_id: None,
                error: Some(e.to_string()),
            },
        });
    }
    tracing::info!(%property, imported, rows = results.len(), "import finished");
    Ok(Json(json!({ "imported": imported, "results": results })))
}

#[derive(Debug, Deserialize)]
pub struct ReconcileQuery {
    pub room_type_id: Option<String>,
}

async fn reconcile(
    State(state): State<AppState>,
    Path(property): Path<String>,
    Query(q): Query<ReconcileQuery>,
) -> Result<Json<Value>, ApiError> {
    let engine = state.engine(&property)?;
    let conflicts: Vec<Conflict> = match q.room_type_id.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => engine.scan(&[parse_room_type_id(raw)?]).await?,
        None => engine.scan_all().await?,
    };
    Ok(Json(json!({ "count": conflicts.len(), "conflicts": conflicts })))
}
