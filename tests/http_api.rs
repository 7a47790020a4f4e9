use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use futures::StreamExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use ulid::Ulid;

use roomledger::auth::AdminToken;
use roomledger::http::{AppState, router};
use roomledger::tenant::TenantManager;

const TOKEN: &str = "test-admin";

// ── Test infrastructure ──────────────────────────────────────

fn test_app_in(dir: &Path) -> Router {
    let tenants = Arc::new(TenantManager::new(dir.to_path_buf(), None));
    router(AppState::new(tenants, AdminToken::new(TOKEN)), 64)
}

fn test_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("roomledger_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn test_app() -> Router {
    test_app_in(&test_dir())
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn admin(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn create_room_type(app: &Router, property: &str, quantity: u32) -> String {
    let (status, body) = send(
        app,
        admin(
            "POST",
            &format!("/{property}/room-types"),
            Some(json!({ "name": "Deluxe Double", "capacity": 2, "quantity": quantity, "price": 250000 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_string()
}

fn booking(name: &str, check_in: &str, check_out: &str) -> Value {
    json!({
        "guest_name": name,
        "guest_email": format!("{}@example.com", name.to_lowercase()),
        "check_in": check_in,
        "check_out": check_out,
    })
}

fn delivery(external_id: &str, room_type_id: &str) -> Value {
    json!({
        "source": "booking.com",
        "external_id": external_id,
        "room_type_id": room_type_id,
        "guest_name": "Meera",
        "guest_email": "meera@example.com",
        "check_in": "2024-01-10",
        "check_out": "2024-01-12",
    })
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn health_check() {
    let app = test_app();
    let resp = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_routes_require_token() {
    let app = test_app();
    let (status, _) = send(&app, get("/seaview/room-types")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = Request::get("/seaview/room-types")
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Listing does not create the property; registering a room type does.
    let (status, _) = send(&app, admin("GET", "/seaview/room-types", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let rt = create_room_type(&app, "seaview", 3).await;
    let (status, body) = send(&app, admin("GET", "/seaview/room-types", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], rt);
}

#[tokio::test]
async fn public_routes_never_create_properties() {
    let dir = test_dir();
    let app = test_app_in(&dir);
    let rt = Ulid::new();

    let requests = [
        get(&format!("/ghost/room-types/{rt}/calendar")),
        get(&format!("/ghost/room-types/{rt}/availability?check_in=2024-01-10&check_out=2024-01-11")),
        get(&format!("/ghost/room-types/{rt}/changes")),
        post(&format!("/ghost/room-types/{rt}/bookings"), booking("Asha", "2024-01-10", "2024-01-11")),
        post("/ghost/ota/webhook", delivery("G1", &rt.to_string())),
    ];
    for req in requests {
        let uri = req.uri().to_string();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["error"], "property not found", "{uri}");
    }
    assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);

    // Malformed names are 404 on public routes too.
    let (status, _) = send(&app, post("/sea.view/ota/webhook", delivery("G2", &rt.to_string()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn property_survives_restart_without_admin_call() {
    let dir = test_dir();
    let rt = {
        let app = test_app_in(&dir);
        let rt = create_room_type(&app, "seaview", 1).await;
        let (status, _) = send(&app, post("/seaview/ota/webhook", delivery("R1", &rt))).await;
        assert_eq!(status, StatusCode::CREATED);
        rt
    };

    let app = test_app_in(&dir);
    let (status, body) = send(&app, post("/seaview/ota/webhook", delivery("R1", &rt))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "duplicate");
}

#[tokio::test]
async fn reservation_lookup_by_id() {
    let app = test_app();
    let rt = create_room_type(&app, "seaview", 1).await;
    let (_, created) = send(&app, post("/seaview/ota/webhook", delivery("L1", &rt))).await;
    let id = created["reservation_id"].as_str().unwrap();

    let (status, _) = send(&app, get(&format!("/seaview/reservations/{id}"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, admin("GET", &format!("/seaview/reservations/{id}"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id);
    assert_eq!(body["external_id"], "L1");

    for missing in [Ulid::new().to_string(), "not-an-id".to_string()] {
        let (status, _) = send(&app, admin("GET", &format!("/seaview/reservations/{missing}"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn direct_booking_until_full() {
    let app = test_app();
    let rt = create_room_type(&app, "seaview", 2).await;
    let uri = format!("/seaview/room-types/{rt}/bookings");

    for name in ["Asha", "Ravi"] {
        let (status, body) = send(&app, post(&uri, booking(name, "2024-01-10", "2024-01-13"))).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["status"], "confirmed");
        assert!(body["reservation_id"].is_string());
    }

    let (status, body) = send(&app, post(&uri, booking("Kiran", "2024-01-10", "2024-01-13"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["first_blocked_date"], "2024-01-10");
}

#[tokio::test]
async fn direct_booking_validation_errors() {
    let app = test_app();
    let rt = create_room_type(&app, "seaview", 1).await;
    let uri = format!("/seaview/room-types/{rt}/bookings");

    let (status, _) = send(&app, post(&uri, booking("Asha", "2024-01-12", "2024-01-10"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, post(&uri, booking("Asha", "someday", "2024-01-10"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, post(&uri, booking("", "2024-01-10", "2024-01-11"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, post(&uri, json!({ "guest_name": "Asha" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unknown = format!("/seaview/room-types/{}/bookings", Ulid::new());
    let (status, _) = send(&app, post(&unknown, booking("Asha", "2024-01-10", "2024-01-11"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_contract() {
    let app = test_app();
    let rt = create_room_type(&app, "seaview", 1).await;
    let uri = "/seaview/ota/webhook";

    // Accepted, then every redelivery is a duplicate of the same reservation.
    let (status, first) = send(&app, post(uri, delivery("X123", &rt))).await;
    assert_eq!(status, StatusCode::CREATED, "{first}");
    assert_eq!(first["status"], "accepted");
    for _ in 0..3 {
        let (status, again) = send(&app, post(uri, delivery("X123", &rt))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["status"], "duplicate");
        assert_eq!(again["reservation_id"], first["reservation_id"]);
    }

    // Same nights, different booking: the single unit is taken.
    let (status, body) = send(&app, post(uri, delivery("X124", &rt))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["reason"], "No availability on 2024-01-10");
    assert_eq!(body["first_blocked_date"], "2024-01-10");
}

#[tokio::test]
async fn webhook_input_errors() {
    let app = test_app();
    let rt = create_room_type(&app, "seaview", 1).await;
    let uri = "/seaview/ota/webhook";

    let mut missing = delivery("X1", &rt);
    missing.as_object_mut().unwrap().remove("guest_email");
    let (status, body) = send(&app, post(uri, missing)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "missing fields");

    let (status, body) = send(&app, post(uri, delivery("X2", &Ulid::new().to_string()))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid room_type");

    let mut numeric = delivery("X3", &rt);
    numeric["room_type_id"] = json!(42);
    let (status, body) = send(&app, post(uri, numeric)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid room_type");

    let mut bad_dates = delivery("X4", &rt);
    bad_dates["check_out"] = json!("2024-01-09");
    let (status, body) = send(&app, post(uri, bad_dates)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid dates");
}

#[tokio::test]
async fn webhook_accepts_ota_alias() {
    let app = test_app();
    let rt = create_room_type(&app, "seaview", 1).await;
    let mut payload = delivery("A1", &rt);
    let obj = payload.as_object_mut().unwrap();
    obj.remove("source");
    obj.insert("ota".into(), json!("airbnb"));
    let (status, body) = send(&app, post("/seaview/ota/webhook", payload)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
}

#[tokio::test]
async fn properties_are_isolated() {
    let app = test_app();
    let rt = create_room_type(&app, "seaview", 1).await;
    let (status, _) = send(&app, post("/seaview/ota/webhook", delivery("X1", &rt))).await;
    assert_eq!(status, StatusCode::CREATED);

    // The room type does not exist in another property.
    create_room_type(&app, "hillside", 1).await;
    let (status, body) = send(&app, post("/hillside/ota/webhook", delivery("X1", &rt))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid room_type");
}

#[tokio::test]
async fn availability_and_calendar_feed() {
    let app = test_app();
    let rt = create_room_type(&app, "seaview", 2).await;
    let (status, _) = send(
        &app,
        post(&format!("/seaview/room-types/{rt}/bookings"), booking("Asha", "2024-07-02", "2024-07-04")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        get(&format!("/seaview/room-types/{rt}/availability?check_in=2024-07-01&check_out=2024-07-05")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], true);
    assert_eq!(body["first_blocked_date"], Value::Null);

    let (status, body) = send(
        &app,
        get(&format!("/seaview/room-types/{rt}/calendar?from=2024-07-01&days=5")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let days = body["days"].as_array().unwrap();
    assert_eq!(days.len(), 5);
    let available: Vec<u64> = days.iter().map(|d| d["available"].as_u64().unwrap()).collect();
    assert_eq!(available, vec![2, 1, 1, 2, 2]);
    assert_eq!(days[1]["date"], "2024-07-02");
    assert_eq!(days[1]["events"][0]["title"], "Asha (direct)");
    assert_eq!(body["events"].as_array().unwrap().len(), 1);

    // Default window is 30 days from today.
    let (status, body) = send(&app, get(&format!("/seaview/room-types/{rt}/calendar"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["days"].as_array().unwrap().len(), 30);

    let (status, _) = send(
        &app,
        get(&format!("/seaview/room-types/{rt}/calendar?from=2024-07-01&days=10000")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn import_then_reconcile() {
    let app = test_app();
    let rt = create_room_type(&app, "seaview", 2).await;
    let rows: Vec<Value> = [("L1", "2024-02-28", "2024-03-02"), ("L2", "2024-03-01", "2024-03-02"), ("L3", "2024-03-01", "2024-03-03")]
        .iter()
        .map(|(ext, a, b)| {
            json!({
                "room_type_id": rt,
                "source": "legacy-pms",
                "external_id": ext,
                "guest_name": "Imported",
                "guest_email": "imported@example.com",
                "check_in": a,
                "check_out": b,
            })
        })
        .collect();
    let mut with_dup = rows.clone();
    with_dup.push(rows[0].clone());

    let (status, body) = send(
        &app,
        admin("POST", "/seaview/imports", Some(json!({ "reservations": with_dup }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["imported"], 3);
    assert_eq!(body["results"][3]["status"], "duplicate");

    let (status, body) = send(&app, admin("GET", "/seaview/reconcile", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["conflicts"][0]["date"], "2024-03-01");
    assert_eq!(body["conflicts"][0]["reservations"].as_array().unwrap().len(), 3);

    let (status, body) = send(
        &app,
        admin("GET", &format!("/seaview/reservations?room_type_id={rt}&date_from=2024-03-02"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn update_room_type_quantity() {
    let app = test_app();
    let rt = create_room_type(&app, "seaview", 1).await;
    let uri = format!("/seaview/room-types/{rt}/bookings");
    let (status, _) = send(&app, post(&uri, booking("Asha", "2024-01-10", "2024-01-11"))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        admin(
            "PUT",
            &format!("/seaview/room-types/{rt}"),
            Some(json!({ "name": "Deluxe Double", "capacity": 2, "quantity": 2, "price": 260000 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["quantity"], 2);

    let (status, _) = send(&app, post(&uri, booking("Ravi", "2024-01-10", "2024-01-11"))).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn change_feed_streams_commits() {
    let app = test_app();
    let rt = create_room_type(&app, "seaview", 1).await;

    let resp = app
        .clone()
        .oneshot(get(&format!("/seaview/room-types/{rt}/changes")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let mut frames = resp.into_body().into_data_stream();

    let (status, body) = send(&app, post("/seaview/ota/webhook", delivery("S1", &rt))).await;
    assert_eq!(status, StatusCode::CREATED);

    let frame = tokio::time::timeout(Duration::from_secs(5), frames.next())
        .await
        .expect("no frame within 5s")
        .unwrap()
        .unwrap();
    let text = String::from_utf8_lossy(&frame);
    assert!(text.contains("event: reservation_committed"), "{text}");
    assert!(text.contains(body["reservation_id"].as_str().unwrap()), "{text}");

    let (status, _) = send(&app, get(&format!("/seaview/room-types/{}/changes", Ulid::new()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
