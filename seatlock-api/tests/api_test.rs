use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use seatlock_api::{
    app,
    middleware::Claims,
    state::{AppState, AuthConfig, RequestRules},
};
use seatlock_core::mocks::{MemoryBookingStore, MemoryKeyValueStore};
use seatlock_core::{keys, BookingStore, EngineConfig, KeyValueStore, QueryService, ReservationEngine};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const SECRET: &str = "test-secret";

struct Harness {
    app: Router,
    store: MemoryBookingStore,
    kv: MemoryKeyValueStore,
}

fn harness() -> Harness {
    harness_with_deadline(Duration::from_secs(15))
}

fn harness_with_deadline(request_timeout: Duration) -> Harness {
    let store = MemoryBookingStore::with_catalog(&["Exhibitions", "LNRS"], 3);
    let kv = MemoryKeyValueStore::new();
    let config = EngineConfig::default();

    let store_dyn: Arc<dyn BookingStore> = Arc::new(store.clone());
    let kv_dyn: Arc<dyn KeyValueStore> = Arc::new(kv.clone());

    let state = AppState {
        engine: Arc::new(ReservationEngine::new(Arc::clone(&store_dyn), Arc::clone(&kv_dyn), config.clone())),
        queries: Arc::new(QueryService::new(store_dyn, kv_dyn, &config)),
        auth: AuthConfig { secret: SECRET.to_string() },
        rules: RequestRules {
            max_advance_days: 90,
            request_timeout,
        },
    };

    Harness { app: app(state), store, kv }
}

fn token_for(user_id: i64) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now() + ChronoDuration::hours(1)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

fn post_booking(user_id: i64, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/bookings")
        .header("Authorization", format!("Bearer {}", token_for(user_id)))
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_as(user_id: i64, uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token_for(user_id)))
        .body(Body::empty())
        .unwrap()
}

fn delete_as(user_id: i64, uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token_for(user_id)))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let h = harness();
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, body) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let h = harness();

    let req = Request::builder().uri("/seats").body(Body::empty()).unwrap();
    let (status, _) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/seats")
        .header("Authorization", "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_book_seat_returns_details_and_hides_it() {
    let h = harness();
    let date = today() + ChronoDuration::days(1);

    let (status, body) = send(&h.app, post_booking(7, json!({ "seat_id": 2, "booking_date": date }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["seat_id"], 2);
    assert_eq!(body["user_id"], 7);
    assert_eq!(body["status"], "confirmed");
    assert_eq!(body["booking_date"], date.to_string());
    assert_eq!(body["seat_details"]["section"], "Exhibitions");
    assert_eq!(body["seat_details"]["seat_number"], "02");

    let (status, seats) = send(&h.app, get_as(8, &format!("/seats?booking_date={}", date))).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = seats.as_array().unwrap().iter().map(|s| s["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![1, 3, 4, 5, 6]);
    assert!(seats.as_array().unwrap().iter().all(|s| s["is_available"] == true));

    // The lease is gone once the call returns.
    assert!(h.kv.live_keys().iter().all(|k| !k.starts_with("lock:")));
}

#[tokio::test]
async fn test_booking_date_defaults_to_today() {
    let h = harness();

    let (status, body) = send(&h.app, post_booking(7, json!({ "seat_id": 1 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["booking_date"], today().to_string());
}

#[tokio::test]
async fn test_seat_filter_by_section() {
    let h = harness();
    let date = today();

    let (status, seats) = send(&h.app, get_as(1, &format!("/seats?booking_date={}&section=LNRS", date))).await;
    assert_eq!(status, StatusCode::OK);
    let seats = seats.as_array().unwrap();
    assert_eq!(seats.len(), 3);
    assert!(seats.iter().all(|s| s["section"] == "LNRS"));
}

#[tokio::test]
async fn test_booking_date_window_is_enforced() {
    let h = harness();

    let past = today() - ChronoDuration::days(1);
    let (status, body) = send(&h.app, post_booking(7, json!({ "seat_id": 1, "booking_date": past }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cannot book seats for past dates");

    let far = today() + ChronoDuration::days(91);
    let (status, body) = send(&h.app, post_booking(7, json!({ "seat_id": 1, "booking_date": far }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cannot book seats more than 90 days in advance");

    assert!(h.store.all_bookings().is_empty());
}

#[tokio::test]
async fn test_booking_conflicts_map_to_status_codes() {
    let h = harness();
    let date = today();

    let (status, _) = send(&h.app, post_booking(1, json!({ "seat_id": 1, "booking_date": date }))).await;
    assert_eq!(status, StatusCode::OK);

    // Same seat, other user
    let (status, body) = send(&h.app, post_booking(2, json!({ "seat_id": 1, "booking_date": date }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SEAT_NOT_AVAILABLE");

    // Same user, other seat
    let (status, body) = send(&h.app, post_booking(1, json!({ "seat_id": 2, "booking_date": date }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "USER_ALREADY_BOOKED");

    assert_eq!(h.store.confirmed_bookings().len(), 1);
}

#[tokio::test]
async fn test_held_lease_is_too_many_requests() {
    let h = harness();
    let date = today();

    h.kv
        .set_if_absent(&keys::lock_key(3, date), "someone-else", Duration::from_secs(10))
        .await
        .unwrap();

    let (status, body) = send(&h.app, post_booking(1, json!({ "seat_id": 3, "booking_date": date }))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "LOCK_FAILED");
    assert!(h.store.all_bookings().is_empty());
}

#[tokio::test]
async fn test_store_failure_is_booking_error() {
    let h = harness();
    h.store.fail_commit(true);

    let (status, body) = send(&h.app, post_booking(1, json!({ "seat_id": 1 }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "BOOKING_ERROR");
    assert!(h.store.confirmed_bookings().is_empty());
}

#[tokio::test]
async fn test_list_and_cancel_bookings() {
    let h = harness();
    let d1 = today();
    let d2 = today() + ChronoDuration::days(2);

    send(&h.app, post_booking(5, json!({ "seat_id": 4, "booking_date": d2 }))).await;
    send(&h.app, post_booking(5, json!({ "seat_id": 1, "booking_date": d1 }))).await;
    send(&h.app, post_booking(6, json!({ "seat_id": 2, "booking_date": d1 }))).await;

    let (status, list) = send(&h.app, get_as(5, "/bookings")).await;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().unwrap().clone();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["booking_date"], d1.to_string());
    assert_eq!(list[1]["booking_date"], d2.to_string());
    assert_eq!(list[1]["seat_details"]["section"], "LNRS");

    let (_, later) = send(&h.app, get_as(5, &format!("/bookings?from_date={}", d2))).await;
    assert_eq!(later.as_array().unwrap().len(), 1);

    let booking_id = list[0]["id"].as_i64().unwrap();

    // Not the owner
    let (status, _) = send(&h.app, delete_as(6, &format!("/bookings/{}", booking_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&h.app, delete_as(5, &format!("/bookings/{}", booking_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Booking cancelled successfully");

    // Already cancelled
    let (status, _) = send(&h.app, delete_as(5, &format!("/bookings/{}", booking_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The seat can be taken again
    let (status, _) = send(&h.app, post_booking(7, json!({ "seat_id": 1, "booking_date": d1 }))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn test_request_deadline_is_gateway_timeout_and_frees_seat() {
    let h = harness_with_deadline(Duration::from_secs(1));
    h.store.set_check_delay(Some(Duration::from_secs(4)));

    let (status, body) = send(&h.app, post_booking(1, json!({ "seat_id": 1 }))).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "Booking request timed out");

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(h.kv.live_keys().iter().all(|k| !k.starts_with("lock:")));
    assert!(h.store.all_bookings().is_empty());

    h.store.set_check_delay(None);
    let (status, _) = send(&h.app, post_booking(2, json!({ "seat_id": 1 }))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_current_user_profile() {
    let h = harness();
    h.store.add_user(7, "alice");

    let (status, body) = send(&h.app, get_as(7, "/users/me")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 7);
    assert_eq!(body["username"], "alice");
    assert!(body["created_at"].is_string());

    // A valid token whose subject was never registered
    let (status, body) = send(&h.app, get_as(8, "/users/me")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "User not found");
}
