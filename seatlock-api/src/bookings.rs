use axum::{
    extract::{Extension, Json, Path, Query, State},
    middleware,
    routing::{delete, get},
    Router,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use seatlock_core::{BookingId, BookingStatus, BookingWithSeat, SeatDetails, SeatId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::AppError;
use crate::middleware::{user_auth_middleware, AuthenticatedUser};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BookingRequest {
    pub seat_id: SeatId,
    /// Defaults to today.
    pub booking_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub id: BookingId,
    pub seat_id: SeatId,
    pub user_id: UserId,
    pub booking_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub status: BookingStatus,
    pub seat_details: SeatDetails,
}

#[derive(Debug, Deserialize)]
pub struct BookingListQuery {
    pub from_date: Option<NaiveDate>,
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/bookings", get(list_bookings).post(create_booking))
        .route("/bookings/{booking_id}", delete(cancel_booking))
        .route_layer(middleware::from_fn_with_state(state, user_auth_middleware))
}

/// Accept dates from today up to `max_advance_days` ahead.
pub fn validate_booking_date(date: NaiveDate, today: NaiveDate, max_advance_days: i64) -> Result<(), AppError> {
    if date < today {
        return Err(AppError::ValidationError("Cannot book seats for past dates".to_string()));
    }
    let last = Duration::try_days(max_advance_days)
        .and_then(|window| today.checked_add_signed(window))
        .ok_or_else(|| AppError::InternalServerError(format!("Invalid booking window: {} days", max_advance_days)))?;
    if date > last {
        return Err(AppError::ValidationError(format!(
            "Cannot book seats more than {} days in advance",
            max_advance_days
        )));
    }
    Ok(())
}

async fn create_booking(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Json(req): Json<BookingRequest>,
) -> Result<Json<BookingResponse>, AppError> {
    let today = Utc::now().date_naive();
    let booking_date = req.booking_date.unwrap_or(today);
    validate_booking_date(booking_date, today, state.rules.max_advance_days)?;

    // An abandoned call drops the engine future; its lease is released in the background.
    let booking = tokio::time::timeout(
        state.rules.request_timeout,
        state.engine.book(req.seat_id, user_id, booking_date),
    )
    .await
    .map_err(|_| {
        warn!(seat_id = req.seat_id, user_id, "Booking call exceeded request deadline");
        AppError::Timeout("Booking request timed out".to_string())
    })??;

    let seat = state
        .queries
        .seat(booking.seat_id)
        .await?
        .ok_or_else(|| AppError::InternalServerError(format!("Seat {} missing after booking", booking.seat_id)))?;

    info!("Booking confirmed: {}", booking.id);

    Ok(Json(BookingResponse {
        id: booking.id,
        seat_id: booking.seat_id,
        user_id: booking.user_id,
        booking_date: booking.booking_date,
        created_at: booking.created_at,
        status: booking.status,
        seat_details: SeatDetails { section: seat.section, seat_number: seat.seat_number },
    }))
}

async fn list_bookings(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Query(query): Query<BookingListQuery>,
) -> Result<Json<Vec<BookingWithSeat>>, AppError> {
    let from = query.from_date.unwrap_or_else(|| Utc::now().date_naive());
    let bookings = state.queries.user_bookings(user_id, from).await?;
    Ok(Json(bookings))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Path(booking_id): Path<BookingId>,
) -> Result<Json<Value>, AppError> {
    if !state.engine.cancel(booking_id, user_id).await? {
        return Err(AppError::NotFoundError(
            "Booking not found | already cancelled | does not belong to you.".to_string(),
        ));
    }
    Ok(Json(json!({ "message": "Booking cancelled successfully" })))
}
