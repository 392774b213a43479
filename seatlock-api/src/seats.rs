use axum::{
    extract::{Json, Query, State},
    middleware,
    routing::get,
    Router,
};
use chrono::{NaiveDate, Utc};
use seatlock_core::SeatId;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::user_auth_middleware;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SeatQuery {
    pub booking_date: Option<NaiveDate>,
    pub section: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SeatResponse {
    pub id: SeatId,
    pub section: String,
    pub seat_number: String,
    pub is_available: bool,
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/seats", get(available_seats))
        .route_layer(middleware::from_fn_with_state(state, user_auth_middleware))
}

async fn available_seats(
    State(state): State<AppState>,
    Query(query): Query<SeatQuery>,
) -> Result<Json<Vec<SeatResponse>>, AppError> {
    let date = query.booking_date.unwrap_or_else(|| Utc::now().date_naive());
    let seats = state.queries.available_seats(date, query.section.as_deref()).await?;

    Ok(Json(
        seats
            .into_iter()
            .map(|seat| SeatResponse {
                id: seat.id,
                section: seat.section,
                seat_number: seat.seat_number,
                is_available: true,
            })
            .collect(),
    ))
}
