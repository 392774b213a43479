use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use seatlock_core::{BookingError, QueryError, StoreError};
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    ValidationError(String),
    NotFoundError(String),
    Booking(BookingError),
    Timeout(String),
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, code) = match self {
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::Booking(err) => {
                let (status, msg) = match err {
                    BookingError::UserAlreadyBooked => {
                        (StatusCode::BAD_REQUEST, "You already have a booking for this date".to_string())
                    }
                    BookingError::SeatNotAvailable => (StatusCode::CONFLICT, "Seat is not available".to_string()),
                    BookingError::LockFailed => (
                        StatusCode::TOO_MANY_REQUESTS,
                        "Seat is currently being booked. Please try again.".to_string(),
                    ),
                    BookingError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
                };
                (status, msg, Some(err.code()))
            }
            AppError::Timeout(msg) => {
                tracing::warn!("Request timed out: {}", msg);
                (StatusCode::GATEWAY_TIMEOUT, msg, None)
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string(), None)
            }
        };

        let body = match code {
            Some(code) => Json(json!({ "error": error_message, "code": code })),
            None => Json(json!({ "error": error_message })),
        };

        (status, body).into_response()
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        Self::Booking(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        Self::InternalServerError(err.to_string())
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        Self::InternalServerError(err.to_string())
    }
}
