pub mod models;
pub mod repository;
pub mod keys;
pub mod lease;
pub mod cache;
pub mod engine;
pub mod query;
#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

pub use models::{Booking, BookingId, BookingStatus, BookingWithSeat, Seat, SeatDetails, SeatId, User, UserId};
pub use engine::{BookingError, BookingResult, EngineConfig, ReservationEngine};
pub use query::{QueryError, QueryService};
pub use repository::{BookingStore, BookingTx, KeyValueStore};

/// Uniqueness constraint that rejected a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintConflict {
    /// A confirmed booking already exists for this (seat, date).
    SeatTaken,
    /// The user already holds a confirmed booking on this date.
    UserHasBooking,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Uniqueness constraint violated: {0:?}")]
    Conflict(ConstraintConflict),
    #[error("Store call timed out: {0}")]
    Timeout(&'static str),
    #[error("Store backend error: {0}")]
    Backend(String),
    #[error("Failed to decode row: {0}")]
    Decode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("Key-value call timed out: {0}")]
    Timeout(&'static str),
    #[error("Key-value backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type KvResult<T> = Result<T, KvError>;
