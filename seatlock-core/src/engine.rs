use chrono::{NaiveDate, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::AvailabilityCache;
use crate::keys;
use crate::lease::Lease;
use crate::models::{Booking, BookingId, SeatId, UserId};
use crate::repository::{BookingStore, BookingTx, KeyValueStore};
use crate::{ConstraintConflict, StoreError, StoreResult};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Expiry of a per-(seat, date) lease.
    pub lock_ttl: Duration,
    /// Lifetime of an availability snapshot.
    pub cache_ttl: Duration,
    /// Upper bound on any single call to the store or key-value service.
    pub io_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(300),
            io_timeout: Duration::from_secs(5),
        }
    }
}

/// Why a booking attempt did not produce a confirmed booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BookingError {
    #[error("Seat is currently being booked by another user. Please try again.")]
    LockFailed,
    #[error("User already has a booking for this date")]
    UserAlreadyBooked,
    #[error("Seat is not available for the selected date")]
    SeatNotAvailable,
    #[error("An error occurred while booking the seat")]
    Internal,
}

impl BookingError {
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::LockFailed => "LOCK_FAILED",
            BookingError::UserAlreadyBooked => "USER_ALREADY_BOOKED",
            BookingError::SeatNotAvailable => "SEAT_NOT_AVAILABLE",
            BookingError::Internal => "BOOKING_ERROR",
        }
    }

    /// Contention only; the domain conflicts need a different seat or date.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::LockFailed)
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(ConstraintConflict::SeatTaken) => BookingError::SeatNotAvailable,
            StoreError::Conflict(ConstraintConflict::UserHasBooking) => BookingError::UserAlreadyBooked,
            other => {
                error!(error = %other, "Error booking seat");
                BookingError::Internal
            }
        }
    }
}

pub type BookingResult = Result<Booking, BookingError>;

pub(crate) async fn timed<T>(
    limit: Duration,
    op: &'static str,
    fut: impl Future<Output = StoreResult<T>>,
) -> StoreResult<T> {
    tokio::time::timeout(limit, fut).await.map_err(|_| StoreError::Timeout(op))?
}

/// Books and cancels seats.
///
/// A booking runs under a short lease on `(seat, date)` so that concurrent
/// attempts on the same pair shed load instead of piling onto the store.
/// The lease is not what keeps bookings unique: the store's confirmed-only
/// uniqueness rules are, and a violation reported by them is classified
/// exactly like the in-transaction checks.
#[derive(Clone)]
pub struct ReservationEngine {
    store: Arc<dyn BookingStore>,
    kv: Arc<dyn KeyValueStore>,
    cache: AvailabilityCache,
    config: EngineConfig,
}

impl ReservationEngine {
    pub fn new(store: Arc<dyn BookingStore>, kv: Arc<dyn KeyValueStore>, config: EngineConfig) -> Self {
        let cache = AvailabilityCache::new(Arc::clone(&kv), config.cache_ttl, config.io_timeout);
        Self { store, kv, cache, config }
    }

    #[instrument(skip(self), fields(code = tracing::field::Empty))]
    pub async fn book(&self, seat_id: SeatId, user_id: UserId, booking_date: NaiveDate) -> BookingResult {
        let lease = match Lease::acquire(
            Arc::clone(&self.kv),
            keys::lock_key(seat_id, booking_date),
            keys::lease_token(user_id),
            self.config.lock_ttl,
            self.config.io_timeout,
        )
        .await
        {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                warn!("Seat lease held by another request");
                return Err(BookingError::LockFailed);
            }
            Err(e) => {
                warn!(error = %e, "Could not reach lock service");
                return Err(BookingError::LockFailed);
            }
        };

        let outcome = self.reserve(seat_id, user_id, booking_date).await;

        if outcome.is_ok() {
            self.cache.invalidate_after_write(booking_date).await;
        }
        lease.release().await;

        match &outcome {
            Ok(booking) => info!(booking_id = booking.id, "Successfully booked seat"),
            Err(e) => {
                tracing::Span::current().record("code", e.code());
                debug!(error = %e, "Booking rejected");
            }
        }
        outcome
    }

    async fn reserve(&self, seat_id: SeatId, user_id: UserId, date: NaiveDate) -> BookingResult {
        let limit = self.config.io_timeout;
        let mut tx = timed(limit, "begin", self.store.begin()).await?;

        let existing = timed(limit, "user check", tx.confirmed_booking_for_user(user_id, date)).await?;
        if existing.is_some() {
            self.rollback(tx).await;
            return Err(BookingError::UserAlreadyBooked);
        }

        if !timed(limit, "seat check", tx.seat_is_free(seat_id, date)).await? {
            self.rollback(tx).await;
            return Err(BookingError::SeatNotAvailable);
        }

        let booking = timed(limit, "insert", tx.insert_confirmed(seat_id, user_id, date, Utc::now())).await?;
        // A commit that lands after the timeout fires is still reported as
        // BOOKING_ERROR, and the date's cache is left as is until its TTL.
        timed(limit, "commit", tx.commit()).await?;

        Ok(booking)
    }

    async fn rollback(&self, tx: Box<dyn BookingTx>) {
        if let Err(e) = timed(self.config.io_timeout, "rollback", tx.rollback()).await {
            warn!(error = %e, "Rollback failed");
        }
    }

    /// Cancel a confirmed booking owned by `user_id`.
    ///
    /// `Ok(false)` covers an unknown id, another user's booking and an
    /// already-cancelled booking alike.
    #[instrument(skip(self))]
    pub async fn cancel(&self, booking_id: BookingId, user_id: UserId) -> StoreResult<bool> {
        let cancelled = timed(
            self.config.io_timeout,
            "cancel",
            self.store.cancel_confirmed(booking_id, user_id, Utc::now()),
        )
        .await?;

        match cancelled {
            Some(date) => {
                self.cache.invalidate_after_write(date).await;
                info!(%date, "Booking cancelled");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
