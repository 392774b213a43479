use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;

use crate::models::{Booking, BookingId, BookingWithSeat, Seat, SeatId, User, UserId};
use crate::{KvResult, StoreResult};

/// Key-value service shared by the lease keyspace and the availability cache.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// `SET key value NX EX ttl`. Returns false when the key already exists.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> KvResult<bool>;

    /// Delete `key` only while it still holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> KvResult<bool>;

    /// Delete every listed key, returning how many existed.
    async fn delete(&self, keys: &[String]) -> KvResult<u64>;

    /// All keys matching a glob pattern, across the whole keyspace.
    async fn scan(&self, pattern: &str) -> KvResult<Vec<String>>;

    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()>;
}

/// Transactional access to seats and bookings.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn BookingTx>>;

    /// Flip a confirmed booking owned by `user_id` to cancelled in one
    /// conditional statement. Returns the booking date when a row changed.
    async fn cancel_confirmed(
        &self,
        booking_id: BookingId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<NaiveDate>>;

    /// Seats without a confirmed booking on `date`, ordered by (section, seat_number).
    async fn available_seats(&self, date: NaiveDate, section: Option<&str>) -> StoreResult<Vec<Seat>>;

    /// Confirmed bookings from `from` onwards, ordered by (date, section, seat_number).
    async fn user_bookings(&self, user_id: UserId, from: NaiveDate) -> StoreResult<Vec<BookingWithSeat>>;

    async fn seat(&self, seat_id: SeatId) -> StoreResult<Option<Seat>>;

    async fn user(&self, user_id: UserId) -> StoreResult<Option<User>>;
}

/// An open store transaction. Dropping it without `commit` rolls it back.
#[async_trait]
pub trait BookingTx: Send {
    async fn confirmed_booking_for_user(&mut self, user_id: UserId, date: NaiveDate) -> StoreResult<Option<BookingId>>;

    /// Anti-join: the seat exists and has no confirmed booking on `date`.
    async fn seat_is_free(&mut self, seat_id: SeatId, date: NaiveDate) -> StoreResult<bool>;

    async fn insert_confirmed(
        &mut self,
        seat_id: SeatId,
        user_id: UserId,
        date: NaiveDate,
        at: DateTime<Utc>,
    ) -> StoreResult<Booking>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
