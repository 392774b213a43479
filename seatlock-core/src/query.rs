use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::cache::AvailabilityCache;
use crate::engine::{timed, EngineConfig};
use crate::models::{BookingWithSeat, Seat, SeatId, User, UserId};
use crate::repository::{BookingStore, KeyValueStore};
use crate::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Read side: cache-first availability and per-user bookings.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn BookingStore>,
    cache: AvailabilityCache,
    io_timeout: Duration,
}

impl QueryService {
    pub fn new(store: Arc<dyn BookingStore>, kv: Arc<dyn KeyValueStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            cache: AvailabilityCache::new(kv, config.cache_ttl, config.io_timeout),
            io_timeout: config.io_timeout,
        }
    }

    /// Seats with no confirmed booking on `date`, optionally in one section.
    ///
    /// May be stale by up to the cache TTL; booking re-checks authoritatively.
    #[instrument(skip(self))]
    pub async fn available_seats(&self, date: NaiveDate, section: Option<&str>) -> Result<Vec<Seat>, QueryError> {
        match self.cache.get(date, section).await {
            Ok(Some(seats)) => {
                debug!(count = seats.len(), "Availability cache hit");
                return Ok(seats);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Availability cache read failed, falling back to store"),
        }

        let seats = timed(self.io_timeout, "available seats", self.store.available_seats(date, section)).await?;

        if let Err(e) = self.cache.put(date, section, &seats).await {
            warn!(error = %e, "Failed to populate availability cache");
        }
        Ok(seats)
    }

    /// Not cached: per-user and low traffic.
    pub async fn user_bookings(&self, user_id: UserId, from: NaiveDate) -> Result<Vec<BookingWithSeat>, QueryError> {
        Ok(timed(self.io_timeout, "user bookings", self.store.user_bookings(user_id, from)).await?)
    }

    pub async fn seat(&self, seat_id: SeatId) -> Result<Option<Seat>, QueryError> {
        Ok(timed(self.io_timeout, "seat", self.store.seat(seat_id)).await?)
    }

    pub async fn user(&self, user_id: UserId) -> Result<Option<User>, QueryError> {
        Ok(timed(self.io_timeout, "user", self.store.user(user_id)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MemoryBookingStore, MemoryKeyValueStore};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 11, d).unwrap()
    }

    fn service(store: &MemoryBookingStore, kv: &MemoryKeyValueStore) -> QueryService {
        QueryService::new(Arc::new(store.clone()), Arc::new(kv.clone()), &EngineConfig::default())
    }

    #[tokio::test]
    async fn test_second_read_is_served_from_cache() {
        let store = MemoryBookingStore::with_catalog(&["LNRS", "Elsevier"], 2);
        let kv = MemoryKeyValueStore::new();
        let queries = service(&store, &kv);

        let first = queries.available_seats(day(3), None).await.unwrap();
        let second = queries.available_seats(day(3), None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.availability_queries(), 1);
        let order: Vec<(&str, &str)> = first.iter().map(|s| (s.section.as_str(), s.seat_number.as_str())).collect();
        assert_eq!(order, vec![("Elsevier", "01"), ("Elsevier", "02"), ("LNRS", "01"), ("LNRS", "02")]);
    }

    #[tokio::test]
    async fn test_section_filter_uses_its_own_entry() {
        let store = MemoryBookingStore::with_catalog(&["LNRS", "Elsevier"], 2);
        let kv = MemoryKeyValueStore::new();
        let queries = service(&store, &kv);

        queries.available_seats(day(3), None).await.unwrap();
        let lnrs = queries.available_seats(day(3), Some("LNRS")).await.unwrap();

        assert_eq!(lnrs.len(), 2);
        assert!(lnrs.iter().all(|s| s.section == "LNRS"));
        assert_eq!(store.availability_queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let store = MemoryBookingStore::with_catalog(&["LNRS"], 1);
        let kv = MemoryKeyValueStore::new();
        let queries = service(&store, &kv);

        queries.available_seats(day(3), None).await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        queries.available_seats(day(3), None).await.unwrap();

        assert_eq!(store.availability_queries(), 2);
    }

    #[tokio::test]
    async fn test_cache_outage_falls_back_to_store() {
        let store = MemoryBookingStore::with_catalog(&["LNRS"], 3);
        let kv = MemoryKeyValueStore::new();
        kv.set_unavailable(true);

        let seats = service(&store, &kv).available_seats(day(3), None).await.unwrap();
        assert_eq!(seats.len(), 3);
    }

    #[tokio::test]
    async fn test_store_outage_is_an_error() {
        let store = MemoryBookingStore::with_catalog(&["LNRS"], 1);
        let kv = MemoryKeyValueStore::new();
        store.set_unavailable(true);

        let err = service(&store, &kv).available_seats(day(3), None).await.unwrap_err();
        assert!(matches!(err, QueryError::Store(StoreError::Backend(_))));
    }
}
