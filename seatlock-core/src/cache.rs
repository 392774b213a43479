//! Availability snapshots kept in the key-value service.

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::keys;
use crate::models::Seat;
use crate::repository::KeyValueStore;
use crate::{KvError, KvResult};

#[derive(Clone)]
pub struct AvailabilityCache {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
    timeout: Duration,
}

impl AvailabilityCache {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration, timeout: Duration) -> Self {
        Self { kv, ttl, timeout }
    }

    /// Cached seats for the key, or `None` on a miss. An undecodable payload
    /// counts as a miss.
    pub async fn get(&self, date: NaiveDate, section: Option<&str>) -> KvResult<Option<Vec<Seat>>> {
        let key = keys::availability_key(date, section);
        let cached = tokio::time::timeout(self.timeout, self.kv.get(&key))
            .await
            .map_err(|_| KvError::Timeout("get"))??;

        let Some(payload) = cached else {
            return Ok(None);
        };

        match serde_json::from_str::<Vec<Seat>>(&payload) {
            Ok(seats) => Ok(Some(seats)),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable availability entry");
                Ok(None)
            }
        }
    }

    pub async fn put(&self, date: NaiveDate, section: Option<&str>, seats: &[Seat]) -> KvResult<()> {
        let key = keys::availability_key(date, section);
        let payload = serde_json::to_string(seats).map_err(|e| KvError::Backend(e.to_string()))?;
        tokio::time::timeout(self.timeout, self.kv.set(&key, &payload, self.ttl))
            .await
            .map_err(|_| KvError::Timeout("set"))?
    }

    /// Remove every entry derived from `date`, section-filtered variants
    /// included. Returns the number of keys removed; zero is not an error.
    pub async fn invalidate(&self, date: NaiveDate) -> KvResult<u64> {
        let pattern = keys::availability_pattern(date);
        let found = tokio::time::timeout(self.timeout, self.kv.scan(&pattern))
            .await
            .map_err(|_| KvError::Timeout("scan"))??;

        if found.is_empty() {
            return Ok(0);
        }

        let removed = tokio::time::timeout(self.timeout, self.kv.delete(&found))
            .await
            .map_err(|_| KvError::Timeout("delete"))??;
        debug!(%date, removed, "Invalidated availability cache");
        Ok(removed)
    }

    /// Invalidate after an authoritative write. Failures are logged only.
    pub async fn invalidate_after_write(&self, date: NaiveDate) {
        if let Err(e) = self.invalidate(date).await {
            warn!(%date, error = %e, "Availability cache invalidation failed, entries will expire at TTL");
        }
    }
}
