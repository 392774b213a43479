//! Short-lived mutual-exclusion leases on the key-value service.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::repository::KeyValueStore;
use crate::{KvError, KvResult};

/// A held lease. Released with a token-checked delete, so a holder whose
/// lease expired and was re-acquired by someone else cannot remove the new
/// holder's key.
///
/// Dropping an unreleased lease schedules the release on the current tokio
/// runtime, which covers abandoned futures and unwinding.
pub struct Lease {
    kv: Arc<dyn KeyValueStore>,
    key: String,
    token: String,
    timeout: Duration,
    released: bool,
}

impl Lease {
    /// Returns `Ok(None)` when another holder owns the key.
    pub async fn acquire(
        kv: Arc<dyn KeyValueStore>,
        key: String,
        token: String,
        ttl: Duration,
        timeout: Duration,
    ) -> KvResult<Option<Lease>> {
        let acquired = tokio::time::timeout(timeout, kv.set_if_absent(&key, &token, ttl))
            .await
            .map_err(|_| KvError::Timeout("set_if_absent"))??;

        if !acquired {
            return Ok(None);
        }

        debug!(key = %key, "Lease acquired");
        Ok(Some(Self { kv, key, token, timeout, released: false }))
    }

    pub async fn release(mut self) {
        self.released = true;
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        release(Arc::clone(&self.kv), key, token, self.timeout).await;
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(key = %key, "Lease dropped before release, releasing in background");
                handle.spawn(release(Arc::clone(&self.kv), key, token, self.timeout));
            }
            Err(_) => warn!(key = %key, "Lease dropped outside a runtime, it will lapse at its TTL"),
        }
    }
}

async fn release(kv: Arc<dyn KeyValueStore>, key: String, token: String, timeout: Duration) {
    match tokio::time::timeout(timeout, kv.compare_and_delete(&key, &token)).await {
        Ok(Ok(true)) => debug!(key = %key, "Lease released"),
        Ok(Ok(false)) => warn!(key = %key, "Lease had already expired or changed hands"),
        Ok(Err(e)) => warn!(key = %key, error = %e, "Failed to release lease"),
        Err(_) => warn!(key = %key, "Timed out releasing lease"),
    }
}
