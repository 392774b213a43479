//! Key derivation for the lease and availability-cache keyspaces.

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::models::{SeatId, UserId};

const LOCK_PREFIX: &str = "lock:seat";
const AVAILABILITY_PREFIX: &str = "available_seats";

pub fn lock_key(seat_id: SeatId, date: NaiveDate) -> String {
    format!("{}:{}:{}", LOCK_PREFIX, seat_id, date)
}

/// Opaque lease token: owner, issue time, and a random suffix.
pub fn lease_token(user_id: UserId) -> String {
    format!("{}:{}:{}", user_id, Utc::now().timestamp_millis(), Uuid::new_v4())
}

pub fn availability_key(date: NaiveDate, section: Option<&str>) -> String {
    match section {
        Some(section) => format!("{}:{}:section:{}", AVAILABILITY_PREFIX, date, section),
        None => format!("{}:{}", AVAILABILITY_PREFIX, date),
    }
}

/// Glob matching every availability key derived from `date`.
pub fn availability_pattern(date: NaiveDate) -> String {
    format!("{}:{}*", AVAILABILITY_PREFIX, date)
}
