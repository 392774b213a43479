//! In-memory collaborators for tests.
//!
//! `MemoryKeyValueStore` honours TTLs against `tokio::time::Instant`, so
//! paused-clock tests can expire leases and cache entries. `MemoryBookingStore`
//! enforces both confirmed-booking uniqueness rules at insert and again at
//! commit, which is how the relational store behaves with its partial unique
//! indexes.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::models::{Booking, BookingId, BookingStatus, BookingWithSeat, Seat, SeatDetails, SeatId, User, UserId};
use crate::repository::{BookingStore, BookingTx, KeyValueStore};
use crate::{ConstraintConflict, KvError, KvResult, StoreError, StoreResult};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Key-value store
// ============================================================================

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Clone, Default)]
pub struct MemoryKeyValueStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    unavailable: Arc<AtomicBool>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the service were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every call, to exercise caller timeouts.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    pub fn live_keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = lock(&self.entries)
            .iter()
            .filter(|(_, e)| e.live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    async fn check(&self) -> KvResult<()> {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KvError::Backend("connection refused".into()));
        }
        Ok(())
    }
}

/// Glob matching with `*` and `?`, as used by SCAN MATCH.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> KvResult<bool> {
        self.check().await?;
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        if entries.get(key).is_some_and(|e| e.live(now)) {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry { value: value.to_string(), expires_at: Some(now + ttl) });
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> KvResult<bool> {
        self.check().await?;
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some(e) if e.live(now) && e.value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, keys: &[String]) -> KvResult<u64> {
        self.check().await?;
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        let mut removed = 0;
        for key in keys {
            if let Some(e) = entries.remove(key) {
                if e.live(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn scan(&self, pattern: &str) -> KvResult<Vec<String>> {
        self.check().await?;
        let now = Instant::now();
        Ok(lock(&self.entries)
            .iter()
            .filter(|(k, e)| e.live(now) && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.check().await?;
        let now = Instant::now();
        Ok(lock(&self.entries).get(key).filter(|e| e.live(now)).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        self.check().await?;
        let expires_at = Some(Instant::now() + ttl);
        lock(&self.entries).insert(key.to_string(), Entry { value: value.to_string(), expires_at });
        Ok(())
    }
}

// ============================================================================
// Booking store
// ============================================================================

#[derive(Default)]
struct State {
    seats: BTreeMap<SeatId, Seat>,
    users: BTreeMap<UserId, User>,
    bookings: Vec<Booking>,
    next_seat_id: SeatId,
    next_booking_id: BookingId,
}

impl State {
    fn conflict_for(&self, candidate: &Booking) -> Option<ConstraintConflict> {
        let confirmed = self.bookings.iter().filter(|b| {
            b.status == BookingStatus::Confirmed && b.booking_date == candidate.booking_date
        });
        for b in confirmed {
            if b.seat_id == candidate.seat_id {
                return Some(ConstraintConflict::SeatTaken);
            }
            if b.user_id == candidate.user_id {
                return Some(ConstraintConflict::UserHasBooking);
            }
        }
        None
    }

    fn seat_taken(&self, seat_id: SeatId, date: NaiveDate) -> bool {
        self.bookings
            .iter()
            .any(|b| b.seat_id == seat_id && b.booking_date == date && b.status == BookingStatus::Confirmed)
    }
}

#[derive(Default)]
struct Faults {
    fail_insert: AtomicBool,
    fail_commit: AtomicBool,
    blind_checks: AtomicBool,
    unavailable: AtomicBool,
    check_delay: Mutex<Option<Duration>>,
    commit_delay: Mutex<Option<Duration>>,
}

#[derive(Clone, Default)]
pub struct MemoryBookingStore {
    state: Arc<Mutex<State>>,
    faults: Arc<Faults>,
    availability_queries: Arc<AtomicUsize>,
}

impl MemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with `per_section` seats ("01", "02", ...) in each section.
    pub fn with_catalog(sections: &[&str], per_section: u32) -> Self {
        let store = Self::new();
        for section in sections {
            for n in 1..=per_section {
                store.add_seat(section, &format!("{:02}", n));
            }
        }
        store
    }

    pub fn add_seat(&self, section: &str, seat_number: &str) -> SeatId {
        let mut state = lock(&self.state);
        state.next_seat_id += 1;
        let id = state.next_seat_id;
        state.seats.insert(id, Seat { id, section: section.to_string(), seat_number: seat_number.to_string() });
        id
    }

    /// Register a user profile under a fixed id, as the identity service would.
    pub fn add_user(&self, id: UserId, username: &str) {
        let user = User { id, username: username.to_string(), created_at: Utc::now() };
        lock(&self.state).users.insert(id, user);
    }

    pub fn confirmed_bookings(&self) -> Vec<Booking> {
        lock(&self.state)
            .bookings
            .iter()
            .filter(|b| b.status == BookingStatus::Confirmed)
            .cloned()
            .collect()
    }

    pub fn all_bookings(&self) -> Vec<Booking> {
        lock(&self.state).bookings.clone()
    }

    /// Number of availability queries that reached the store.
    pub fn availability_queries(&self) -> usize {
        self.availability_queries.load(Ordering::SeqCst)
    }

    pub fn fail_insert(&self, fail: bool) {
        self.faults.fail_insert.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commit(&self, fail: bool) {
        self.faults.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the in-transaction checks report "free", as a weak isolation
    /// level can. Only the uniqueness rules then stop duplicates.
    pub fn blind_checks(&self, blind: bool) {
        self.faults.blind_checks.store(blind, Ordering::SeqCst);
    }

    /// Stall the in-transaction seat check, to model a slow lease holder.
    pub fn set_check_delay(&self, delay: Option<Duration>) {
        *lock(&self.faults.check_delay) = delay;
    }

    /// Stall commit, to model a commit whose outcome the caller never sees.
    pub fn set_commit_delay(&self, delay: Option<Duration>) {
        *lock(&self.faults.commit_delay) = delay;
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BookingStore for MemoryBookingStore {
    async fn begin(&self) -> StoreResult<Box<dyn BookingTx>> {
        self.check_available()?;
        Ok(Box::new(MemoryTx {
            state: Arc::clone(&self.state),
            faults: Arc::clone(&self.faults),
            pending: None,
        }))
    }

    async fn cancel_confirmed(
        &self,
        booking_id: BookingId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<NaiveDate>> {
        self.check_available()?;
        let mut state = lock(&self.state);
        let booking = state.bookings.iter_mut().find(|b| {
            b.id == booking_id && b.user_id == user_id && b.status == BookingStatus::Confirmed
        });
        Ok(booking.map(|b| {
            b.status = BookingStatus::Cancelled;
            b.updated_at = at;
            b.booking_date
        }))
    }

    async fn available_seats(&self, date: NaiveDate, section: Option<&str>) -> StoreResult<Vec<Seat>> {
        self.check_available()?;
        self.availability_queries.fetch_add(1, Ordering::SeqCst);
        let state = lock(&self.state);
        let mut seats: Vec<Seat> = state
            .seats
            .values()
            .filter(|s| section.map_or(true, |sec| s.section == sec))
            .filter(|s| !state.seat_taken(s.id, date))
            .cloned()
            .collect();
        seats.sort_by(|a, b| (&a.section, &a.seat_number).cmp(&(&b.section, &b.seat_number)));
        Ok(seats)
    }

    async fn user_bookings(&self, user_id: UserId, from: NaiveDate) -> StoreResult<Vec<BookingWithSeat>> {
        self.check_available()?;
        let state = lock(&self.state);
        let mut rows: Vec<BookingWithSeat> = state
            .bookings
            .iter()
            .filter(|b| b.user_id == user_id && b.booking_date >= from && b.status == BookingStatus::Confirmed)
            .filter_map(|b| {
                state.seats.get(&b.seat_id).map(|s| BookingWithSeat {
                    booking: b.clone(),
                    seat_details: SeatDetails { section: s.section.clone(), seat_number: s.seat_number.clone() },
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            (a.booking.booking_date, &a.seat_details.section, &a.seat_details.seat_number).cmp(&(
                b.booking.booking_date,
                &b.seat_details.section,
                &b.seat_details.seat_number,
            ))
        });
        Ok(rows)
    }

    async fn seat(&self, seat_id: SeatId) -> StoreResult<Option<Seat>> {
        self.check_available()?;
        Ok(lock(&self.state).seats.get(&seat_id).cloned())
    }

    async fn user(&self, user_id: UserId) -> StoreResult<Option<User>> {
        self.check_available()?;
        Ok(lock(&self.state).users.get(&user_id).cloned())
    }
}

struct MemoryTx {
    state: Arc<Mutex<State>>,
    faults: Arc<Faults>,
    pending: Option<Booking>,
}

#[async_trait]
impl BookingTx for MemoryTx {
    async fn confirmed_booking_for_user(&mut self, user_id: UserId, date: NaiveDate) -> StoreResult<Option<BookingId>> {
        if self.faults.blind_checks.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let state = lock(&self.state);
        Ok(state
            .bookings
            .iter()
            .find(|b| b.user_id == user_id && b.booking_date == date && b.status == BookingStatus::Confirmed)
            .map(|b| b.id))
    }

    async fn seat_is_free(&mut self, seat_id: SeatId, date: NaiveDate) -> StoreResult<bool> {
        let delay = *lock(&self.faults.check_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.faults.blind_checks.load(Ordering::SeqCst) {
            return Ok(true);
        }
        let state = lock(&self.state);
        Ok(state.seats.contains_key(&seat_id) && !state.seat_taken(seat_id, date))
    }

    async fn insert_confirmed(
        &mut self,
        seat_id: SeatId,
        user_id: UserId,
        date: NaiveDate,
        at: DateTime<Utc>,
    ) -> StoreResult<Booking> {
        if self.faults.fail_insert.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("insert failed".into()));
        }
        let mut state = lock(&self.state);
        if !state.seats.contains_key(&seat_id) {
            return Err(StoreError::Backend(format!("seat {} violates foreign key", seat_id)));
        }
        state.next_booking_id += 1;
        let booking = Booking {
            id: state.next_booking_id,
            seat_id,
            user_id,
            booking_date: date,
            status: BookingStatus::Confirmed,
            created_at: at,
            updated_at: at,
        };
        if let Some(conflict) = state.conflict_for(&booking) {
            return Err(StoreError::Conflict(conflict));
        }
        self.pending = Some(booking.clone());
        Ok(booking)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let delay = *lock(&self.faults.commit_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.faults.fail_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("commit failed".into()));
        }
        let state_handle = Arc::clone(&self.state);
        let Some(booking) = self.pending else {
            return Ok(());
        };
        let mut state = lock(&state_handle);
        if let Some(conflict) = state.conflict_for(&booking) {
            return Err(StoreError::Conflict(conflict));
        }
        state.bookings.push(booking);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
