use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use seatlock_core::repository::{BookingStore, BookingTx};
use seatlock_core::{
    Booking, BookingId, BookingWithSeat, ConstraintConflict, Seat, SeatDetails, SeatId, StoreError, StoreResult,
    User, UserId,
};
use sqlx::{PgPool, Postgres, Transaction};

pub const SEAT_DATE_INDEX: &str = "uq_bookings_seat_date_confirmed";
pub const USER_DATE_INDEX: &str = "uq_bookings_user_date_confirmed";

/// Which booking rule a violated unique index enforces.
pub fn conflict_for_constraint(name: &str) -> Option<ConstraintConflict> {
    match name {
        SEAT_DATE_INDEX => Some(ConstraintConflict::SeatTaken),
        USER_DATE_INDEX => Some(ConstraintConflict::UserHasBooking),
        _ => None,
    }
}

fn store_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            if let Some(conflict) = db_err.constraint().and_then(conflict_for_constraint) {
                return StoreError::Conflict(conflict);
            }
        }
    }
    StoreError::Backend(e.to_string())
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct BookingRow {
    id: i64,
    seat_id: i64,
    user_id: i64,
    booking_date: NaiveDate,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            seat_id: row.seat_id,
            user_id: row.user_id,
            booking_date: row.booking_date,
            status: row.status.parse().map_err(StoreError::Decode)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SeatRow {
    id: i64,
    section: String,
    seat_number: String,
}

impl From<SeatRow> for Seat {
    fn from(row: SeatRow) -> Self {
        Seat { id: row.id, section: row.section, seat_number: row.seat_number }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User { id: row.id, username: row.username, created_at: row.created_at }
    }
}

#[derive(sqlx::FromRow)]
struct BookingSeatRow {
    #[sqlx(flatten)]
    booking: BookingRow,
    section: String,
    seat_number: String,
}

#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn begin(&self) -> StoreResult<Box<dyn BookingTx>> {
        let tx = self.pool.begin().await.map_err(store_error)?;
        Ok(Box::new(PgBookingTx { tx }))
    }

    async fn cancel_confirmed(
        &self,
        booking_id: BookingId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<NaiveDate>> {
        sqlx::query_scalar(
            r#"
            UPDATE bookings
            SET status = 'cancelled', updated_at = $3
            WHERE id = $1 AND user_id = $2 AND status = 'confirmed'
            RETURNING booking_date
            "#,
        )
        .bind(booking_id)
        .bind(user_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)
    }

    async fn available_seats(&self, date: NaiveDate, section: Option<&str>) -> StoreResult<Vec<Seat>> {
        let rows: Vec<SeatRow> = sqlx::query_as(
            r#"
            SELECT s.id, s.section, s.seat_number
            FROM seats s
            LEFT JOIN bookings b ON s.id = b.seat_id
                AND b.booking_date = $1
                AND b.status = 'confirmed'
            WHERE b.id IS NULL
              AND ($2::TEXT IS NULL OR s.section = $2)
            ORDER BY s.section, s.seat_number
            "#,
        )
        .bind(date)
        .bind(section)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(rows.into_iter().map(Seat::from).collect())
    }

    async fn user_bookings(&self, user_id: UserId, from: NaiveDate) -> StoreResult<Vec<BookingWithSeat>> {
        let rows: Vec<BookingSeatRow> = sqlx::query_as(
            r#"
            SELECT b.id, b.seat_id, b.user_id, b.booking_date, b.status, b.created_at, b.updated_at,
                   s.section, s.seat_number
            FROM bookings b
            JOIN seats s ON b.seat_id = s.id
            WHERE b.user_id = $1 AND b.booking_date >= $2 AND b.status = 'confirmed'
            ORDER BY b.booking_date, s.section, s.seat_number
            "#,
        )
        .bind(user_id)
        .bind(from)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter()
            .map(|row| {
                Ok(BookingWithSeat {
                    booking: Booking::try_from(row.booking)?,
                    seat_details: SeatDetails { section: row.section, seat_number: row.seat_number },
                })
            })
            .collect()
    }

    async fn seat(&self, seat_id: SeatId) -> StoreResult<Option<Seat>> {
        let row: Option<SeatRow> = sqlx::query_as("SELECT id, section, seat_number FROM seats WHERE id = $1")
            .bind(seat_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(row.map(Seat::from))
    }

    async fn user(&self, user_id: UserId) -> StoreResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT id, username, created_at FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(row.map(User::from))
    }
}

/// Read-committed transaction. The partial unique indexes reject a
/// duplicate confirmed booking that slips past the checks.
pub struct PgBookingTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BookingTx for PgBookingTx {
    async fn confirmed_booking_for_user(&mut self, user_id: UserId, date: NaiveDate) -> StoreResult<Option<BookingId>> {
        sqlx::query_scalar(
            r#"
            SELECT id FROM bookings
            WHERE user_id = $1 AND booking_date = $2 AND status = 'confirmed'
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(date)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(store_error)
    }

    async fn seat_is_free(&mut self, seat_id: SeatId, date: NaiveDate) -> StoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT s.id
            FROM seats s
            WHERE s.id = $1
            AND NOT EXISTS (
                SELECT 1 FROM bookings b
                WHERE b.seat_id = s.id
                AND b.booking_date = $2
                AND b.status = 'confirmed'
            )
            "#,
        )
        .bind(seat_id)
        .bind(date)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(store_error)?;

        Ok(found.is_some())
    }

    async fn insert_confirmed(
        &mut self,
        seat_id: SeatId,
        user_id: UserId,
        date: NaiveDate,
        at: DateTime<Utc>,
    ) -> StoreResult<Booking> {
        let row: BookingRow = sqlx::query_as(
            r#"
            INSERT INTO bookings (seat_id, user_id, booking_date, status, created_at, updated_at)
            VALUES ($1, $2, $3, 'confirmed', $4, $4)
            RETURNING id, seat_id, user_id, booking_date, status, created_at, updated_at
            "#,
        )
        .bind(seat_id)
        .bind(user_id)
        .bind(date)
        .bind(at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(store_error)?;

        Booking::try_from(row)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(store_error)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await.map_err(store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_indexes_map_to_booking_rules() {
        assert_eq!(conflict_for_constraint(SEAT_DATE_INDEX), Some(ConstraintConflict::SeatTaken));
        assert_eq!(conflict_for_constraint(USER_DATE_INDEX), Some(ConstraintConflict::UserHasBooking));
        assert_eq!(conflict_for_constraint("seats_section_seat_number_key"), None);
    }

    #[test]
    fn test_index_names_match_migration() {
        let migration = include_str!("../../migrations/20250101000000_init.sql");
        assert!(migration.contains(SEAT_DATE_INDEX));
        assert!(migration.contains(USER_DATE_INDEX));
    }

    #[test]
    fn test_unknown_status_is_decode_error() {
        let now = Utc::now();
        let row = BookingRow {
            id: 1,
            seat_id: 1,
            user_id: 1,
            booking_date: NaiveDate::from_ymd_opt(2026, 11, 3).unwrap(),
            status: "pending".into(),
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(Booking::try_from(row), Err(StoreError::Decode(_))));
    }
}
