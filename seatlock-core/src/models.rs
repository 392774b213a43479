use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type SeatId = i64;
pub type UserId = i64;
pub type BookingId = i64;

/// A bookable seat. Created once by the catalog bootstrap and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub id: SeatId,
    pub section: String,
    pub seat_number: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {}", other)),
        }
    }
}

/// Profile of a registered user. Registration itself happens elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// One reservation of a seat for a calendar date.
///
/// Rows are never deleted: a cancelled booking stays as history and a
/// re-booking creates a new row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub seat_id: SeatId,
    pub user_id: UserId,
    pub booking_date: NaiveDate,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatDetails {
    pub section: String,
    pub seat_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingWithSeat {
    #[serde(flatten)]
    pub booking: Booking,
    pub seat_details: SeatDetails,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        assert_eq!("confirmed".parse::<BookingStatus>(), Ok(BookingStatus::Confirmed));
        assert_eq!(BookingStatus::Cancelled.to_string(), "cancelled");
        assert!("pending".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn test_booking_with_seat_flattens_booking_fields() {
        let now = Utc::now();
        let row = BookingWithSeat {
            booking: Booking {
                id: 7,
                seat_id: 3,
                user_id: 11,
                booking_date: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
                status: BookingStatus::Confirmed,
                created_at: now,
                updated_at: now,
            },
            seat_details: SeatDetails { section: "LNRS".into(), seat_number: "04".into() },
        };

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["status"], "confirmed");
        assert_eq!(json["booking_date"], "2026-11-02");
        assert_eq!(json["seat_details"]["seat_number"], "04");
    }
}
