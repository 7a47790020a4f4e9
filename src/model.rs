use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type RoomTypeId = Ulid;
pub type ReservationId = Ulid;

/// Channel name used for bookings taken through the property's own front desk.
pub const DIRECT_SOURCE: &str = "direct";

/// Half-open stay `[check_in, check_out)`. A checkout and a check-in on the
/// same day never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StayRange {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl StayRange {
    /// Returns `None` unless `check_in < check_out`.
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Option<Self> {
        (check_in < check_out).then_some(Self { check_in, check_out })
    }

    /// The single night starting on `day`.
    pub fn night(day: NaiveDate) -> Self {
        Self {
            check_in: day,
            check_out: day.succ_opt().unwrap_or(NaiveDate::MAX),
        }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn overlaps(&self, other: &StayRange) -> bool {
        !(self.check_out <= other.check_in || self.check_in >= other.check_out)
    }

    pub fn covers(&self, day: NaiveDate) -> bool {
        self.check_in <= day && day < self.check_out
    }

    /// Every night of the stay, in increasing order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + Clone + use<> {
        let end = self.check_out;
        self.check_in.iter_days().take_while(move |d| *d < end)
    }
}

impl std::fmt::Display for StayRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.check_in, self.check_out)
    }
}

/// Parse a calendar date the way channel payloads send them: plain dates,
/// RFC 3339 timestamps or naive `T`-separated datetimes. Only the date is kept.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.date())
}

/// `day + n` days, saturating at the calendar's end.
pub fn add_days(day: NaiveDate, n: u32) -> NaiveDate {
    day.checked_add_days(Days::new(u64::from(n)))
        .unwrap_or(NaiveDate::MAX)
}

/// Idempotency key for externally delivered bookings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub source: String,
    pub external_id: String,
}

impl IdempotencyKey {
    pub fn new(source: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            external_id: external_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomType {
    pub id: RoomTypeId,
    pub name: String,
    /// Max guests per unit. Informational only.
    pub capacity: u32,
    /// Number of identical sellable units.
    pub quantity: u32,
    /// Nightly price in minor currency units.
    pub price: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub room_type_id: RoomTypeId,
    pub source: String,
    pub external_id: Option<String>,
    pub guest_name: String,
    pub guest_email: String,
    pub stay: StayRange,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn idempotency_key(&self) -> Option<IdempotencyKey> {
        self.external_id
            .as_ref()
            .map(|ext| IdempotencyKey::new(self.source.clone(), ext.clone()))
    }
}

/// Who is staying. Carried by every booking path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guest {
    pub name: String,
    pub email: String,
}

impl Guest {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// A room type together with every reservation committed against it.
#[derive(Debug, Clone)]
pub struct RoomTypeState {
    pub room_type: RoomType,
    /// Sorted by `stay.check_in`.
    pub reservations: Vec<Reservation>,
}

impl RoomTypeState {
    pub fn new(room_type: RoomType) -> Self {
        Self {
            room_type,
            reservations: Vec::new(),
        }
    }

    pub fn id(&self) -> RoomTypeId {
        self.room_type.id
    }

    pub fn quantity(&self) -> u32 {
        self.room_type.quantity
    }

    /// Insert maintaining sort order by check-in.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.stay.check_in <= reservation.stay.check_in);
        self.reservations.insert(pos, reservation);
    }

    /// Reservations whose stay overlaps `query`. Binary search skips
    /// everything checking in on or after `query.check_out`.
    pub fn overlapping(&self, query: &StayRange) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.stay.check_in < query.check_out);
        let start = query.check_in;
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.stay.check_out > start)
    }
}

/// The durable record format. Flat, append-only: nothing is ever deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomTypeRegistered {
        room_type: RoomType,
    },
    RoomTypeUpdated {
        room_type: RoomType,
    },
    ReservationCommitted {
        reservation: Reservation,
        /// Written by the import path, which skips the capacity check.
        imported: bool,
    },
}

impl Event {
    pub fn room_type_id(&self) -> RoomTypeId {
        match self {
            Event::RoomTypeRegistered { room_type } | Event::RoomTypeUpdated { room_type } => {
                room_type.id
            }
            Event::ReservationCommitted { reservation, .. } => reservation.room_type_id,
        }
    }
}
