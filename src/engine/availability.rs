use chrono::NaiveDate;
use serde::Serialize;

use crate::model::*;

use super::booking::validate_stay;
use super::{Engine, EngineError};

/// Outcome of an availability check over a stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Availability {
    Available,
    /// The earliest night on which every unit is already taken.
    Blocked(NaiveDate),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }

    pub fn first_blocked(&self) -> Option<NaiveDate> {
        match self {
            Availability::Available => None,
            Availability::Blocked(day) => Some(*day),
        }
    }
}

/// Number of reservations on this room type whose stay covers `day`.
pub fn occupancy(rs: &RoomTypeState, day: NaiveDate) -> u32 {
    rs.overlapping(&StayRange::night(day)).count() as u32
}

/// Walk the stay night by night and stop at the first night that is already
/// at quantity. Cost is nights × reservations overlapping the stay.
pub fn check(rs: &RoomTypeState, stay: &StayRange) -> Availability {
    let quantity = rs.quantity();
    // Only reservations touching the stay can block it.
    let candidates: Vec<&Reservation> = rs.overlapping(stay).collect();

    for day in stay.days() {
        let occupied = candidates.iter().filter(|r| r.stay.covers(day)).count() as u32;
        if occupied >= quantity {
            return Availability::Blocked(day);
        }
    }
    Availability::Available
}

impl Engine {
    /// Read-only probe: would a stay on this room type be accepted right now?
    pub async fn check_availability(
        &self,
        room_type_id: RoomTypeId,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<Availability, EngineError> {
        let stay = validate_stay(check_in, check_out)?;
        let rs = self
            .get_room_type_state(&room_type_id)
            .ok_or(EngineError::NotFound(room_type_id))?;
        let guard = rs.read().await;
        Ok(check(&guard, &stay))
    }
}
