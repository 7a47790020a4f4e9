use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::model::*;

use super::{Engine, EngineError};

/// A night on which a room type holds more reservations than it has units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub room_type_id: RoomTypeId,
    pub room_type_name: String,
    pub date: NaiveDate,
    pub quantity: u32,
    /// Every reservation covering `date`.
    pub reservations: Vec<Reservation>,
}

impl Conflict {
    pub fn count(&self) -> usize {
        self.reservations.len()
    }
}

/// Every oversubscribed night of one room type, in date order.
pub fn find_conflicts(rs: &RoomTypeState) -> Vec<Conflict> {
    let mut nights: BTreeMap<NaiveDate, Vec<&Reservation>> = BTreeMap::new();
    for reservation in &rs.reservations {
        for day in reservation.stay.days() {
            nights.entry(day).or_default().push(reservation);
        }
    }

    let quantity = rs.quantity() as usize;
    nights
        .into_iter()
        .filter(|(_, covering)| covering.len() > quantity)
        .map(|(date, covering)| Conflict {
            room_type_id: rs.id(),
            room_type_name: rs.room_type.name.clone(),
            date,
            quantity: rs.quantity(),
            reservations: covering.into_iter().cloned().collect(),
        })
        .collect()
}

impl Engine {
    /// Audit the given room types. Findings are data; only a missing room
    /// type is an error. Each room type is read under its own read lock, so
    /// every result reflects one consistent snapshot of that room type.
    pub async fn scan(&self, room_type_ids: &[RoomTypeId]) -> Result<Vec<Conflict>, EngineError> {
        let mut conflicts = Vec::new();
        for id in room_type_ids {
            let rs = self
                .get_room_type_state(id)
                .ok_or(EngineError::NotFound(*id))?;
            let guard = rs.read().await;
            conflicts.extend(find_conflicts(&guard));
        }
        Ok(conflicts)
    }

    /// Audit every room type of this property.
    pub async fn scan_all(&self) -> Result<Vec<Conflict>, EngineError> {
        let mut ids: Vec<RoomTypeId> = self.state.iter().map(|e| *e.key()).collect();
        ids.sort();
        self.scan(&ids).await
    }
}
