use chrono::NaiveDate;

use crate::model::*;

use super::{Engine, EngineError, SharedRoomTypeState};

/// Admin listing filter. `date_from` keeps stays checking out after it,
/// `date_to` keeps stays checking in before it.
#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    pub room_type_id: Option<RoomTypeId>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl ReservationFilter {
    fn matches(&self, r: &Reservation) -> bool {
        self.date_from.is_none_or(|from| r.stay.check_out > from)
            && self.date_to.is_none_or(|to| r.stay.check_in < to)
    }
}

impl Engine {
    pub fn get_room_type_state(&self, id: &RoomTypeId) -> Option<SharedRoomTypeState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub async fn room_type(&self, id: RoomTypeId) -> Result<RoomType, EngineError> {
        let rs = self
            .get_room_type_state(&id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.room_type.clone())
    }

    /// All room types, ordered by name.
    pub async fn list_room_types(&self) -> Vec<RoomType> {
        let shared: Vec<SharedRoomTypeState> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut room_types = Vec::with_capacity(shared.len());
        for rs in shared {
            room_types.push(rs.read().await.room_type.clone());
        }
        room_types.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        room_types
    }

    /// Every reservation committed against one room type, by check-in.
    pub async fn reservations_for(&self, room_type_id: RoomTypeId) -> Result<Vec<Reservation>, EngineError> {
        let rs = self
            .get_room_type_state(&room_type_id)
            .ok_or(EngineError::NotFound(room_type_id))?;
        let guard = rs.read().await;
        Ok(guard.reservations.clone())
    }

    pub async fn reservation(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        let room_type_id = self
            .reservation_index
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .get_room_type_state(&room_type_id)
            .ok_or(EngineError::NotFound(room_type_id))?;
        let guard = rs.read().await;
        guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    pub fn find_by_idempotency_key(&self, key: &IdempotencyKey) -> Option<ReservationId> {
        self.idempotency.get(key).map(|e| *e.value())
    }

    /// Filtered listing across room types, newest first.
    pub async fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, EngineError> {
        let ids: Vec<RoomTypeId> = match filter.room_type_id {
            Some(id) => vec![id],
            None => self.state.iter().map(|e| *e.key()).collect(),
        };
        let mut out = Vec::new();
        for id in ids {
            let rs = self
                .get_room_type_state(&id)
                .ok_or(EngineError::NotFound(id))?;
            let guard = rs.read().await;
            out.extend(guard.reservations.iter().filter(|r| filter.matches(r)).cloned());
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }
}
