use chrono::{NaiveDate, Utc};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKINGS_TOTAL, IMPORTS_TOTAL};

use super::availability::{Availability, check};
use super::{Engine, EngineError};

/// A reservation that has passed input validation but is not yet committed.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub room_type_id: RoomTypeId,
    pub source: String,
    pub external_id: Option<String>,
    pub guest: Guest,
    pub stay: StayRange,
}

impl NewReservation {
    fn into_reservation(self) -> Reservation {
        Reservation {
            id: Ulid::new(),
            room_type_id: self.room_type_id,
            source: self.source,
            external_id: self.external_id,
            guest_name: self.guest.name,
            guest_email: self.guest.email,
            stay: self.stay,
            created_at: Utc::now(),
        }
    }
}

pub(super) fn validate_stay(check_in: NaiveDate, check_out: NaiveDate) -> Result<StayRange, EngineError> {
    let stay = StayRange::new(check_in, check_out)
        .ok_or_else(|| EngineError::Validation("check-out must be after check-in".into()))?;
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(stay)
}

pub(super) fn validate_guest(guest: &Guest) -> Result<(), EngineError> {
    if guest.name.trim().is_empty() {
        return Err(EngineError::Validation("guest name required".into()));
    }
    if guest.email.trim().is_empty() {
        return Err(EngineError::Validation("guest email required".into()));
    }
    check_guest_limits(guest)
}

pub(super) fn check_guest_limits(guest: &Guest) -> Result<(), EngineError> {
    if guest.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("guest name too long"));
    }
    if guest.email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("guest email too long"));
    }
    Ok(())
}

pub(super) fn validate_channel(source: &str, external_id: Option<&str>) -> Result<(), EngineError> {
    if source.trim().is_empty() {
        return Err(EngineError::Validation("source required".into()));
    }
    if source.len() > MAX_SOURCE_LEN {
        return Err(EngineError::LimitExceeded("source too long"));
    }
    if external_id.is_some_and(|ext| ext.len() > MAX_EXTERNAL_ID_LEN) {
        return Err(EngineError::LimitExceeded("external id too long"));
    }
    Ok(())
}

fn validate_room_type(room_type: &RoomType) -> Result<(), EngineError> {
    if room_type.name.trim().is_empty() {
        return Err(EngineError::Validation("room type name required".into()));
    }
    if room_type.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("room type name too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn register_room_type(&self, room_type: RoomType) -> Result<(), EngineError> {
        validate_room_type(&room_type)?;
        let _registering = self.registrations.lock().await;
        if self.state.len() >= MAX_ROOM_TYPES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many room types"));
        }
        if self.state.contains_key(&room_type.id) {
            return Err(EngineError::AlreadyExists(room_type.id));
        }
        let id = room_type.id;
        let quantity = room_type.quantity;
        self.persist_registration(room_type).await?;
        tracing::info!(room_type_id = %id, quantity, "room type registered");
        Ok(())
    }

    /// Replace a room type's attributes. Lowering `quantity` below current
    /// occupancy is allowed; the reconciliation scan reports the overflow.
    pub async fn update_room_type(&self, room_type: RoomType) -> Result<(), EngineError> {
        validate_room_type(&room_type)?;
        let rs = self
            .get_room_type_state(&room_type.id)
            .ok_or(EngineError::NotFound(room_type.id))?;
        let mut guard = rs.write().await;
        let previous = guard.quantity();
        let quantity = room_type.quantity;
        let event = Event::RoomTypeUpdated { room_type };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(room_type_id = %guard.id(), previous, quantity, "room type updated");
        Ok(())
    }

    /// Direct booking. Validates the stay and guest, then checks and commits
    /// under the room type's write lock.
    pub async fn book(
        &self,
        room_type_id: RoomTypeId,
        guest: Guest,
        check_in: NaiveDate,
        check_out: NaiveDate,
        source: &str,
    ) -> Result<Reservation, EngineError> {
        let stay = validate_stay(check_in, check_out)?;
        validate_guest(&guest)?;
        validate_channel(source, None)?;

        let result = self
            .commit_checked(NewReservation {
                room_type_id,
                source: source.to_string(),
                external_id: None,
                guest,
                stay,
            })
            .await;
        let outcome = match &result {
            Ok(_) => "confirmed",
            Err(EngineError::Conflict { .. }) => "rejected",
            Err(_) => "error",
        };
        metrics::counter!(BOOKINGS_TOTAL, "source" => source.to_string(), "outcome" => outcome)
            .increment(1);
        result
    }

    /// The atomic check-then-insert. The room type's write lock is held from
    /// reading its reservations until the new row is applied, so concurrent
    /// attempts on the same room type are linearized.
    pub(super) async fn commit_checked(&self, new: NewReservation) -> Result<Reservation, EngineError> {
        let rs = self
            .get_room_type_state(&new.room_type_id)
            .ok_or(EngineError::NotFound(new.room_type_id))?;
        let mut guard = rs.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM_TYPE {
            return Err(EngineError::LimitExceeded("too many reservations on room type"));
        }

        if let Availability::Blocked(first_blocked) = check(&guard, &new.stay) {
            tracing::debug!(
                room_type_id = %new.room_type_id,
                stay = %new.stay,
                %first_blocked,
                "booking rejected: no availability"
            );
            return Err(EngineError::Conflict { first_blocked });
        }

        let reservation = new.into_reservation();
        let event = Event::ReservationCommitted {
            reservation: reservation.clone(),
            imported: false,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(
            room_type_id = %reservation.room_type_id,
            reservation_id = %reservation.id,
            source = %reservation.source,
            stay = %reservation.stay,
            "reservation committed"
        );
        Ok(reservation)
    }

    /// Bulk-import path. Skips the capacity check but still enforces valid
    /// dates, an existing room type and `(source, external_id)` uniqueness.
    pub async fn import_reservation(&self, new: NewReservation) -> Result<Reservation, EngineError> {
        validate_channel(&new.source, new.external_id.as_deref())?;
        check_guest_limits(&new.guest)?;
        if new.stay.nights() > MAX_STAY_NIGHTS {
            return Err(EngineError::LimitExceeded("stay too long"));
        }

        let key = new
            .external_id
            .as_ref()
            .map(|ext| IdempotencyKey::new(new.source.clone(), ext.clone()));
        let _delivery = match &key {
            Some(key) => Some(self.lock_delivery(key).await),
            None => None,
        };
        if let Some(existing) = key.as_ref().and_then(|k| self.find_by_idempotency_key(k)) {
            metrics::counter!(IMPORTS_TOTAL, "outcome" => "duplicate").increment(1);
            return Err(EngineError::DuplicateDelivery(existing));
        }

        let rs = self
            .get_room_type_state(&new.room_type_id)
            .ok_or(EngineError::NotFound(new.room_type_id))?;
        let mut guard = rs.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM_TYPE {
            return Err(EngineError::LimitExceeded("too many reservations on room type"));
        }
        if let Availability::Blocked(day) = check(&guard, &new.stay) {
            tracing::warn!(
                room_type_id = %new.room_type_id,
                stay = %new.stay,
                first_full_night = %day,
                "imported reservation oversubscribes room type"
            );
        }

        let reservation = new.into_reservation();
        let event = Event::ReservationCommitted {
            reservation: reservation.clone(),
            imported: true,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(IMPORTS_TOTAL, "outcome" => "imported").increment(1);
        tracing::info!(
            room_type_id = %reservation.room_type_id,
            reservation_id = %reservation.id,
            source = %reservation.source,
            "reservation imported"
        );
        Ok(reservation)
    }
}
