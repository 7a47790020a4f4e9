mod availability;
mod booking;
mod calendar;
mod error;
mod ingest;
pub mod journal;
mod queries;
mod reconcile;

pub use availability::{Availability, check, occupancy};
pub use booking::NewReservation;
pub use calendar::{CalendarDay, CalendarDays, CalendarEvent, CalendarSnapshot};
pub use error::EngineError;
pub use ingest::{IngestOutcome, RejectReason, WebhookDelivery};
pub use journal::{Journal, MemoryJournal, WalJournal};
pub use queries::ReservationFilter;
pub use reconcile::{Conflict, find_conflicts};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};

use crate::model::*;
use crate::notify::NotifyHub;

pub type SharedRoomTypeState = Arc<RwLock<RoomTypeState>>;

/// The booking engine for one property. Each room type sits behind its own
/// `RwLock`; holding the write lock is the unit of work for that room type.
pub struct Engine {
    pub(super) state: DashMap<RoomTypeId, SharedRoomTypeState>,
    journal: Arc<dyn Journal>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation id → room type id
    pub(super) reservation_index: DashMap<ReservationId, RoomTypeId>,
    /// `(source, external_id)` → the reservation that claimed it.
    pub(super) idempotency: DashMap<IdempotencyKey, ReservationId>,
    /// Serializes concurrent deliveries carrying the same idempotency key.
    pub(super) delivery_locks: DashMap<IdempotencyKey, Arc<Mutex<()>>>,
    /// Held from the duplicate-id check of a registration until it is applied.
    pub(super) registrations: Mutex<()>,
}

/// Apply a reservation or room-type update to its room type (no locking: caller holds the lock).
fn apply_to_room_type(
    rs: &mut RoomTypeState,
    event: &Event,
    reservation_index: &DashMap<ReservationId, RoomTypeId>,
    idempotency: &DashMap<IdempotencyKey, ReservationId>,
) {
    match event {
        Event::RoomTypeUpdated { room_type } => {
            rs.room_type = room_type.clone();
        }
        Event::ReservationCommitted { reservation, .. } => {
            reservation_index.insert(reservation.id, reservation.room_type_id);
            if let Some(key) = reservation.idempotency_key() {
                idempotency.insert(key, reservation.id);
            }
            rs.insert_reservation(reservation.clone());
        }
        // Registration is handled at the DashMap level
        Event::RoomTypeRegistered { .. } => {}
    }
}

impl Engine {
    /// Build an engine over `journal`, rebuilding state from `history`
    /// (the events previously committed to that journal).
    pub fn new(journal: Arc<dyn Journal>, history: Vec<Event>, notify: Arc<NotifyHub>) -> Self {
        let engine = Self {
            state: DashMap::new(),
            journal,
            notify,
            reservation_index: DashMap::new(),
            idempotency: DashMap::new(),
            delivery_locks: DashMap::new(),
            registrations: Mutex::new(()),
        };

        // Replay into plain values first; nothing else can observe them yet.
        let mut rooms: HashMap<RoomTypeId, RoomTypeState> = HashMap::new();
        for event in &history {
            match event {
                Event::RoomTypeRegistered { room_type } => {
                    rooms.insert(room_type.id, RoomTypeState::new(room_type.clone()));
                }
                other => match rooms.get_mut(&other.room_type_id()) {
                    Some(rs) => apply_to_room_type(
                        rs,
                        other,
                        &engine.reservation_index,
                        &engine.idempotency,
                    ),
                    None => tracing::warn!(
                        room_type_id = %other.room_type_id(),
                        "replay: event for unknown room type skipped"
                    ),
                },
            }
        }
        for (id, rs) in rooms {
            engine.state.insert(id, Arc::new(RwLock::new(rs)));
        }

        engine
    }

    /// Open the WAL at `wal_path`, replay it and start the group-commit writer.
    pub fn open(wal_path: &Path, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let (journal, history) = WalJournal::open(wal_path)?;
        let engine = Self::new(Arc::new(journal), history, notify);
        tracing::info!(
            wal = %wal_path.display(),
            room_types = engine.state.len(),
            reservations = engine.reservation_index.len(),
            "engine opened"
        );
        Ok(engine)
    }

    /// Engine with no durable storage.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryJournal::new()),
            Vec::new(),
            Arc::new(NotifyHub::new()),
        )
    }

    /// Journal-append + apply + notify. Nothing becomes visible unless the
    /// append succeeded.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomTypeState,
        event: &Event,
    ) -> Result<(), EngineError> {
        if let Err(e) = self.journal.append(event).await {
            tracing::error!(room_type_id = %rs.id(), "journal append failed: {e}");
            return Err(e);
        }
        apply_to_room_type(rs, event, &self.reservation_index, &self.idempotency);
        self.notify.publish(event);
        Ok(())
    }

    /// Journal-append a registration and publish the new room type.
    pub(super) async fn persist_registration(&self, room_type: RoomType) -> Result<(), EngineError> {
        let id = room_type.id;
        let event = Event::RoomTypeRegistered {
            room_type: room_type.clone(),
        };
        self.journal.append(&event).await?;
        self.state
            .insert(id, Arc::new(RwLock::new(RoomTypeState::new(room_type))));
        self.notify.publish(&event);
        Ok(())
    }
}
