use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::limits::MAX_STAY_NIGHTS;
use crate::model::*;
use crate::observability::WEBHOOK_DELIVERIES_TOTAL;

use super::booking::{NewReservation, check_guest_limits, validate_channel};
use super::{Engine, EngineError};

/// One booking notification from a sales channel, as delivered. Dates and the
/// room type id are still raw strings; delivery is at-least-once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookDelivery {
    pub source: String,
    pub external_id: String,
    pub room_type_id: String,
    pub guest_name: String,
    pub guest_email: String,
    pub check_in: String,
    pub check_out: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted(Reservation),
    /// This `(source, external_id)` was already ingested; nothing was written.
    Duplicate(ReservationId),
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidRoomType,
    InvalidDates,
    NoAvailability { first_blocked: NaiveDate },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::InvalidRoomType => write!(f, "invalid room type"),
            RejectReason::InvalidDates => write!(f, "invalid dates"),
            RejectReason::NoAvailability { first_blocked } => {
                write!(f, "No availability on {first_blocked}")
            }
        }
    }
}

impl IngestOutcome {
    fn label(&self) -> &'static str {
        match self {
            IngestOutcome::Accepted(_) => "accepted",
            IngestOutcome::Duplicate(_) => "duplicate",
            IngestOutcome::Rejected(RejectReason::NoAvailability { .. }) => "no_availability",
            IngestOutcome::Rejected(_) => "invalid",
        }
    }
}

/// Exclusive hold on one idempotency key. The map entry is dropped with the
/// last holder so the lock table does not grow with every delivery.
pub(super) struct DeliveryGuard<'a> {
    locks: &'a DashMap<IdempotencyKey, Arc<Mutex<()>>>,
    key: IdempotencyKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl Engine {
    /// Lock order is always delivery key first, then room type.
    pub(super) async fn lock_delivery(&self, key: &IdempotencyKey) -> DeliveryGuard<'_> {
        let lock = self
            .delivery_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        DeliveryGuard {
            locks: &self.delivery_locks,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Idempotent ingestion of a channel booking.
    ///
    /// The idempotency lookup runs first and, on a hit, returns `Duplicate`
    /// with no other effect. Otherwise the delivery is validated and goes
    /// through the same check-then-commit path as a direct booking. The
    /// delivery lock is held across lookup and insert, so two simultaneous
    /// deliveries of one key never both insert.
    pub async fn ingest(&self, delivery: WebhookDelivery) -> Result<IngestOutcome, EngineError> {
        validate_channel(&delivery.source, Some(delivery.external_id.as_str()))?;

        let key = IdempotencyKey::new(delivery.source.clone(), delivery.external_id.clone());
        let _delivery_lock = self.lock_delivery(&key).await;

        let outcome = self.ingest_locked(key, delivery).await?;
        metrics::counter!(WEBHOOK_DELIVERIES_TOTAL, "outcome" => outcome.label()).increment(1);
        Ok(outcome)
    }

    async fn ingest_locked(
        &self,
        key: IdempotencyKey,
        delivery: WebhookDelivery,
    ) -> Result<IngestOutcome, EngineError> {
        if let Some(existing) = self.find_by_idempotency_key(&key) {
            tracing::debug!(
                source = %key.source,
                external_id = %key.external_id,
                reservation_id = %existing,
                "duplicate delivery"
            );
            return Ok(IngestOutcome::Duplicate(existing));
        }

        let room_type_id = match Ulid::from_string(delivery.room_type_id.trim()) {
            Ok(id) if self.state.contains_key(&id) => id,
            _ => return Ok(IngestOutcome::Rejected(RejectReason::InvalidRoomType)),
        };

        let stay = parse_date(&delivery.check_in)
            .zip(parse_date(&delivery.check_out))
            .and_then(|(check_in, check_out)| StayRange::new(check_in, check_out))
            .filter(|stay| stay.nights() <= MAX_STAY_NIGHTS);
        let Some(stay) = stay else {
            return Ok(IngestOutcome::Rejected(RejectReason::InvalidDates));
        };

        let guest = Guest::new(delivery.guest_name, delivery.guest_email);
        check_guest_limits(&guest)?;

        let new = NewReservation {
            room_type_id,
            source: key.source,
            external_id: Some(key.external_id),
            guest,
            stay,
        };
        match self.commit_checked(new).await {
            Ok(reservation) => Ok(IngestOutcome::Accepted(reservation)),
            Err(EngineError::Conflict { first_blocked }) => Ok(IngestOutcome::Rejected(
                RejectReason::NoAvailability { first_blocked },
            )),
            Err(e) => Err(e),
        }
    }
}
