use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::{Engine, EngineError};
use crate::observability::CONFLICTS_DETECTED;

/// Background task that periodically runs the reconciliation scan over every
/// room type of one property and reports oversubscribed nights.
pub async fn run_auditor(property: String, engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately; skip it so startup stays quiet.
    interval.tick().await;
    loop {
        interval.tick().await;
        if let Err(e) = audit_once(&property, &engine).await {
            tracing::debug!(%property, "audit skipped: {e}");
        }
    }
}

/// One reconciliation pass. Returns the number of oversubscribed nights.
pub async fn audit_once(property: &str, engine: &Engine) -> Result<usize, EngineError> {
    let conflicts = engine.scan_all().await?;
    for conflict in &conflicts {
        warn!(
            %property,
            room_type_id = %conflict.room_type_id,
            room_type = %conflict.room_type_name,
            date = %conflict.date,
            booked = conflict.count(),
            quantity = conflict.quantity,
            "oversubscribed night"
        );
    }
    metrics::gauge!(CONFLICTS_DETECTED, "property" => property.to_string())
        .set(conflicts.len() as f64);
    if !conflicts.is_empty() {
        info!(%property, nights = conflicts.len(), "audit found conflicts");
    }
    Ok(conflicts.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NewReservation;
    use crate::model::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn audit_counts_oversubscribed_nights() {
        let engine = Engine::in_memory();
        let id = Ulid::new();
        engine
            .register_room_type(RoomType {
                id,
                name: "Twin".into(),
                capacity: 2,
                quantity: 1,
                price: 180_000,
            })
            .await
            .unwrap();
        assert_eq!(audit_once("seaview", &engine).await.unwrap(), 0);

        for ext in ["A1", "A2"] {
            engine
                .import_reservation(NewReservation {
                    room_type_id: id,
                    source: "legacy-pms".into(),
                    external_id: Some(ext.into()),
                    guest: Guest::new("Imported", "imported@example.com"),
                    stay: StayRange::new(d("2024-05-01"), d("2024-05-03")).unwrap(),
                })
                .await
                .unwrap();
        }
        assert_eq!(audit_once("seaview", &engine).await.unwrap(), 2);
    }
}
