use chrono::NaiveDate;
use serde::Serialize;

use crate::limits::MAX_CALENDAR_DAYS;
use crate::model::*;

use super::{Engine, EngineError};

/// A reservation as it appears on the calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEvent {
    pub reservation_id: ReservationId,
    /// `"<guest> (<source>)"`
    pub title: String,
    pub source: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl CalendarEvent {
    fn from_reservation(r: &Reservation) -> Self {
        Self {
            reservation_id: r.id,
            title: format!("{} ({})", r.guest_name, r.source),
            source: r.source.clone(),
            check_in: r.stay.check_in,
            check_out: r.stay.check_out,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub available: u32,
    /// Reservations covering `date`.
    pub events: Vec<CalendarEvent>,
}

/// Rows fetched for one room type over a window. Pure data: iterating it
/// never touches the engine, and `days()` can be called any number of times.
#[derive(Debug, Clone)]
pub struct CalendarSnapshot {
    pub room_type_id: RoomTypeId,
    pub quantity: u32,
    pub from: NaiveDate,
    pub window_days: u32,
    reservations: Vec<Reservation>,
}

impl CalendarSnapshot {
    pub fn build(rs: &RoomTypeState, from: NaiveDate, window_days: u32) -> Self {
        let reservations = StayRange::new(from, add_days(from, window_days))
            .map(|window| rs.overlapping(&window).cloned().collect())
            .unwrap_or_default();
        Self {
            room_type_id: rs.id(),
            quantity: rs.quantity(),
            from,
            window_days,
            reservations,
        }
    }

    pub fn days(&self) -> CalendarDays<'_> {
        CalendarDays {
            snapshot: self,
            offset: 0,
        }
    }

    /// Every reservation touching the window, ordered by check-in.
    pub fn events(&self) -> impl Iterator<Item = CalendarEvent> + '_ {
        self.reservations.iter().map(CalendarEvent::from_reservation)
    }
}

#[derive(Debug, Clone)]
pub struct CalendarDays<'a> {
    snapshot: &'a CalendarSnapshot,
    offset: u32,
}

impl Iterator for CalendarDays<'_> {
    type Item = CalendarDay;

    fn next(&mut self) -> Option<CalendarDay> {
        if self.offset >= self.snapshot.window_days {
            return None;
        }
        let date = self
            .snapshot
            .from
            .checked_add_days(chrono::Days::new(u64::from(self.offset)))?;
        self.offset += 1;

        let events: Vec<CalendarEvent> = self
            .snapshot
            .reservations
            .iter()
            .filter(|r| r.stay.covers(date))
            .map(CalendarEvent::from_reservation)
            .collect();
        let occupied = events.len() as u32;
        Some(CalendarDay {
            date,
            available: self.snapshot.quantity.saturating_sub(occupied),
            events,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.snapshot.window_days.saturating_sub(self.offset) as usize;
        (0, Some(remaining))
    }
}

impl Engine {
    /// Fetch the rows for a calendar window. The returned snapshot is
    /// detached from the engine.
    pub async fn calendar(
        &self,
        room_type_id: RoomTypeId,
        from: NaiveDate,
        window_days: u32,
    ) -> Result<CalendarSnapshot, EngineError> {
        if window_days > MAX_CALENDAR_DAYS {
            return Err(EngineError::LimitExceeded("calendar window too wide"));
        }
        let rs = self
            .get_room_type_state(&room_type_id)
            .ok_or(EngineError::NotFound(room_type_id))?;
        let guard = rs.read().await;
        Ok(CalendarSnapshot::build(&guard, from, window_days))
    }
}
