use chrono::{NaiveDate, NaiveDateTime, Utc};
use ulid::Ulid;

use crate::model::*;

use super::availability::compute_available_slots;
use super::{Catalog, Engine, EngineError};

fn booked_slot(catalog: &Catalog, b: &Booking) -> BookedSlot {
    let event_type = catalog.get(&b.event_type_id);
    BookedSlot {
        booking_id: b.id,
        start: b.start,
        end: b.end,
        duration: event_type.map_or(b.span().duration() as u32, |et| et.duration),
        buffer: event_type.map_or(0, |et| et.buffer),
    }
}

impl Engine {
    /// The saved schedule, if the host ever saved or read one.
    pub async fn weekly_schedule(&self) -> Option<WeeklySchedule> {
        self.schedule.read().await.clone()
    }

    /// Current wall-clock time in the host's timezone.
    pub async fn now_local(&self) -> NaiveDateTime {
        let tz = self
            .schedule
            .read()
            .await
            .as_ref()
            .map(WeeklySchedule::tz)
            .unwrap_or_else(|| WeeklySchedule::default().tz());
        Utc::now().with_timezone(&tz).naive_local()
    }

    /// Today's date in the host's timezone.
    pub async fn today(&self) -> NaiveDate {
        self.now_local().await.date()
    }

    pub async fn get_override(&self, date: NaiveDate) -> Option<DateOverride> {
        let day = self.get_day(date)?;
        let guard = day.read().await;
        guard.date_override.clone()
    }

    /// Every override, ascending by date.
    pub async fn list_overrides(&self) -> Vec<DateOverride> {
        let mut out = Vec::new();
        for day in self.sorted_days() {
            if let Some(o) = &day.read().await.date_override {
                out.push(o.clone());
            }
        }
        out
    }

    pub async fn get_event_type(&self, target: &EventTypeRef) -> Option<EventType> {
        self.catalog.read().await.resolve(target).cloned()
    }

    /// All event types, sorted by title.
    pub async fn list_event_types(&self) -> Vec<EventType> {
        let catalog = self.catalog.read().await;
        let mut out: Vec<EventType> = catalog.iter().cloned().collect();
        out.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn get_booking(&self, id: Ulid) -> Option<Booking> {
        let day = self.get_day(self.booking_date(&id)?)?;
        let guard = day.read().await;
        guard.bookings.iter().find(|b| b.id == id).cloned()
    }

    /// Active bookings on `date` with their event type's duration and buffer.
    pub async fn list_booked_slots(&self, date: NaiveDate) -> Vec<BookedSlot> {
        let catalog = self.catalog.read().await;
        let Some(day) = self.get_day(date) else {
            return Vec::new();
        };
        let guard = day.read().await;
        guard.active_bookings().map(|b| booked_slot(&catalog, b)).collect()
    }

    /// Bookings in `tab` relative to `now` (host-local), ordered by date then start.
    pub async fn list_bookings(&self, tab: BookingTab, now: NaiveDateTime) -> Vec<BookingInfo> {
        let catalog = self.catalog.read().await;
        let mut out = Vec::new();
        for day in self.sorted_days() {
            let guard = day.read().await;
            for booking in guard.bookings.iter().filter(|b| tab.matches(b, now)) {
                let event_type = catalog.get(&booking.event_type_id);
                out.push(BookingInfo {
                    booking: booking.clone(),
                    event_type_title: event_type.map(|et| et.title.clone()),
                    event_type_duration: event_type.map(|et| et.duration),
                });
            }
        }
        out
    }

    /// Open slots for an event type on `date`, formatted for display.
    pub async fn available_slots(
        &self,
        date: NaiveDate,
        target: &EventTypeRef,
        today: NaiveDate,
        format: ClockFormat,
    ) -> Result<Vec<String>, EngineError> {
        let catalog = self.catalog.read().await;
        let event_type = catalog
            .resolve(target)
            .ok_or_else(|| EngineError::NotFound(format!("event type {target}")))?;
        let schedule = self.schedule.read().await.clone().unwrap_or_default();

        let (date_override, existing) = match self.get_day(date) {
            Some(day) => {
                let guard = day.read().await;
                let existing: Vec<BookedSlot> =
                    guard.active_bookings().map(|b| booked_slot(&catalog, b)).collect();
                (guard.date_override.clone(), existing)
            }
            None => (None, Vec::new()),
        };

        Ok(compute_available_slots(
            date,
            &schedule,
            date_override.as_ref(),
            event_type,
            &existing,
            today,
            format,
        ))
    }
}
