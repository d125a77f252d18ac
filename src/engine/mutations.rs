use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::BOOKINGS_TOTAL;

use super::conflict::{
    check_date_open, check_no_overlap, now_ms, validate_booking, validate_event_type,
    validate_override,
};
use super::{Catalog, ConflictKind, Engine, EngineError, WalCommand};

fn ensure_slug_free(catalog: &Catalog, slug: &str, owner: Option<Ulid>) -> Result<(), EngineError> {
    match catalog.slug_owner(slug) {
        Some(existing) if Some(existing) != owner => {
            Err(EngineError::AlreadyExists(format!("event type slug {slug}")))
        }
        _ => Ok(()),
    }
}

fn booking_outcome(result: &Result<Booking, EngineError>) -> &'static str {
    match result {
        Ok(_) => "created",
        Err(EngineError::Conflict(_)) => "conflict",
        Err(_) => "rejected",
    }
}

impl Engine {
    // ── Weekly schedule ──────────────────────────────────

    pub async fn save_weekly_schedule(&self, schedule: WeeklySchedule) -> Result<(), EngineError> {
        schedule.validate().map_err(EngineError::Validation)?;
        let _catalog = self.catalog.read().await;
        let mut current = self.schedule.write().await;
        let event = Event::ScheduleSaved {
            schedule: schedule.clone(),
        };
        self.wal_append(&event).await?;
        *current = Some(schedule);
        tracing::debug!(host = %self.host, "weekly schedule saved");
        Ok(())
    }

    /// The saved schedule, persisting the default on first use.
    pub async fn schedule_or_default(&self) -> Result<WeeklySchedule, EngineError> {
        if let Some(schedule) = self.schedule.read().await.as_ref() {
            return Ok(schedule.clone());
        }
        let _catalog = self.catalog.read().await;
        let mut current = self.schedule.write().await;
        if let Some(schedule) = current.as_ref() {
            return Ok(schedule.clone());
        }
        let schedule = WeeklySchedule::default();
        self.wal_append(&Event::ScheduleSaved {
            schedule: schedule.clone(),
        })
        .await?;
        *current = Some(schedule.clone());
        tracing::info!(host = %self.host, "default weekly schedule created");
        Ok(schedule)
    }

    // ── Date overrides ───────────────────────────────────

    /// Replace the override of every listed date with `payload`.
    pub async fn save_date_overrides(
        &self,
        mut dates: Vec<NaiveDate>,
        payload: OverridePayload,
    ) -> Result<(), EngineError> {
        validate_override(&payload)?;
        dates.sort();
        dates.dedup();
        if dates.is_empty() {
            return Ok(());
        }
        if dates.len() > MAX_OVERRIDE_DATES {
            return Err(EngineError::LimitExceeded("too many override dates"));
        }

        let _catalog = self.catalog.read().await;
        // Ascending date order prevents deadlocks with other multi-date writers.
        let mut guards = Vec::with_capacity(dates.len());
        for date in &dates {
            guards.push(self.day_or_insert(*date).write_owned().await);
        }

        let event = Event::OverridesReplaced { dates, payload };
        self.wal_append(&event).await?;
        for guard in guards.iter_mut() {
            super::apply_to_day(guard, &event);
        }
        tracing::debug!(host = %self.host, dates = guards.len(), "date overrides saved");
        Ok(())
    }

    pub async fn delete_date_override(&self, date: NaiveDate) -> Result<(), EngineError> {
        let _catalog = self.catalog.read().await;
        let missing = || EngineError::NotFound(format!("override for {date}"));
        let day = self.get_day(date).ok_or_else(missing)?;
        let mut guard = day.write().await;
        if guard.date_override.is_none() {
            return Err(missing());
        }
        self.persist_day(&mut guard, &Event::OverrideDeleted { date }).await
    }

    // ── Event types ──────────────────────────────────────

    pub async fn create_event_type(&self, id: Ulid, draft: EventTypeDraft) -> Result<EventType, EngineError> {
        let slug = validate_event_type(&draft)?;
        let mut catalog = self.catalog.write().await;
        if catalog.len() >= MAX_EVENT_TYPES_PER_HOST {
            return Err(EngineError::LimitExceeded("too many event types"));
        }
        if catalog.get(&id).is_some() {
            return Err(EngineError::AlreadyExists(format!("event type {id}")));
        }
        ensure_slug_free(&catalog, &slug, None)?;

        let event_type = EventType {
            id,
            title: draft.title.trim().to_string(),
            slug,
            description: draft.description,
            duration: draft.duration,
            buffer: draft.buffer,
        };
        let event = Event::EventTypeCreated {
            event_type: event_type.clone(),
        };
        self.persist_catalog(&mut catalog, &event).await?;
        tracing::debug!(host = %self.host, %id, slug = %event_type.slug, "event type created");
        Ok(event_type)
    }

    pub async fn update_event_type(&self, id: Ulid, draft: EventTypeDraft) -> Result<EventType, EngineError> {
        let slug = validate_event_type(&draft)?;
        let mut catalog = self.catalog.write().await;
        if catalog.get(&id).is_none() {
            return Err(EngineError::NotFound(format!("event type {id}")));
        }
        ensure_slug_free(&catalog, &slug, Some(id))?;

        let event_type = EventType {
            id,
            title: draft.title.trim().to_string(),
            slug,
            description: draft.description,
            duration: draft.duration,
            buffer: draft.buffer,
        };
        let event = Event::EventTypeUpdated {
            event_type: event_type.clone(),
        };
        self.persist_catalog(&mut catalog, &event).await?;
        Ok(event_type)
    }

    /// Refused while any active booking references the type. Cancelled bookings
    /// keep their dangling reference.
    pub async fn delete_event_type(&self, id: Ulid) -> Result<(), EngineError> {
        let mut catalog = self.catalog.write().await;
        if catalog.get(&id).is_none() {
            return Err(EngineError::NotFound(format!("event type {id}")));
        }
        for day in self.sorted_days() {
            let guard = day.read().await;
            if guard.active_bookings().any(|b| b.event_type_id == id) {
                return Err(EngineError::Conflict(ConflictKind::EventTypeInUse { event_type_id: id }));
            }
        }
        self.persist_catalog(&mut catalog, &Event::EventTypeDeleted { id }).await?;
        tracing::debug!(host = %self.host, %id, "event type deleted");
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────

    /// Admission control: validate, then check the date block and overlap rule
    /// and commit, all under the date's write lock.
    pub async fn create_booking(&self, req: NewBooking) -> Result<Booking, EngineError> {
        let result = self.admit_booking(req).await;
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => booking_outcome(&result)).increment(1);
        result
    }

    async fn admit_booking(&self, req: NewBooking) -> Result<Booking, EngineError> {
        validate_booking(&req)?;
        let catalog = self.catalog.read().await;
        if catalog.get(&req.event_type_id).is_none() {
            return Err(EngineError::NotFound(format!("event type {}", req.event_type_id)));
        }
        if self.booking_dates.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(format!("booking {}", req.id)));
        }

        let day = self.day_or_insert(req.date);
        let mut guard = day.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings on date"));
        }
        check_date_open(&guard)?;
        let span = Span::new(req.start.minutes(), req.end.minutes());
        check_no_overlap(&guard, &catalog, &span)?;

        // Reserve the id; a concurrent request for another date may carry the same one.
        match self.booking_dates.entry(req.id) {
            Entry::Occupied(_) => {
                return Err(EngineError::AlreadyExists(format!("booking {}", req.id)));
            }
            Entry::Vacant(slot) => {
                slot.insert(req.date);
            }
        }

        let booking = Booking {
            id: req.id,
            event_type_id: req.event_type_id,
            name: req.name.trim().to_string(),
            email: req.email.trim().to_string(),
            date: req.date,
            start: req.start,
            end: req.end,
            status: BookingStatus::Booked,
            created_at: now_ms(),
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        if let Err(e) = self.persist_day(&mut guard, &event).await {
            self.booking_dates.remove(&req.id);
            return Err(e);
        }
        tracing::debug!(
            host = %self.host,
            id = %booking.id,
            date = %booking.date,
            start = %booking.start,
            "booking created"
        );
        Ok(booking)
    }

    /// BOOKED → CANCELLED. Cancelling a cancelled booking is a no-op.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let _catalog = self.catalog.read().await;
        let missing = || EngineError::NotFound(format!("booking {id}"));
        let date = self.booking_date(&id).ok_or_else(missing)?;
        let day = self.get_day(date).ok_or_else(missing)?;
        let mut guard = day.write().await;
        let current = guard.booking_mut(id).ok_or_else(missing)?.clone();
        if current.status == BookingStatus::Cancelled {
            return Ok(current);
        }
        self.persist_day(&mut guard, &Event::BookingCancelled { id, date })
            .await?;
        tracing::debug!(host = %self.host, %id, "booking cancelled");
        Ok(Booking {
            status: BookingStatus::Cancelled,
            ..current
        })
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Rewrite the WAL as the minimal event sequence for the current state.
    /// Dates left with neither override nor bookings are dropped from memory too.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let catalog = self.catalog.write().await;
        let schedule = self.schedule.read().await;

        let mut events = Vec::new();
        if let Some(s) = schedule.as_ref() {
            events.push(Event::ScheduleSaved { schedule: s.clone() });
        }
        let mut event_types: Vec<&EventType> = catalog.iter().collect();
        event_types.sort_by_key(|et| et.id);
        events.extend(event_types.into_iter().map(|et| Event::EventTypeCreated {
            event_type: et.clone(),
        }));

        let mut empty_dates = Vec::new();
        for day in self.sorted_days() {
            let guard = day.read().await;
            if guard.is_empty() {
                empty_dates.push(guard.date);
                continue;
            }
            if let Some(o) = &guard.date_override {
                events.push(Event::OverridesReplaced {
                    dates: vec![guard.date],
                    payload: o.payload(),
                });
            }
            events.extend(guard.bookings.iter().map(|b| Event::BookingCreated { booking: b.clone() }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        for date in empty_dates {
            self.days.remove(&date);
        }
        drop(schedule);
        drop(catalog);
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
