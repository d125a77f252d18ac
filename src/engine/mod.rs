mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{available_starts, busy_spans, compute_available_slots, merge_overlapping, working_window};
pub use error::{ConflictKind, EngineError};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

pub type SharedDayState = Arc<RwLock<DayState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Every append that is already queued when the first one
/// arrives rides the same fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = write_batch(wal, &batch);
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!(path = %wal.path().display(), "WAL flush failed: {e}");
    }
    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn write_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err() {
        // Nothing from a failed batch may stay in the log ahead of the next one.
        if let Err(e) = wal.rollback() {
            tracing::error!(path = %wal.path().display(), "WAL rollback failed: {e}");
        }
    }
    result
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_snapshot(wal.path(), &events).and_then(|()| wal.install_snapshot());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

// ── Event-type catalog ───────────────────────────────────

/// Event types of one host, indexed by id and by slug.
#[derive(Debug, Default)]
pub struct Catalog {
    by_id: HashMap<Ulid, EventType>,
    by_slug: HashMap<String, Ulid>,
}

impl Catalog {
    pub fn get(&self, id: &Ulid) -> Option<&EventType> {
        self.by_id.get(id)
    }

    pub fn resolve(&self, target: &EventTypeRef) -> Option<&EventType> {
        match target {
            EventTypeRef::Id(id) => self.by_id.get(id),
            EventTypeRef::Slug(slug) => self.by_slug.get(slug).and_then(|id| self.by_id.get(id)),
        }
    }

    pub fn slug_owner(&self, slug: &str) -> Option<Ulid> {
        self.by_slug.get(slug).copied()
    }

    /// Buffer minutes of the given type; a type that no longer exists pads nothing.
    pub fn buffer_of(&self, id: &Ulid) -> u32 {
        self.by_id.get(id).map_or(0, |et| et.buffer)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventType> {
        self.by_id.values()
    }

    fn upsert(&mut self, event_type: EventType) {
        if let Some(old) = self.by_id.get(&event_type.id) {
            self.by_slug.remove(&old.slug);
        }
        self.by_slug.insert(event_type.slug.clone(), event_type.id);
        self.by_id.insert(event_type.id, event_type);
    }

    fn remove(&mut self, id: &Ulid) -> Option<EventType> {
        let removed = self.by_id.remove(id)?;
        self.by_slug.remove(&removed.slug);
        Some(removed)
    }
}

// ── Engine ───────────────────────────────────────────────

/// All state of one host.
///
/// Lock order: `catalog`, then `schedule`, then day locks (ascending date),
/// then the WAL channel. Every mutation holds `catalog` across its WAL append,
/// so holding it for write quiesces the engine.
pub struct Engine {
    pub host: String,
    pub(super) catalog: RwLock<Catalog>,
    pub(super) schedule: RwLock<Option<WeeklySchedule>>,
    pub(super) days: DashMap<NaiveDate, SharedDayState>,
    /// Reverse lookup: booking id → date
    pub(super) booking_dates: DashMap<Ulid, NaiveDate>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

fn apply_to_catalog(catalog: &mut Catalog, event: &Event) {
    match event {
        Event::EventTypeCreated { event_type } | Event::EventTypeUpdated { event_type } => {
            catalog.upsert(event_type.clone());
        }
        Event::EventTypeDeleted { id } => {
            catalog.remove(id);
        }
        _ => {}
    }
}

/// Apply an event to one date (no locking, caller holds the lock).
fn apply_to_day(day: &mut DayState, event: &Event) {
    match event {
        Event::OverridesReplaced { payload, .. } => {
            day.date_override = Some(payload.for_date(day.date));
        }
        Event::OverrideDeleted { .. } => {
            day.date_override = None;
        }
        Event::BookingCreated { booking } => {
            day.insert_booking(booking.clone());
        }
        Event::BookingCancelled { id, .. } => {
            if let Some(b) = day.booking_mut(*id) {
                b.status = BookingStatus::Cancelled;
            }
        }
        Event::ScheduleSaved { .. }
        | Event::EventTypeCreated { .. }
        | Event::EventTypeUpdated { .. }
        | Event::EventTypeDeleted { .. } => {}
    }
}

/// Dates touched by an event, for events scoped to dates.
fn event_dates(event: &Event) -> Vec<NaiveDate> {
    match event {
        Event::OverridesReplaced { dates, .. } => dates.clone(),
        Event::OverrideDeleted { date } | Event::BookingCancelled { date, .. } => vec![*date],
        Event::BookingCreated { booking } => vec![booking.date],
        Event::ScheduleSaved { .. }
        | Event::EventTypeCreated { .. }
        | Event::EventTypeUpdated { .. }
        | Event::EventTypeDeleted { .. } => Vec::new(),
    }
}

impl Engine {
    /// Rebuild state from the WAL at `wal_path` and start its writer task.
    pub fn new(host: impl Into<String>, wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;

        let mut catalog = Catalog::default();
        let mut schedule = None;
        let mut days: HashMap<NaiveDate, DayState> = HashMap::new();
        let booking_dates = DashMap::new();

        for event in &events {
            match event {
                Event::ScheduleSaved { schedule: saved } => schedule = Some(saved.clone()),
                Event::EventTypeCreated { .. }
                | Event::EventTypeUpdated { .. }
                | Event::EventTypeDeleted { .. } => apply_to_catalog(&mut catalog, event),
                _ => {
                    if let Event::BookingCreated { booking } = event {
                        booking_dates.insert(booking.id, booking.date);
                    }
                    for date in event_dates(event) {
                        let day = days.entry(date).or_insert_with(|| DayState::new(date));
                        apply_to_day(day, event);
                    }
                }
            }
        }

        let host = host.into();
        tracing::info!(
            host = %host,
            events = events.len(),
            event_types = catalog.len(),
            dates = days.len(),
            "engine state replayed"
        );

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            host,
            catalog: RwLock::new(catalog),
            schedule: RwLock::new(schedule),
            days: days
                .into_iter()
                .map(|(date, day)| (date, Arc::new(RwLock::new(day))))
                .collect(),
            booking_dates,
            wal_tx,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, then apply to the locked date.
    pub(super) async fn persist_day(&self, day: &mut DayState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_day(day, event);
        Ok(())
    }

    /// WAL-append, then apply to the write-locked catalog.
    pub(super) async fn persist_catalog(&self, catalog: &mut Catalog, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_catalog(catalog, event);
        Ok(())
    }

    pub fn get_day(&self, date: NaiveDate) -> Option<SharedDayState> {
        self.days.get(&date).map(|e| e.value().clone())
    }

    pub(super) fn day_or_insert(&self, date: NaiveDate) -> SharedDayState {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(date))))
            .clone()
    }

    /// Snapshot of every date handle, ascending by date.
    pub(super) fn sorted_days(&self) -> Vec<SharedDayState> {
        let mut entries: Vec<(NaiveDate, SharedDayState)> = self
            .days
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_by_key(|(date, _)| *date);
        entries.into_iter().map(|(_, day)| day).collect()
    }

    pub fn booking_date(&self, id: &Ulid) -> Option<NaiveDate> {
        self.booking_dates.get(id).map(|e| *e.value())
    }
}
