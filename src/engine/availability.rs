use chrono::{Datelike, NaiveDate};

use crate::model::*;

// ── Slot Algorithm ────────────────────────────────────────────────

/// Working window for `date`.
///
/// An override replaces the weekday entry outright: blocked means no window,
/// custom hours mean exactly those hours. Without one the weekday entry applies.
pub fn working_window(
    date: NaiveDate,
    schedule: &WeeklySchedule,
    date_override: Option<&DateOverride>,
) -> Option<Span> {
    match date_override {
        Some(o) => o.window(),
        None => schedule.day(date.weekday()).window(),
    }
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Each booking widened by its own event type's buffer, sorted and merged.
pub fn busy_spans(existing: &[BookedSlot]) -> Vec<Span> {
    let mut spans: Vec<Span> = existing.iter().map(BookedSlot::busy_span).collect();
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// Bookable start times for `event_type` on `date`, ascending.
///
/// Candidates step from the window start by `duration` and must end inside the
/// window. A candidate is dropped when `[s, s + duration)` intersects any
/// existing booking's buffer-widened span. The candidate itself is not padded
/// by its own buffer.
pub fn available_starts(
    date: NaiveDate,
    schedule: &WeeklySchedule,
    date_override: Option<&DateOverride>,
    event_type: &EventType,
    existing: &[BookedSlot],
    today: NaiveDate,
) -> Vec<TimeOfDay> {
    if date < today || event_type.duration == 0 {
        return Vec::new();
    }
    let Some(window) = working_window(date, schedule, date_override) else {
        return Vec::new();
    };
    let duration = event_type.duration as Minutes;
    let busy = busy_spans(existing);

    let mut starts = Vec::new();
    let mut bi = 0;
    let mut s = window.start;
    while s + duration <= window.end {
        let candidate = Span::new(s, s + duration);
        // Busy spans are disjoint and sorted, and candidates only move forward.
        while bi < busy.len() && busy[bi].end <= candidate.start {
            bi += 1;
        }
        let blocked = busy.get(bi).is_some_and(|b| b.overlaps(&candidate));
        if !blocked && let Some(t) = TimeOfDay::from_minutes(s) {
            starts.push(t);
        }
        s += duration;
    }
    starts
}

/// `available_starts`, rendered for display.
pub fn compute_available_slots(
    date: NaiveDate,
    schedule: &WeeklySchedule,
    date_override: Option<&DateOverride>,
    event_type: &EventType,
    existing: &[BookedSlot],
    today: NaiveDate,
    format: ClockFormat,
) -> Vec<String> {
    available_starts(date, schedule, date_override, event_type, existing, today)
        .into_iter()
        .map(|t| t.format(format))
        .collect()
}
