use std::fmt;

use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for audit timestamps only.
pub type Ms = i64;

/// Minutes since local midnight. Signed so buffer-widened spans may dip below zero.
pub type Minutes = i32;

pub const MINUTES_PER_DAY: Minutes = 1440;

/// Half-open interval `[start, end)` in minutes of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minutes,
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minutes {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Pad both sides by `buffer` minutes.
    pub fn widen(&self, buffer: Minutes) -> Span {
        Span::new(self.start - buffer, self.end + buffer)
    }
}

// ── Time of day ──────────────────────────────────────────────────

/// Display preference for slot and booking times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockFormat {
    /// `09:00 AM`
    #[default]
    H12,
    /// `09:00`
    H24,
}

impl ClockFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "12h" | "12" | "h12" => Some(ClockFormat::H12),
            "24h" | "24" | "h24" => Some(ClockFormat::H24),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeError(pub String);

impl fmt::Display for ParseTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time of day: {:?}", self.0)
    }
}

impl std::error::Error for ParseTimeError {}

/// Minute-resolution time of day. `24:00` is representable so a window can end at midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);
    pub const END_OF_DAY: TimeOfDay = TimeOfDay(MINUTES_PER_DAY as u16);

    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        match hour {
            0..=23 => Some(TimeOfDay((hour * 60 + minute) as u16)),
            24 if minute == 0 => Some(Self::END_OF_DAY),
            _ => None,
        }
    }

    pub fn from_minutes(minutes: Minutes) -> Option<Self> {
        if (0..=MINUTES_PER_DAY).contains(&minutes) {
            Some(TimeOfDay(minutes as u16))
        } else {
            None
        }
    }

    pub fn minutes(self) -> Minutes {
        self.0 as Minutes
    }

    pub fn hour(self) -> u32 {
        self.0 as u32 / 60
    }

    pub fn minute(self) -> u32 {
        self.0 as u32 % 60
    }

    /// Accepts `HH:MM` (24h) and `hh:MM AM|PM` (12h).
    pub fn parse(input: &str) -> Result<Self, ParseTimeError> {
        let s = input.trim().to_ascii_uppercase();
        if s == "24:00" {
            return Ok(Self::END_OF_DAY);
        }
        let parsed = NaiveTime::parse_from_str(&s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&s, "%I:%M %p"))
            .or_else(|_| NaiveTime::parse_from_str(&s, "%I:%M%p"))
            .map_err(|_| ParseTimeError(input.to_string()))?;
        Ok(TimeOfDay((parsed.hour() * 60 + parsed.minute()) as u16))
    }

    pub fn format(self, format: ClockFormat) -> String {
        let (h, m) = (self.hour(), self.minute());
        match format {
            ClockFormat::H24 => format!("{h:02}:{m:02}"),
            ClockFormat::H12 => {
                let h = h % 24;
                let meridian = if h < 12 { "AM" } else { "PM" };
                let h12 = match h % 12 {
                    0 => 12,
                    other => other,
                };
                format!("{h12:02}:{m:02} {meridian}")
            }
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format(ClockFormat::H24))
    }
}

/// Working window for `[start, end)`, or `None` when empty or inverted.
fn window_of(start: Option<TimeOfDay>, end: Option<TimeOfDay>) -> Option<Span> {
    match (start, end) {
        (Some(s), Some(e)) if s < e => Some(Span::new(s.minutes(), e.minutes())),
        _ => None,
    }
}

// ── Weekly schedule ──────────────────────────────────────────────

/// Weekdays in storage order (index = `num_days_from_sunday`).
pub const WEEKDAYS: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

pub const DEFAULT_TIMEZONE: &str = "Asia/Kolkata";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub enabled: bool,
    pub start: Option<TimeOfDay>,
    pub end: Option<TimeOfDay>,
}

impl DayHours {
    pub fn open(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self {
            enabled: true,
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn closed() -> Self {
        Self {
            enabled: false,
            start: None,
            end: None,
        }
    }

    pub fn window(&self) -> Option<Span> {
        if !self.enabled {
            return None;
        }
        window_of(self.start, self.end)
    }

    fn validate(&self, weekday: Weekday) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        match (self.start, self.end) {
            (Some(s), Some(e)) if s < e => Ok(()),
            (Some(s), Some(e)) => Err(format!("{weekday}: start {s} must be before end {e}")),
            _ => Err(format!("{weekday}: enabled day needs both start and end")),
        }
    }
}

/// A host's recurring availability template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    pub timezone: String,
    pub days: [DayHours; 7],
}

impl Default for WeeklySchedule {
    /// Mon–Fri 09:00–17:00, weekend off.
    fn default() -> Self {
        let nine = TimeOfDay::from_hm(9, 0).unwrap_or(TimeOfDay::MIDNIGHT);
        let five = TimeOfDay::from_hm(17, 0).unwrap_or(TimeOfDay::END_OF_DAY);
        let mut days = [DayHours::closed(); 7];
        for weekday in [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri] {
            days[weekday.num_days_from_sunday() as usize] = DayHours::open(nine, five);
        }
        Self {
            timezone: DEFAULT_TIMEZONE.to_string(),
            days,
        }
    }
}

impl WeeklySchedule {
    pub fn day(&self, weekday: Weekday) -> &DayHours {
        &self.days[weekday.num_days_from_sunday() as usize]
    }

    pub fn set_day(&mut self, weekday: Weekday, hours: DayHours) {
        self.days[weekday.num_days_from_sunday() as usize] = hours;
    }

    /// Falls back to UTC for a zone that fails to parse; saved schedules are validated.
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| format!("unknown timezone: {}", self.timezone))?;
        for weekday in WEEKDAYS {
            self.day(weekday).validate(weekday)?;
        }
        Ok(())
    }
}

// ── Date overrides ───────────────────────────────────────────────

/// Shared payload applied to every date of one override save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverridePayload {
    /// `true` = custom hours, `false` = blocked all day.
    pub enabled: bool,
    pub start: Option<TimeOfDay>,
    pub end: Option<TimeOfDay>,
    pub reason: Option<String>,
}

impl OverridePayload {
    pub fn blocked(reason: Option<String>) -> Self {
        Self {
            enabled: false,
            start: None,
            end: None,
            reason,
        }
    }

    pub fn custom_hours(start: TimeOfDay, end: TimeOfDay, reason: Option<String>) -> Self {
        Self {
            enabled: true,
            start: Some(start),
            end: Some(end),
            reason,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match (self.enabled, self.start, self.end) {
            (true, Some(s), Some(e)) if s < e => Ok(()),
            (true, Some(s), Some(e)) => Err(format!("override start {s} must be before end {e}")),
            (true, _, _) => Err("available override needs both start and end".into()),
            (false, None, None) => Ok(()),
            (false, _, _) => Err("blocked override must not carry hours".into()),
        }
    }

    pub fn for_date(&self, date: NaiveDate) -> DateOverride {
        DateOverride {
            date,
            enabled: self.enabled,
            start: self.start,
            end: self.end,
            reason: self.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateOverride {
    pub date: NaiveDate,
    pub enabled: bool,
    pub start: Option<TimeOfDay>,
    pub end: Option<TimeOfDay>,
    pub reason: Option<String>,
}

impl DateOverride {
    pub fn window(&self) -> Option<Span> {
        if !self.enabled {
            return None;
        }
        window_of(self.start, self.end)
    }

    pub fn payload(&self) -> OverridePayload {
        OverridePayload {
            enabled: self.enabled,
            start: self.start,
            end: self.end,
            reason: self.reason.clone(),
        }
    }
}

// ── Event types ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventType {
    pub id: Ulid,
    pub title: String,
    pub slug: String,
    pub description: String,
    /// Minutes.
    pub duration: u32,
    /// Minutes of idle padding before and after each booking of this type.
    pub buffer: u32,
}

/// Caller-supplied fields for creating or editing an event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTypeDraft {
    pub title: String,
    /// Derived from `title` when `None`.
    pub slug: Option<String>,
    pub description: String,
    pub duration: u32,
    pub buffer: u32,
}

/// Event types are addressed by id or by slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTypeRef {
    Id(Ulid),
    Slug(String),
}

impl EventTypeRef {
    pub fn parse(s: &str) -> Self {
        match Ulid::from_string(s.trim()) {
            Ok(id) => EventTypeRef::Id(id),
            Err(_) => EventTypeRef::Slug(s.trim().to_lowercase()),
        }
    }
}

impl fmt::Display for EventTypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTypeRef::Id(id) => write!(f, "{id}"),
            EventTypeRef::Slug(slug) => write!(f, "{slug}"),
        }
    }
}

/// Lowercase, collapse every run of non-alphanumerics into `-`, trim dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    slug
}

pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Booked,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Booked => "BOOKED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub event_type_id: Ulid,
    pub name: String,
    pub email: String,
    pub date: NaiveDate,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub status: BookingStatus,
    pub created_at: Ms,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::new(self.start.minutes(), self.end.minutes())
    }

    pub fn is_booked(&self) -> bool {
        self.status == BookingStatus::Booked
    }

    /// Local wall-clock end of the booking; `24:00` rolls to the next midnight.
    pub fn end_datetime(&self) -> NaiveDateTime {
        if self.end == TimeOfDay::END_OF_DAY {
            let next = self.date.checked_add_days(Days::new(1)).unwrap_or(self.date);
            return next.and_time(NaiveTime::MIN);
        }
        let time = NaiveTime::from_hms_opt(self.end.hour(), self.end.minute(), 0).unwrap_or(NaiveTime::MIN);
        self.date.and_time(time)
    }
}

/// A guest's booking request, before admission control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub id: Ulid,
    pub event_type_id: Ulid,
    pub name: String,
    pub email: String,
    pub date: NaiveDate,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

/// Occupied range on a date, with the owning event type's parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookedSlot {
    pub booking_id: Ulid,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub duration: u32,
    pub buffer: u32,
}

impl BookedSlot {
    /// `[start - buffer, end + buffer)`.
    pub fn busy_span(&self) -> Span {
        Span::new(self.start.minutes(), self.end.minutes()).widen(self.buffer as Minutes)
    }
}

/// Dashboard tabs for the bookings list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingTab {
    Upcoming,
    Past,
    Cancelled,
}

impl BookingTab {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upcoming" => Some(BookingTab::Upcoming),
            "past" => Some(BookingTab::Past),
            "cancelled" | "canceled" => Some(BookingTab::Cancelled),
            _ => None,
        }
    }

    pub fn matches(&self, booking: &Booking, now: NaiveDateTime) -> bool {
        match self {
            BookingTab::Upcoming => booking.is_booked() && booking.end_datetime() > now,
            BookingTab::Past => booking.is_booked() && booking.end_datetime() <= now,
            BookingTab::Cancelled => booking.status == BookingStatus::Cancelled,
        }
    }
}

/// Per-date state: the override (if any) and every booking, sorted by start.
#[derive(Debug, Clone)]
pub struct DayState {
    pub date: NaiveDate,
    pub date_override: Option<DateOverride>,
    pub bookings: Vec<Booking>,
}

impl DayState {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            date_override: None,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self.bookings.partition_point(|b| b.start <= booking.start);
        self.bookings.insert(pos, booking);
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn active_bookings(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(|b| b.is_booked())
    }

    pub fn is_empty(&self) -> bool {
        self.date_override.is_none() && self.bookings.is_empty()
    }
}

/// The WAL record format. One variant per state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ScheduleSaved {
        schedule: WeeklySchedule,
    },
    OverridesReplaced {
        dates: Vec<NaiveDate>,
        payload: OverridePayload,
    },
    OverrideDeleted {
        date: NaiveDate,
    },
    EventTypeCreated {
        event_type: EventType,
    },
    EventTypeUpdated {
        event_type: EventType,
    },
    EventTypeDeleted {
        id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingCancelled {
        id: Ulid,
        date: NaiveDate,
    },
}

// ── Query result types ───────────────────────────────────────────

/// A booking joined with its event type for list views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub booking: Booking,
    /// `None` when the event type was deleted after cancellation.
    pub event_type_title: Option<String>,
    pub event_type_duration: Option<u32>,
}
