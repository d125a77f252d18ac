use crate::limits::*;
use crate::model::*;

use super::{Catalog, ConflictKind, EngineError};

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// `local@domain` with a dot somewhere in the domain and no whitespace.
pub(crate) fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

pub(crate) fn validate_booking(req: &NewBooking) -> Result<(), EngineError> {
    if req.name.trim().is_empty() {
        return Err(EngineError::Validation("name is required".into()));
    }
    if req.name.chars().count() > MAX_GUEST_NAME_LEN {
        return Err(EngineError::LimitExceeded("guest name too long"));
    }
    if req.email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    if !is_plausible_email(&req.email) {
        return Err(EngineError::Validation(format!("invalid email: {}", req.email)));
    }
    if req.start >= req.end {
        return Err(EngineError::Validation(format!(
            "start {} must be before end {}",
            req.start, req.end
        )));
    }
    Ok(())
}

/// Checks the draft and returns the slug it will be stored under.
pub(crate) fn validate_event_type(draft: &EventTypeDraft) -> Result<String, EngineError> {
    if draft.title.trim().is_empty() {
        return Err(EngineError::Validation("title is required".into()));
    }
    if draft.title.chars().count() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    if draft.description.len() > MAX_DESCRIPTION_LEN {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    if draft.duration == 0 || draft.duration > MAX_EVENT_MINUTES {
        return Err(EngineError::Validation(format!(
            "duration must be 1..={MAX_EVENT_MINUTES} minutes, got {}",
            draft.duration
        )));
    }
    if draft.buffer > MAX_EVENT_MINUTES {
        return Err(EngineError::Validation(format!(
            "buffer must be at most {MAX_EVENT_MINUTES} minutes, got {}",
            draft.buffer
        )));
    }
    let slug = match draft.slug.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => slugify(&draft.title),
    };
    if slug.len() > MAX_SLUG_LEN {
        return Err(EngineError::LimitExceeded("slug too long"));
    }
    if !is_valid_slug(&slug) {
        return Err(EngineError::Validation(format!(
            "slug {slug:?} must be lowercase letters, digits and dashes"
        )));
    }
    Ok(slug)
}

pub(crate) fn validate_override(payload: &OverridePayload) -> Result<(), EngineError> {
    if let Some(reason) = &payload.reason
        && reason.len() > MAX_REASON_LEN
    {
        return Err(EngineError::LimitExceeded("override reason too long"));
    }
    payload.validate().map_err(EngineError::Validation)
}

/// The date must not carry a blocking override.
pub(crate) fn check_date_open(day: &DayState) -> Result<(), EngineError> {
    match &day.date_override {
        Some(o) if !o.enabled => Err(EngineError::Conflict(ConflictKind::DateUnavailable)),
        _ => Ok(()),
    }
}

/// `span` must miss every active booking widened by that booking's own buffer.
/// `span` itself is not widened.
pub(crate) fn check_no_overlap(
    day: &DayState,
    catalog: &Catalog,
    span: &Span,
) -> Result<(), EngineError> {
    for booking in day.active_bookings() {
        let buffer = catalog.buffer_of(&booking.event_type_id) as Minutes;
        if booking.span().widen(buffer).overlaps(span) {
            return Err(EngineError::Conflict(ConflictKind::Overlap {
                booking_id: booking.id,
            }));
        }
    }
    Ok(())
}
