use ulid::Ulid;

/// Why a write was refused because of existing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// The date carries a blocking override.
    DateUnavailable,
    /// The requested range intersects this booking's buffered span.
    Overlap { booking_id: Ulid },
    /// Active bookings still reference the event type.
    EventTypeInUse { event_type_id: Ulid },
}

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    Conflict(ConflictKind),
    NotFound(String),
    AlreadyExists(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::Conflict(ConflictKind::DateUnavailable) => {
                write!(f, "date is unavailable")
            }
            EngineError::Conflict(ConflictKind::Overlap { booking_id }) => {
                write!(f, "overlaps existing booking {booking_id} including buffer")
            }
            EngineError::Conflict(ConflictKind::EventTypeInUse { event_type_id }) => {
                write!(f, "event type {event_type_id} still has active bookings")
            }
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::AlreadyExists(what) => write!(f, "already exists: {what}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
