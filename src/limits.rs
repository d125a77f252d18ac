// Host-level
pub const MAX_HOSTS: usize = 1_024;
pub const MAX_HOST_NAME_LEN: usize = 64;

// Event types
pub const MAX_EVENT_TYPES_PER_HOST: usize = 1_000;
pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_SLUG_LEN: usize = 128;
pub const MAX_DESCRIPTION_LEN: usize = 4_096;
/// Minutes. Neither a meeting nor its padding may exceed one day.
pub const MAX_EVENT_MINUTES: u32 = 1_440;

// Bookings
pub const MAX_GUEST_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_BOOKINGS_PER_DAY: usize = 1_440;

// Overrides
pub const MAX_OVERRIDE_DATES: usize = 366;
pub const MAX_REASON_LEN: usize = 512;

// Wire
pub const MAX_CONNECTIONS: usize = 256;
pub const MAX_ROWS_PER_INSERT: usize = 366;
