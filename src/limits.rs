/// Upper bound on slots in a single reservation request.
pub const MAX_SLOTS_PER_REQUEST: usize = 96;

/// Default number of days scanned when listing bookable dates.
pub const DEFAULT_LOOKAHEAD_DAYS: u32 = 60;

/// Hard cap on the date-listing window.
pub const MAX_LOOKAHEAD_DAYS: u32 = 366;

/// Longest slot interval a configuration may ask for (one day).
pub const MAX_INTERVAL_MINUTES: i64 = 1440;

pub const MAX_NAME_LEN: usize = 256;

/// Applies to each customer contact field.
pub const MAX_CUSTOMER_FIELD_LEN: usize = 256;

/// Reserved-but-unbound slots older than this are reclaimed by the reaper.
pub const DEFAULT_ORPHAN_TTL_MS: i64 = 15 * 60_000;
