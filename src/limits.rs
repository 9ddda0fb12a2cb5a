use crate::model::Ms;

pub const MAX_FACILITIES: usize = 1_024;
pub const MAX_FACILITY_NAME_LEN: usize = 256;

pub const MAX_BEDS_PER_FACILITY: usize = 100_000;
pub const MAX_BED_NUMBER_LEN: usize = 64;
pub const MAX_RESERVATIONS_PER_BED: usize = 10_000;
pub const MAX_STAYS_PER_BED: usize = 100_000;

/// Upper bound on ids in one batch availability check.
pub const MAX_BATCH_IDS: usize = 10_000;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 1_000;

pub const MAX_REASON_LEN: usize = 1_024;
pub const MAX_ACTOR_LEN: usize = 256;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
/// Reservations longer than a year are rejected.
pub const MAX_RESERVATION_MS: Ms = 366 * crate::model::DAY_MS;
