use crate::model::Ms;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_000;

/// A single booking may not run longer than a week.
pub const MAX_BOOKING_MINUTES: u32 = 7 * 24 * 60;

/// Upper bound on the calendar days a single pattern expansion may walk.
pub const MAX_HORIZON_DAYS: i64 = 366;

/// Slots are always exactly one hour.
pub const SLOT_LENGTH_MS: Ms = 3_600_000;
