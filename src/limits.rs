//! Hard caps that bound memory per vendor and per request.

use crate::model::Minute;

pub const MAX_VENDORS: usize = 10_000;
pub const MAX_STAFF_PER_VENDOR: usize = 500;
pub const MAX_SERVICES_PER_VENDOR: usize = 5_000;
pub const MAX_APPOINTMENTS_PER_VENDOR: usize = 1_000_000;
pub const MAX_BLOCKED_PER_STAFF: usize = 10_000;
pub const MAX_RANGES_PER_DAY: usize = 16;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CLIENT_ID_LEN: usize = 256;
pub const MAX_IDS_PER_QUERY: usize = 64;
pub const MAX_BATCH_ROWS: usize = 1_000;

/// Smallest generation interval accepted, in minutes.
pub const MIN_SLOT_INTERVAL: Minute = 5;
/// Longest single reservation (service + add-ons, or package), in minutes.
pub const MAX_BOOKING_DURATION: Minute = 16 * 60;
pub const MAX_LOCKS_PER_VENDOR: usize = 100_000;
