//! Hard limits applied before anything touches state or the WAL.

use std::time::Duration;

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_ROOM_TYPES_PER_TENANT: usize = 10_000;
pub const MAX_ROOMS_PER_TENANT: usize = 100_000;
pub const MAX_BOOKINGS_PER_TENANT: usize = 5_000_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_ROOM_NUMBER_LEN: usize = 32;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_ACTOR_LEN: usize = 256;

/// Longest stay accepted, in nights.
pub const MAX_STAY_NIGHTS: i64 = 366;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
