//! Hard limits enforced at the engine and tenant boundaries.

pub const MAX_ROOM_TYPES_PER_TENANT: usize = 10_000;
pub const MAX_RESERVATIONS_PER_ROOM_TYPE: usize = 1_000_000;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_EMAIL_LEN: usize = 200;
pub const MAX_SOURCE_LEN: usize = 80;
pub const MAX_EXTERNAL_ID_LEN: usize = 200;

/// Longest stay accepted by any booking path, in nights.
pub const MAX_STAY_NIGHTS: i64 = 366;

pub const DEFAULT_CALENDAR_DAYS: u32 = 30;
pub const MAX_CALENDAR_DAYS: u32 = 366;

pub const MAX_IMPORT_BATCH: usize = 1_000;

pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 128;
