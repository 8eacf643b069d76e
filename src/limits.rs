use crate::model::Ms;

pub const MAX_TENANT_NAME_LEN: usize = 128;
pub const MAX_TENANTS: usize = 1024;

pub const MAX_RESOURCES_PER_TENANT: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 2048;
pub const MAX_NOTES_LEN: usize = 8192;
pub const MAX_ADD_ONS: usize = 64;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// A single stay may not exceed one year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 86_400_000;

/// Longest accepted request line on the wire, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;
