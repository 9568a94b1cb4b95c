use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_MESSAGE_LEN: usize = 16 * 1024;

/// Photos are capped at 5 MiB of decoded bytes.
pub const MAX_PHOTO_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_CONTENT_TYPE_LEN: usize = 128;

/// Upper bound on physically stored slots, expired-but-unreaped included.
pub const MAX_SLOTS: usize = 100_000;
