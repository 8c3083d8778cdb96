/// Remaining-length field on the fixed header can be at most 4 bytes.
pub const MAX_VARINT_BYTES: usize = 4;

/// Largest value a 4-byte variable-byte integer can represent (`0xFF 0xFF 0xFF 0x7F`).
pub const MAX_REMAINING_LENGTH: u32 = 268_435_455;

/// Longest UTF-8 string / binary field the 2-byte length prefix can address.
pub const MAX_FIELD_LEN: usize = 65_535;

/// Bytes a type+flags byte plus the widest varint can occupy.
pub const MAX_FIXED_HEADER_LEN: usize = 1 + MAX_VARINT_BYTES;
