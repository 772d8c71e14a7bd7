//! The on-disk record layout: a packed 24-byte header followed by the key
//! (terminated by a trailing zero byte) and the value.
//!
//! ```text
//! |      crc      |  ver  |  klen |      vlen     |     flags     |
//! | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9 |10 |11 |12 |13 |14 |15 |
//!
//! |         previous (offset of prior record in this bucket)     |
//! |16 |17 |18 |19 |20 |21 |22 |23 |
//!
//! <klen bytes of key, last byte always 0> <vlen bytes of value>
//! ```

use crate::checksum;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Current (only) on-disk format version.
pub const VERSION: u16 = 1;

/// Sentinel used for both empty bucket heads and terminal `previous` links.
pub const NONE: u64 = u64::MAX;

/// Largest value `klen` may hold (the key length, including its terminator).
pub const MAX_KLEN: u16 = u16::MAX;

/// Largest value `vlen` may hold, so that `HEADER_SIZE + klen + vlen` never
/// overflows a `u32` file offset delta.
pub const MAX_VLEN: u32 = u32::MAX - MAX_KLEN as u32 - HEADER_SIZE as u32;

/// A parsed record header, with `key`/`value` borrowed from the underlying
/// mapping rather than copied.
#[derive(Debug)]
pub struct Parsed<'a> {
    pub version: u16,
    pub vlen: u32,
    pub previous: u64,
    /// The stored key bytes, *including* the trailing zero terminator.
    pub key: &'a [u8],
    pub value: &'a [u8],
    /// Total size of the record (header + key + value) in bytes.
    pub len: usize,
}

/// Why [`parse`] stopped instead of returning a [`Parsed`] record.
///
/// This is not an error type: during recovery, stopping is the normal way
/// to find the end of valid data. Whether a given reason indicates a torn
/// write versus ordinary trailing padding is for the caller to decide by
/// comparing the stop offset against the file's actual length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Fewer than 8 bytes remain, not even enough to read the version field.
    ShortHeader,
    /// The version field is not `1`.
    BadVersion,
    /// `klen` is `0`; a record's key may never be empty.
    ZeroKeyLen,
    /// `vlen` exceeds [`MAX_VLEN`].
    ValueTooLarge,
    /// `flags` is non-zero; the field is reserved and must always be `0`.
    NonZeroFlags,
    /// The header declares more key/value bytes than remain in the file.
    TruncatedRecord,
    /// The stored CRC does not match the computed CRC.
    ChecksumMismatch,
}

/// Total on-disk size of a record with the given key and value lengths
/// (the key length passed here excludes the terminator; one is added).
pub fn encoded_len(key_len: usize, value_len: usize) -> usize {
    HEADER_SIZE + key_len + 1 + value_len
}

/// Encodes a record for `key`/`value` into `buf`, with `previous` as its
/// bucket-chain link. `buf` must be exactly `encoded_len(key.len(), value.len())`
/// bytes. The checksum is computed last, over everything but itself.
///
/// # Panics
///
/// Panics if `buf` is not sized exactly for `key` and `value`, or if
/// `key.len() + 1` does not fit in a `u16`, or `value.len()` does not fit
/// the `vlen` field. Callers (namely [`crate::Store::set`]) are expected to
/// have already validated these bounds and returned a typed error instead.
pub fn encode(buf: &mut [u8], key: &[u8], value: &[u8], previous: u64) {
    let total = encoded_len(key.len(), value.len());
    assert_eq!(buf.len(), total, "encode buffer must match the record's exact size");

    let klen = u16::try_from(key.len() + 1).expect("key length validated by caller");
    let vlen = u32::try_from(value.len()).expect("value length validated by caller");

    buf[4..6].copy_from_slice(&VERSION.to_le_bytes());
    buf[6..8].copy_from_slice(&klen.to_le_bytes());
    buf[8..12].copy_from_slice(&vlen.to_le_bytes());
    buf[12..16].copy_from_slice(&0u32.to_le_bytes());
    buf[16..24].copy_from_slice(&previous.to_le_bytes());

    let key_start = HEADER_SIZE;
    let key_end = key_start + key.len();
    buf[key_start..key_end].copy_from_slice(key);
    buf[key_end] = 0;

    let value_start = key_end + 1;
    let value_end = value_start + value.len();
    buf[value_start..value_end].copy_from_slice(value);

    let crc = checksum::of(&buf[4..total]);
    buf[0..4].copy_from_slice(&crc.to_le_bytes());
}

/// Parses the record starting at byte `offset` within `data`, the full
/// mapped file contents (so that `previous` links and recovery can both
/// index relative to the start of the file rather than a record-local
/// slice).
pub fn parse(data: &[u8], offset: u64) -> Result<Parsed<'_>, StopReason> {
    let off = usize::try_from(offset).unwrap_or(usize::MAX);
    if off >= data.len() {
        return Err(StopReason::ShortHeader);
    }
    let remaining = data.len() - off;

    if remaining < 8 {
        return Err(StopReason::ShortHeader);
    }
    let version = u16::from_le_bytes(data[off + 4..off + 6].try_into().unwrap());
    if version != VERSION {
        return Err(StopReason::BadVersion);
    }
    if remaining < HEADER_SIZE {
        return Err(StopReason::ShortHeader);
    }
    let klen = u16::from_le_bytes(data[off + 6..off + 8].try_into().unwrap());
    if klen == 0 {
        return Err(StopReason::ZeroKeyLen);
    }
    let vlen = u32::from_le_bytes(data[off + 8..off + 12].try_into().unwrap());
    if vlen > MAX_VLEN {
        return Err(StopReason::ValueTooLarge);
    }
    let flags = u32::from_le_bytes(data[off + 12..off + 16].try_into().unwrap());
    if flags != 0 {
        return Err(StopReason::NonZeroFlags);
    }
    let previous = u64::from_le_bytes(data[off + 16..off + 24].try_into().unwrap());

    let total = HEADER_SIZE + klen as usize + vlen as usize;
    if remaining < total {
        return Err(StopReason::TruncatedRecord);
    }

    let stored_crc = u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
    let computed_crc = checksum::of(&data[off + 4..off + total]);
    if computed_crc != stored_crc {
        return Err(StopReason::ChecksumMismatch);
    }

    let key_start = off + HEADER_SIZE;
    let key_end = key_start + klen as usize;
    let value_end = key_end + vlen as usize;

    Ok(Parsed {
        version,
        vlen,
        previous,
        key: &data[key_start..key_end],
        value: &data[key_end..value_end],
        len: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(key: &[u8], value: &[u8], previous: u64) -> Vec<u8> {
        let mut buf = vec![0u8; encoded_len(key.len(), value.len())];
        encode(&mut buf, key, value, previous);
        buf
    }

    #[test]
    fn encodes_and_parses_back_the_same_record() {
        let buf = roundtrip(b"hello", b"world", NONE);
        let parsed = parse(&buf, 0).expect("should parse");
        assert_eq!(parsed.key, b"hello\0");
        assert_eq!(parsed.value, b"world");
        assert_eq!(parsed.previous, NONE);
        assert_eq!(parsed.vlen, 5);
        assert_eq!(parsed.len, buf.len());
    }

    #[test]
    fn tombstone_has_zero_vlen_and_empty_value() {
        let buf = roundtrip(b"gone", b"", 42);
        let parsed = parse(&buf, 0).expect("should parse");
        assert_eq!(parsed.vlen, 0);
        assert!(parsed.value.is_empty());
        assert_eq!(parsed.previous, 42);
    }

    #[test]
    fn rejects_bad_version() {
        let mut buf = roundtrip(b"k", b"v", NONE);
        buf[4] = 7;
        assert_eq!(parse(&buf, 0), Err(StopReason::BadVersion));
    }

    #[test]
    fn rejects_zero_klen() {
        let mut buf = roundtrip(b"k", b"v", NONE);
        buf[6] = 0;
        buf[7] = 0;
        assert_eq!(parse(&buf, 0), Err(StopReason::ZeroKeyLen));
    }

    #[test]
    fn rejects_non_zero_flags() {
        let mut buf = roundtrip(b"k", b"v", NONE);
        buf[12] = 1;
        assert_eq!(parse(&buf, 0), Err(StopReason::NonZeroFlags));
    }

    #[test]
    fn rejects_truncated_record() {
        let buf = roundtrip(b"key", b"value", NONE);
        assert_eq!(parse(&buf[..buf.len() - 1], 0), Err(StopReason::TruncatedRecord));
    }

    #[test]
    fn rejects_short_header() {
        let buf = roundtrip(b"key", b"value", NONE);
        assert_eq!(parse(&buf[..4], 0), Err(StopReason::ShortHeader));
    }

    #[test]
    fn detects_a_single_flipped_bit() {
        let mut buf = roundtrip(b"key", b"value", NONE);
        buf[HEADER_SIZE] ^= 0x01; // flip a bit inside the key
        assert_eq!(parse(&buf, 0), Err(StopReason::ChecksumMismatch));
    }

    #[test]
    fn parses_a_record_at_a_nonzero_offset() {
        let mut data = vec![0xAAu8; 10];
        data.extend(roundtrip(b"later", b"record", 3));
        let parsed = parse(&data, 10).expect("should parse");
        assert_eq!(parsed.key, b"later\0");
        assert_eq!(parsed.value, b"record");
    }
}
