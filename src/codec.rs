//! Little-endian integer, GUID and FILETIME decoding from byte slices.
//! Every helper fails with [`Error::Truncated`] rather than panicking when
//! the slice is too short.

use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

fn require(buf: &[u8], offset: usize, needed: usize) -> Result<&[u8]> {
    buf.get(offset..offset + needed)
        .ok_or(Error::Truncated {
            needed: offset + needed,
            available: buf.len(),
        })
}

pub fn read_u16_le(buf: &[u8], offset: usize) -> Result<u16> {
    let bytes = require(buf, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub fn read_u32_le(buf: &[u8], offset: usize) -> Result<u32> {
    let bytes = require(buf, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn read_u64_le(buf: &[u8], offset: usize) -> Result<u64> {
    let bytes = require(buf, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

/// Decodes a 16-byte GUID using the mixed-endian layout RFC 4122 variant 2
/// (Microsoft) uses on disk: the first three fields are little-endian, the
/// last two are a straight byte run.
pub fn read_guid(buf: &[u8], offset: usize) -> Result<Uuid> {
    let bytes = require(buf, offset, 16)?;
    let mut array = [0u8; 16];
    array.copy_from_slice(bytes);
    Ok(Uuid::from_bytes_le(array))
}

pub fn read_filetime(buf: &[u8], offset: usize) -> Result<u64> {
    read_u64_le(buf, offset)
}

/// Number of 100 ns intervals between the FILETIME epoch (1601-01-01) and
/// the Unix epoch (1970-01-01).
const FILETIME_EPOCH_DIFF_100NS: u64 = 116_444_736_000_000_000;

/// Converts a raw FILETIME (100 ns ticks since 1601-01-01 UTC) into a
/// `chrono` timestamp. Ticks before the Unix epoch saturate to it.
pub fn filetime_to_utc(filetime: u64) -> DateTime<Utc> {
    let since_unix_epoch_100ns = filetime.saturating_sub(FILETIME_EPOCH_DIFF_100NS);
    let secs = (since_unix_epoch_100ns / 10_000_000) as i64;
    let nanos = ((since_unix_epoch_100ns % 10_000_000) * 100) as u32;
    Utc.timestamp_opt(secs, nanos).single().unwrap_or(Utc.timestamp_opt(0, 0).single().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_integers() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(read_u16_le(&buf, 0).unwrap(), 0x0201);
        assert_eq!(read_u32_le(&buf, 0).unwrap(), 0x04030201);
        assert_eq!(read_u64_le(&buf, 0).unwrap(), 0x0807060504030201);
    }

    #[test]
    fn truncated_slice_errors() {
        let buf = [0u8; 1];
        assert!(matches!(
            read_u16_le(&buf, 0),
            Err(Error::Truncated { .. })
        ));
        assert!(matches!(read_guid(&buf, 0), Err(Error::Truncated { .. })));
    }

    #[test]
    fn guid_round_trips_mixed_endian() {
        let uuid = Uuid::parse_str("01234567-89ab-cdef-0123-456789abcdef").unwrap();
        let bytes = uuid.to_bytes_le();
        let decoded = read_guid(&bytes, 0).unwrap();
        assert_eq!(decoded, uuid);
    }

    #[test]
    fn filetime_epoch_matches_unix_epoch() {
        let dt = filetime_to_utc(FILETIME_EPOCH_DIFF_100NS);
        assert_eq!(dt.timestamp(), 0);
    }

    #[test]
    fn filetime_before_epoch_saturates() {
        let dt = filetime_to_utc(0);
        assert_eq!(dt.timestamp(), 0);
    }
}
