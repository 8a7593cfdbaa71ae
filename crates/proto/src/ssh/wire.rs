//! SSH wire encoding primitives (RFC 4251 Section 5).
//!
//! Writers append to a [`BytesMut`]; readers take the whole payload and an
//! offset cursor that is advanced past each field. Every reader checks the
//! declared length against what is left in the buffer before slicing, so a
//! truncated or hostile payload yields [`ConduitError::ProtocolFormat`]
//! instead of a panic.

use bytes::{BufMut, BytesMut};
use conduit_platform::{ConduitError, ConduitResult};

/// Writes a `string` holding UTF-8 text.
pub(crate) fn write_string(buf: &mut BytesMut, s: &str) {
    write_bytes(buf, s.as_bytes());
}

/// Writes a `string` holding arbitrary bytes.
pub(crate) fn write_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Writes a `boolean`.
pub(crate) fn write_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(u8::from(value));
}

/// Writes a `name-list` (comma separated, length prefixed).
pub(crate) fn write_name_list(buf: &mut BytesMut, names: &[String]) {
    write_string(buf, &names.join(","));
}

/// Writes an `mpint` from unsigned big-endian magnitude bytes.
pub(crate) fn write_mpint(buf: &mut BytesMut, magnitude: &[u8]) {
    write_bytes(buf, &encode_mpint(magnitude));
}

/// Encodes unsigned big-endian bytes as the body of an `mpint`.
///
/// Leading zeros are stripped and a single zero byte is prepended when the
/// high bit is set, so the value is never read back as negative.
pub(crate) fn encode_mpint(magnitude: &[u8]) -> Vec<u8> {
    let start = magnitude
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(magnitude.len());
    let trimmed = &magnitude[start..];

    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(trimmed.len() + 1);
    if trimmed[0] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(trimmed);
    out
}

fn remaining(data: &[u8], offset: usize) -> usize {
    data.len().saturating_sub(offset)
}

/// Reads a single byte.
pub(crate) fn read_u8(data: &[u8], offset: &mut usize) -> ConduitResult<u8> {
    if remaining(data, *offset) < 1 {
        return Err(ConduitError::ProtocolFormat(format!(
            "Cannot read byte at offset {}",
            offset
        )));
    }
    let value = data[*offset];
    *offset += 1;
    Ok(value)
}

/// Reads a `boolean`; any non-zero value is true.
pub(crate) fn read_bool(data: &[u8], offset: &mut usize) -> ConduitResult<bool> {
    Ok(read_u8(data, offset)? != 0)
}

/// Reads a big-endian `uint32`.
pub(crate) fn read_u32(data: &[u8], offset: &mut usize) -> ConduitResult<u32> {
    if remaining(data, *offset) < 4 {
        return Err(ConduitError::ProtocolFormat(format!(
            "Cannot read u32 at offset {}",
            offset
        )));
    }

    let value = u32::from_be_bytes([
        data[*offset],
        data[*offset + 1],
        data[*offset + 2],
        data[*offset + 3],
    ]);
    *offset += 4;

    Ok(value)
}

/// Reads a `string` as raw bytes.
pub(crate) fn read_bytes(data: &[u8], offset: &mut usize) -> ConduitResult<Vec<u8>> {
    let length = read_u32(data, offset)? as usize;

    if remaining(data, *offset) < length {
        return Err(ConduitError::ProtocolFormat(format!(
            "Data truncated: expected {} bytes at offset {}",
            length, offset
        )));
    }

    let bytes = data[*offset..*offset + length].to_vec();
    *offset += length;

    Ok(bytes)
}

/// Reads a `string` that must be valid UTF-8.
pub(crate) fn read_string(data: &[u8], offset: &mut usize) -> ConduitResult<String> {
    let bytes = read_bytes(data, offset)?;
    String::from_utf8(bytes)
        .map_err(|_| ConduitError::ProtocolFormat("String contains invalid UTF-8".to_string()))
}

/// Reads a `name-list`.
pub(crate) fn read_name_list(data: &[u8], offset: &mut usize) -> ConduitResult<Vec<String>> {
    let list = read_string(data, offset)?;
    if list.is_empty() {
        return Ok(Vec::new());
    }
    Ok(list.split(',').map(str::to_string).collect())
}

/// Reads everything after `offset`, leaving the cursor at the end.
pub(crate) fn read_remaining(data: &[u8], offset: &mut usize) -> Vec<u8> {
    let start = (*offset).min(data.len());
    *offset = data.len();
    data[start..].to_vec()
}

/// Checks that a payload starts with the expected message number and returns
/// the offset just past it.
pub(crate) fn expect_message_type(data: &[u8], expected: u8, name: &str) -> ConduitResult<usize> {
    match data.first() {
        None => Err(ConduitError::ProtocolFormat(format!("{} message is empty", name))),
        Some(&t) if t != expected => Err(ConduitError::ProtocolFormat(format!(
            "Invalid message type for {}: expected {}, got {}",
            name, expected, t
        ))),
        Some(_) => Ok(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_roundtrip() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "ssh-userauth");
        let mut offset = 0;
        assert_eq!(read_string(&buf, &mut offset).unwrap(), "ssh-userauth");
        assert_eq!(offset, buf.len());
    }

    #[test]
    fn test_read_bytes_length_past_end() {
        // Declares 16 bytes, only 3 follow.
        let data = [0, 0, 0, 16, 1, 2, 3];
        let mut offset = 0;
        assert!(matches!(
            read_bytes(&data, &mut offset),
            Err(ConduitError::ProtocolFormat(_))
        ));
    }

    #[test]
    fn test_read_bytes_huge_length_does_not_overflow() {
        let data = [0xff, 0xff, 0xff, 0xff];
        let mut offset = 0;
        assert!(read_bytes(&data, &mut offset).is_err());
    }

    #[test]
    fn test_read_u32_truncated() {
        let mut offset = 0;
        assert!(read_u32(&[0, 1], &mut offset).is_err());
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_invalid_utf8() {
        let data = [0, 0, 0, 2, 0xc3, 0x28];
        let mut offset = 0;
        assert!(read_string(&data, &mut offset).is_err());
    }

    #[test]
    fn test_name_list() {
        let mut buf = BytesMut::new();
        write_name_list(&mut buf, &["aes128-ctr".to_string(), "aes256-ctr".to_string()]);
        write_name_list(&mut buf, &[]);

        let mut offset = 0;
        assert_eq!(
            read_name_list(&buf, &mut offset).unwrap(),
            vec!["aes128-ctr", "aes256-ctr"]
        );
        assert!(read_name_list(&buf, &mut offset).unwrap().is_empty());
    }

    #[test]
    fn test_mpint_encoding() {
        assert_eq!(encode_mpint(&[0x00, 0x00, 0x12]), vec![0x12]);
        assert_eq!(encode_mpint(&[0x80, 0x01]), vec![0x00, 0x80, 0x01]);
        assert!(encode_mpint(&[0, 0, 0]).is_empty());
    }

    #[test]
    fn test_expect_message_type() {
        assert_eq!(expect_message_type(&[21], 21, "NEWKEYS").unwrap(), 1);
        assert!(expect_message_type(&[20], 21, "NEWKEYS").is_err());
        assert!(expect_message_type(&[], 21, "NEWKEYS").is_err());
    }

    #[test]
    fn test_read_remaining() {
        let data = [1, 2, 3, 4];
        let mut offset = 1;
        assert_eq!(read_remaining(&data, &mut offset), vec![2, 3, 4]);
        assert_eq!(offset, 4);
        assert!(read_remaining(&data, &mut offset).is_empty());
    }
}
