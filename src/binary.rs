//! Big-endian read helpers for the envelope message format
//!
//! Every multi-byte integer in the message format is big-endian, and every
//! variable-length field is preceded by its length. These helpers wrap
//! `read_exact` so that a short stream always surfaces as
//! `io::ErrorKind::UnexpectedEof` instead of silently zero-filled fields.

use std::io::{self, Read};

/// Read a u8 from a reader
pub fn read_u8<R: Read>(reader: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Read a u16 (big-endian) from a reader
pub fn read_u16_be<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

/// Read a u32 (big-endian) from a reader
pub fn read_u32_be<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Read a fixed-size array from a reader
pub fn read_array<R: Read, const N: usize>(reader: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read exactly n bytes from a reader
///
/// The length comes from the wire, so the buffer grows with the data that is
/// actually present rather than being allocated up front.
pub fn read_bytes<R: Read>(reader: &mut R, n: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(n.min(8 * 1024));
    let read = reader.by_ref().take(n as u64).read_to_end(&mut buf)?;
    if read != n {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, stream ended after {}", n, read),
        ));
    }
    Ok(buf)
}

/// Read a u16 length prefix followed by that many bytes
pub fn read_prefixed_bytes<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = read_u16_be(reader)?;
    read_bytes(reader, len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_integers() {
        let mut cursor = Cursor::new(vec![0x42, 0x12, 0x34, 0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(read_u8(&mut cursor).unwrap(), 0x42);
        assert_eq!(read_u16_be(&mut cursor).unwrap(), 0x1234);
        assert_eq!(read_u32_be(&mut cursor).unwrap(), 0xDEADBEEF);
    }

    #[test]
    fn test_read_array() {
        let mut cursor = Cursor::new((0u8..16).collect::<Vec<_>>());
        let id: [u8; 16] = read_array(&mut cursor).unwrap();
        assert_eq!(id[0], 0);
        assert_eq!(id[15], 15);
    }

    #[test]
    fn test_short_read_is_eof() {
        let mut cursor = Cursor::new(vec![0x01]);
        let err = read_u16_be(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_read_bytes_exact() {
        let mut cursor = Cursor::new(vec![1, 2, 3, 4, 5]);
        assert_eq!(read_bytes(&mut cursor, 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(read_bytes(&mut cursor, 2).unwrap(), vec![4, 5]);
        assert_eq!(read_bytes(&mut cursor, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_read_bytes_huge_length_fails_on_eof() {
        let mut cursor = Cursor::new(vec![0u8; 10]);
        let err = read_bytes(&mut cursor, u32::MAX as usize).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_read_prefixed_bytes() {
        let mut cursor = Cursor::new(vec![0x00, 0x03, b'a', b'w', b's', 0xFF]);
        assert_eq!(read_prefixed_bytes(&mut cursor).unwrap(), b"aws".to_vec());
        assert_eq!(read_u8(&mut cursor).unwrap(), 0xFF);
    }
}
