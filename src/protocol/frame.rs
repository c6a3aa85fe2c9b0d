//! Length-prefixed, magic-checked message frames over a blocking socket
//!
//! Every message on the wire is one frame:
//!
//! ```text
//! offset 0:  magic          u32, big-endian, always 0x18273645
//! offset 4:  content_length u64, big-endian
//! offset 12: payload        content_length bytes
//! ```
//!
//! Big-endian (network order) is a deliberate choice, pinned by tests; the
//! header never travels as a raw in-memory image. A reader rejects a frame
//! whose magic differs, and rejects an over-long declared length before
//! allocating anything.
// (c) 2025 Ross Younger

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::BytesMut;

/// Every frame leads with this constant
pub const MAGIC: u32 = 0x1827_3645;

/// On-wire size of the frame header (any change would be a breaking
/// protocol change)
pub const HEADER_SIZE: usize = 12;
static_assertions::const_assert_eq!(
    HEADER_SIZE,
    std::mem::size_of::<u32>() + std::mem::size_of::<u64>()
);

/// Largest payload a reader will accept unless configured otherwise.
///
/// This bounds memory consumption in the face of corruption or a confused
/// peer; the declared length is checked against it before allocation.
pub const DEFAULT_MAX_PAYLOAD: u64 = 16 * 1024 * 1024;

/// The client-to-server graceful-close payload. A server worker that
/// receives this closes the connection without responding.
pub const QUIT_SENTINEL: &[u8] = b"quit";

/// Transport-level failure: the socket broke, or the peer sent something
/// that is not a frame
#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    /// Socket failure, including the peer closing mid-frame
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    /// The frame did not lead with [`MAGIC`]
    #[error("bad frame magic {found:#010x}")]
    BadMagic {
        /// what arrived instead of the magic
        found: u32,
    },
    /// The declared payload length exceeds the reader's limit
    #[error("declared frame length {length} exceeds the {limit} byte limit")]
    TooLong {
        /// declared content length
        length: u64,
        /// the reader's configured ceiling
        limit: u64,
    },
}

/// Sends one payload as one frame, flushing the writer.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    writer.write_u32::<BigEndian>(MAGIC)?;
    writer.write_u64::<BigEndian>(payload.len() as u64)?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Reads exactly one frame, returning its payload.
///
/// Blocks until a whole frame has arrived. `limit` caps the declared
/// payload length; see [`DEFAULT_MAX_PAYLOAD`].
pub fn read_frame<R: Read>(reader: &mut R, limit: u64) -> Result<Vec<u8>, FrameError> {
    let magic = reader.read_u32::<BigEndian>()?;
    if magic != MAGIC {
        return Err(FrameError::BadMagic { found: magic });
    }
    let length = reader.read_u64::<BigEndian>()?;
    if length > limit {
        return Err(FrameError::TooLong { length, limit });
    }
    let length = usize::try_from(length).map_err(|_| FrameError::TooLong { length, limit })?;
    let mut payload = BytesMut::zeroed(length);
    reader.read_exact(&mut payload)?;
    Ok(payload.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    #[test]
    fn roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").unwrap();
        let payload = read_frame(&mut Cursor::new(buf), DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn empty_payload_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"").unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        let payload = read_frame(&mut Cursor::new(buf), DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(payload, b"");
    }

    // The wire encoding is big-endian and must never drift.
    #[test]
    fn wire_bytes_are_pinned() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hi").unwrap();
        let expected = [
            0x18, 0x27, 0x36, 0x45, // magic
            0, 0, 0, 0, 0, 0, 0, 2, // content length
            b'h', b'i',
        ];
        assert_eq!(buf, expected);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"x").unwrap();
        buf[0] ^= 0xff;
        let err = read_frame(&mut Cursor::new(buf), DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, FrameError::BadMagic { .. }));
    }

    #[test]
    fn over_long_declaration_is_rejected_before_allocation() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC.to_be_bytes());
        buf.extend_from_slice(&u64::MAX.to_be_bytes());
        let err = read_frame(&mut Cursor::new(buf), 1024).unwrap_err();
        assert!(matches!(
            err,
            FrameError::TooLong {
                length: u64::MAX,
                limit: 1024
            }
        ));
    }

    #[test]
    fn short_read_is_a_transport_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"abcdef").unwrap();
        buf.truncate(buf.len() - 2);
        let err = read_frame(&mut Cursor::new(buf), DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[test]
    fn frames_are_sequential() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"first").unwrap();
        write_frame(&mut buf, b"second").unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor, 1024).unwrap(), b"first");
        assert_eq!(read_frame(&mut cursor, 1024).unwrap(), b"second");
    }
}
