//! Attach stream framing.
//!
//! Without a TTY the daemon multiplexes stdout and stderr over one stream.
//! Each frame is an 8-byte header (stream tag, 3 reserved bytes, payload
//! length as big-endian u32) followed by the payload.

use cincan_shared::constants::stream::{FRAME_HEADER_LEN, TAG_STDERR, TAG_STDIN, TAG_STDOUT};
use cincan_shared::errors::{CincanError, CincanResult};
use std::io::{self, Read};

/// Which standard stream a frame belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamTag {
    Stdin,
    Stdout,
    Stderr,
    Unknown(u8),
}

impl From<u8> for StreamTag {
    fn from(tag: u8) -> Self {
        match tag {
            TAG_STDIN => StreamTag::Stdin,
            TAG_STDOUT => StreamTag::Stdout,
            TAG_STDERR => StreamTag::Stderr,
            other => StreamTag::Unknown(other),
        }
    }
}

/// Fill `buf` completely. Returns the number of bytes read before EOF.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read one frame. `None` on a clean end of stream before a header.
///
/// A stream ending inside a header or a payload is a protocol error.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> CincanResult<Option<(StreamTag, Vec<u8>)>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    let got = read_full(reader, &mut header)
        .map_err(|e| CincanError::Protocol(format!("Failed to read frame header: {}", e)))?;
    if got == 0 {
        return Ok(None);
    }
    if got < FRAME_HEADER_LEN {
        return Err(CincanError::Protocol(format!(
            "Stream ended inside a frame header ({} of {} bytes)",
            got, FRAME_HEADER_LEN
        )));
    }

    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let mut payload = vec![0u8; len];
    let got = read_full(reader, &mut payload)
        .map_err(|e| CincanError::Protocol(format!("Failed to read frame payload: {}", e)))?;
    if got < len {
        return Err(CincanError::Protocol(format!(
            "Failed to read all data from the container ({} of {} bytes)",
            got, len
        )));
    }
    Ok(Some((StreamTag::from(header[0]), payload)))
}

/// Encode one frame, used by test doubles of the daemon.
pub fn encode_frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.push(tag);
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_frames_in_sequence() {
        let mut data = encode_frame(TAG_STDOUT, b"hello");
        data.extend(encode_frame(TAG_STDERR, b"oops"));
        data.extend(encode_frame(TAG_STDOUT, b""));
        let mut reader = data.as_slice();

        let (tag, payload) = read_frame(&mut reader).unwrap().unwrap();
        assert_eq!(tag, StreamTag::Stdout);
        assert_eq!(payload, b"hello");
        let (tag, payload) = read_frame(&mut reader).unwrap().unwrap();
        assert_eq!(tag, StreamTag::Stderr);
        assert_eq!(payload, b"oops");
        let (_, payload) = read_frame(&mut reader).unwrap().unwrap();
        assert!(payload.is_empty());
        assert!(read_frame(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_short_payload_is_fatal() {
        let mut data = encode_frame(TAG_STDOUT, b"abcdef");
        data.truncate(FRAME_HEADER_LEN + 3);
        let err = read_frame(&mut data.as_slice()).unwrap_err();
        assert!(matches!(err, CincanError::Protocol(_)));
    }

    #[test]
    fn test_short_header_is_fatal() {
        let data = [1u8, 0, 0];
        assert!(read_frame(&mut &data[..]).is_err());
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(StreamTag::from(7), StreamTag::Unknown(7));
    }
}
