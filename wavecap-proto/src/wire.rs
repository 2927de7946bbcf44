//! Frame layer for the control channel.
//!
//! Every message crosses the fd pair as a 4-byte big-endian length followed
//! by a bincode payload. The length must fall inside `1..=max_frame`; a zero
//! or oversized prefix is a protocol violation, not truncation, and both the
//! read and write side enforce the same window.

use std::io::{self, Read, Write};

/// A length prefix outside the accepted window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("frame length {len} outside 1..={max}")]
pub struct FrameError {
    pub len: u32,
    pub max: u32,
}

fn check_len(len: u32, max_frame: u32) -> io::Result<()> {
    if (1..=max_frame).contains(&len) {
        return Ok(());
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        FrameError {
            len,
            max: max_frame,
        },
    ))
}

pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(payload);
    frame
}

/// Read one complete frame. `Ok(None)` means clean EOF at a frame boundary.
pub fn read_frame<R: Read>(r: &mut R, max_frame: u32) -> io::Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; 4];
    match r.read_exact(&mut prefix) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(prefix);
    check_len(len, max_frame)?;

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok(Some(payload))
}

/// Write one frame. Nothing is written when the payload falls outside the
/// window, so a rejected frame never corrupts the stream.
pub fn write_frame<W: Write>(w: &mut W, payload: &[u8], max_frame: u32) -> io::Result<()> {
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    check_len(len, max_frame)?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(payload)?;
    w.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefix_round_trip() {
        let frame = encode_frame(b"hello");
        assert_eq!(frame.len(), 9);

        let mut cursor = std::io::Cursor::new(frame);
        let payload = read_frame(&mut cursor, 64).unwrap().unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn zero_and_oversized_prefixes_are_rejected() {
        let mut zero = std::io::Cursor::new(vec![0u8; 4]);
        let err = read_frame(&mut zero, 16).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

        let mut big = std::io::Cursor::new(256u32.to_be_bytes().to_vec());
        let err = read_frame(&mut big, 16).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn write_side_honors_the_same_window() {
        let mut out = Vec::new();
        assert!(write_frame(&mut out, b"", 16).is_err());
        assert!(write_frame(&mut out, &[0u8; 17], 16).is_err());
        // Rejected frames must leave the stream untouched.
        assert!(out.is_empty());

        write_frame(&mut out, b"ok", 16).unwrap();
        assert_eq!(out, encode_frame(b"ok"));
    }

    #[test]
    fn eof_between_frames_is_clean() {
        let mut cursor = std::io::Cursor::new(Vec::new());
        assert!(read_frame(&mut cursor, 16).unwrap().is_none());
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut frame = encode_frame(b"hello");
        frame.truncate(6);
        let mut cursor = std::io::Cursor::new(frame);
        assert!(read_frame(&mut cursor, 16).is_err());
    }
}
