//! Wire frames: a 4-byte little-endian length followed by the payload.
//! A zero-length frame is the keep-alive.

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;

/// Size of the length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// The keep-alive frame, sent every `timeout / 2`.
pub const KEEP_ALIVE_FRAME: [u8; FRAME_HEADER_SIZE] = [0, 0, 0, 0];

/// Wraps a payload into a frame.
pub fn frame(payload: &[u8]) -> Bytes {
    let mut result = vec![0u8; FRAME_HEADER_SIZE + payload.len()];
    LittleEndian::write_u32(&mut result[..FRAME_HEADER_SIZE], payload.len() as u32);
    result[FRAME_HEADER_SIZE..].copy_from_slice(payload);
    result.into()
}

/// True when the frame header announces an empty payload.
pub fn is_keep_alive(header: &[u8; FRAME_HEADER_SIZE]) -> bool {
    LittleEndian::read_u32(header) == 0
}

#[cfg(test)]
mod tests {
    use super::{frame, is_keep_alive, KEEP_ALIVE_FRAME};

    #[test]
    fn test_frame_layout() {
        let framed = frame(b"abc");
        assert_eq!(&framed[..], &[3u8, 0, 0, 0, b'a', b'b', b'c'][..]);
    }

    #[test]
    fn test_keep_alive() {
        assert!(is_keep_alive(&KEEP_ALIVE_FRAME));
        assert!(!is_keep_alive(&[1, 0, 0, 0]));
    }
}
