use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use futures::{Async, Future, Poll};
use message::FRAME_HEADER_SIZE;
use std::io;
use tokio_io::io::{read_exact, ReadExact};
use tokio_io::AsyncRead;

/// Reads one frame: the 4-byte little-endian length, then the payload.
/// Yields an empty payload for the keep-alive frame.
pub fn read_frame<A>(a: A, max_size: usize) -> ReadFrame<A>
where
    A: AsyncRead,
{
    ReadFrame {
        max_size: max_size,
        state: ReadFrameState::ReadHeader {
            future: read_exact(a, [0u8; FRAME_HEADER_SIZE]),
        },
    }
}

enum ReadFrameState<A> {
    ReadHeader {
        future: ReadExact<A, [u8; FRAME_HEADER_SIZE]>,
    },
    ReadPayload {
        future: ReadExact<A, Vec<u8>>,
    },
}

pub struct ReadFrame<A> {
    state: ReadFrameState<A>,
    max_size: usize,
}

impl<A> Future for ReadFrame<A>
where
    A: AsyncRead,
{
    type Item = (A, Bytes);
    type Error = io::Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        loop {
            let next_state = match self.state {
                ReadFrameState::ReadHeader { ref mut future } => {
                    let (read, header) = try_ready!(future.poll());
                    let len = LittleEndian::read_u32(&header) as usize;
                    if len > self.max_size {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "oversized frame",
                        ));
                    }
                    if len == 0 {
                        return Ok(Async::Ready((read, Bytes::new())));
                    }
                    ReadFrameState::ReadPayload {
                        future: read_exact(read, vec![0u8; len]),
                    }
                }
                ReadFrameState::ReadPayload { ref mut future } => {
                    let (read, payload) = try_ready!(future.poll());
                    return Ok(Async::Ready((read, payload.into())));
                }
            };
            self.state = next_state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::read_frame;
    use bytes::Bytes;
    use futures::Future;

    #[test]
    fn test_read_frame() {
        let raw: Bytes = "03000000010203".into();
        let (_, payload) = read_frame(raw.as_ref(), 1024).wait().unwrap();
        assert_eq!(payload, "010203".into());
    }

    #[test]
    fn test_read_keep_alive() {
        let raw: Bytes = "00000000".into();
        let (_, payload) = read_frame(raw.as_ref(), 1024).wait().unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_read_oversized_frame() {
        let raw: Bytes = "ffffffff".into();
        assert!(read_frame(raw.as_ref(), 1024).wait().is_err());
    }

    #[test]
    fn test_read_truncated_frame() {
        let raw: Bytes = "0a0000000102".into();
        assert!(read_frame(raw.as_ref(), 1024).wait().is_err());
    }
}
