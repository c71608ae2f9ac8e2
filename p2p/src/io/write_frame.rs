use futures::{Future, Poll};
use message::frame;
use std::io;
use tokio_io::io::{write_all, WriteAll};
use tokio_io::AsyncWrite;

/// Writes one framed payload.
pub fn write_frame<A>(a: A, payload: &[u8]) -> WriteFrame<A>
where
    A: AsyncWrite,
{
    WriteFrame {
        future: write_all(a, frame(payload).take()),
    }
}

pub struct WriteFrame<A> {
    future: WriteAll<A, Vec<u8>>,
}

impl<A> Future for WriteFrame<A>
where
    A: AsyncWrite,
{
    type Item = A;
    type Error = io::Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        let (stream, _) = try_ready!(self.future.poll());
        Ok(stream.into())
    }
}

#[cfg(test)]
mod tests {
    use super::write_frame;
    use futures::Future;
    use tokio_io::io::AllowStdIo;

    #[test]
    fn test_write_frame() {
        let buffer = AllowStdIo::new(Vec::new());
        let buffer = write_frame(buffer, &[1, 2, 3]).wait().unwrap();
        assert_eq!(buffer.into_inner(), vec![3u8, 0, 0, 0, 1, 2, 3]);
    }
}
