//! Stream reader used for deserialization.

use std::{fmt, io, marker};

pub fn deserialize<R, T>(buffer: R) -> Result<T, Error>
where
    R: io::Read,
    T: Deserializable,
{
    let mut reader = Reader::from_read(buffer);
    let result = reader.read()?;
    if !reader.is_finished() {
        return Err(Error::UnreadData);
    }

    Ok(result)
}

#[derive(Debug, PartialEq)]
pub enum Error {
    /// Parsed data is malformed.
    MalformedData,
    /// Unexpected end of the byte stream.
    UnexpectedEnd,
    /// Unused data left after deserialization.
    UnreadData,
    /// Container length tag exceeds the allowed maximum.
    OversizedList,
    /// Compressed data cannot be inflated or declares a wrong size.
    InvalidCompressedData,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::MalformedData => "malformed data".fmt(f),
            Error::UnexpectedEnd => "unexpected end".fmt(f),
            Error::UnreadData => "unread data".fmt(f),
            Error::OversizedList => "oversized list".fmt(f),
            Error::InvalidCompressedData => "invalid compressed data".fmt(f),
        }
    }
}

impl From<io::Error> for Error {
    fn from(_: io::Error) -> Self {
        Error::UnexpectedEnd
    }
}

pub trait Deserializable {
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, Error>
    where
        Self: Sized,
        T: io::Read;
}

/// Bitcoin-style structures reader.
#[derive(Debug)]
pub struct Reader<T> {
    buffer: T,
    peeked: Option<u8>,
}

impl<'a> Reader<&'a [u8]> {
    /// Convenient way of creating a reader for slice of data.
    pub fn new(buffer: &'a [u8]) -> Self {
        Reader {
            buffer: buffer,
            peeked: None,
        }
    }
}

impl<T> io::Read for Reader<T>
where
    T: io::Read,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // most of the times, there will be nothing in peeked,
        // so to make it as fast as possible, check this condition first
        if self.peeked.is_none() {
            return self.buffer.read(buf);
        }

        if buf.is_empty() {
            return Ok(0);
        }

        buf[0] = self.peeked.take().expect("peeked is Some; qed");
        Ok(1 + self.buffer.read(&mut buf[1..])?)
    }
}

impl<T> Reader<T>
where
    T: io::Read,
{
    pub fn from_read(buffer: T) -> Self {
        Reader {
            buffer: buffer,
            peeked: None,
        }
    }

    pub fn read<C>(&mut self) -> Result<C, Error>
    where
        C: Deserializable,
    {
        C::deserialize(self)
    }

    pub fn read_slice(&mut self, bytes: &mut [u8]) -> Result<(), Error> {
        io::Read::read_exact(self, bytes).map_err(|_| Error::UnexpectedEnd)
    }

    /// Reads a list prefixed with a u8 length tag.
    pub fn read_list_u8<C>(&mut self, max: usize) -> Result<Vec<C>, Error>
    where
        C: Deserializable,
    {
        let len: u8 = self.read()?;
        self.read_list_body(len as usize, max)
    }

    /// Reads a list prefixed with the default u16 length tag.
    pub fn read_list<C>(&mut self, max: usize) -> Result<Vec<C>, Error>
    where
        C: Deserializable,
    {
        let len: u16 = self.read()?;
        self.read_list_body(len as usize, max)
    }

    /// Reads a list prefixed with a u32 length tag.
    pub fn read_list_u32<C>(&mut self, max: usize) -> Result<Vec<C>, Error>
    where
        C: Deserializable,
    {
        let len: u32 = self.read()?;
        self.read_list_body(len as usize, max)
    }

    fn read_list_body<C>(&mut self, len: usize, max: usize) -> Result<Vec<C>, Error>
    where
        C: Deserializable,
    {
        if len > max {
            return Err(Error::OversizedList);
        }

        let mut result = Vec::with_capacity(len);
        for _ in 0..len {
            result.push(self.read()?);
        }

        Ok(result)
    }

    /// Returns true if the reader is at the end of the buffer.
    pub fn is_finished(&mut self) -> bool {
        if self.peeked.is_some() {
            return false;
        }

        let peek: &mut [u8] = &mut [0u8];
        match self.read_slice(peek) {
            Ok(_) => {
                self.peeked = Some(peek[0]);
                false
            }
            Err(_) => true,
        }
    }

    /// Peek the next byte without consuming it.
    pub fn peek_byte(&mut self) -> Result<u8, Error> {
        match self.peeked {
            Some(b) => Ok(b),
            None => {
                let peek: &mut [u8] = &mut [0u8];
                self.read_slice(peek)?;
                self.peeked = Some(peek[0]);
                Ok(peek[0])
            }
        }
    }
}

/// Should be used to iterate over structures of the same type
pub struct ReadIterator<R, T> {
    reader: Reader<R>,
    iter_type: marker::PhantomData<T>,
}

impl<R, T> Iterator for ReadIterator<R, T>
where
    R: io::Read,
    T: Deserializable,
{
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.is_finished() {
            None
        } else {
            Some(self.reader.read())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{deserialize, Error, Reader};

    #[test]
    fn test_reader_read() {
        let buffer = vec![1u8, 2, 0, 3, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0];

        let mut reader = Reader::new(&buffer);
        assert!(!reader.is_finished());
        assert_eq!(1u8, reader.read().unwrap());
        assert_eq!(2u16, reader.read().unwrap());
        assert_eq!(3u32, reader.read().unwrap());
        assert_eq!(4u64, reader.read().unwrap());
        assert!(reader.is_finished());
        assert_eq!(Error::UnexpectedEnd, reader.read::<u8>().unwrap_err());
    }

    #[test]
    fn test_reader_list() {
        let buffer = vec![3u8, 0, 1, 2, 3];
        let mut reader = Reader::new(&buffer);
        let result: Vec<u8> = reader.read_list(100).unwrap();
        assert_eq!(result, vec![1u8, 2, 3]);
        assert!(reader.is_finished());
    }

    #[test]
    fn test_reader_list_overflow() {
        let buffer = vec![3u8, 0, 1, 2, 3];
        let mut reader = Reader::new(&buffer);
        assert_eq!(
            Error::OversizedList,
            reader.read_list::<u8>(2).unwrap_err()
        );
    }

    #[test]
    fn test_deserialize_rejects_unread_data() {
        let buffer = vec![1u8, 2];
        assert_eq!(Err(Error::UnreadData), deserialize::<_, u8>(&buffer[..]));
    }
}
