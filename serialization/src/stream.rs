//! Stream used for serialization of the wire and storage formats.

use bytes::Bytes;
use std::borrow::Borrow;
use std::io::{self, Write};

/// Serializes single object into a vector of bytes.
pub fn serialize<T>(t: &T) -> Bytes
where
    T: Serializable,
{
    let mut stream = Stream::default();
    stream.append(t);
    stream.out()
}

/// Returns the size an object occupies when serialized.
pub fn serialized_size<T>(t: &T) -> usize
where
    T: Serializable,
{
    serialize(t).len()
}

pub trait Serializable {
    /// Serialize the struct and appends it to the end of stream.
    fn serialize(&self, s: &mut Stream);
}

/// Stream used for serialization. All primitives are little-endian, all
/// containers are length-prefixed with an explicit u8 / u16 / u32 tag.
#[derive(Default)]
pub struct Stream {
    buffer: Vec<u8>,
}

impl Stream {
    /// New stream
    pub fn new() -> Self {
        Stream { buffer: Vec::new() }
    }

    /// Serializes the struct and appends it to the end of stream.
    pub fn append<T>(&mut self, t: &T) -> &mut Self
    where
        T: Serializable,
    {
        t.serialize(self);
        self
    }

    /// Appends raw bytes to the end of the stream.
    pub fn append_slice(&mut self, bytes: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(bytes);
        self
    }

    /// Appends a list with a u8 length tag. Panics if the list is too long,
    /// callers are expected to enforce their own limits first.
    pub fn append_list_u8<T, K>(&mut self, t: &[K]) -> &mut Self
    where
        T: Serializable,
        K: Borrow<T>,
    {
        assert!(t.len() <= u8::max_value() as usize);
        self.append(&(t.len() as u8));
        for i in t {
            self.append(i.borrow());
        }
        self
    }

    /// Appends a list with the default u16 length tag.
    pub fn append_list<T, K>(&mut self, t: &[K]) -> &mut Self
    where
        T: Serializable,
        K: Borrow<T>,
    {
        assert!(t.len() <= u16::max_value() as usize);
        self.append(&(t.len() as u16));
        for i in t {
            self.append(i.borrow());
        }
        self
    }

    /// Appends a list with a u32 length tag.
    pub fn append_list_u32<T, K>(&mut self, t: &[K]) -> &mut Self
    where
        T: Serializable,
        K: Borrow<T>,
    {
        assert!(t.len() <= u32::max_value() as usize);
        self.append(&(t.len() as u32));
        for i in t {
            self.append(i.borrow());
        }
        self
    }

    /// Current position of the stream.
    pub fn pos(&self) -> usize {
        self.buffer.len()
    }

    /// Full stream.
    pub fn out(self) -> Bytes {
        self.buffer.into()
    }
}

impl Write for Stream {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        self.buffer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::{serialize, Stream};
    use bytes::Bytes;

    #[test]
    fn test_stream_append() {
        let mut stream = Stream::default();
        stream.append(&1u8).append(&2u16).append(&3u32).append(&4u64);

        let expected: Bytes = "010200030000000400000000000000".into();
        assert_eq!(expected, stream.out());
    }

    #[test]
    fn test_stream_append_list() {
        let mut stream = Stream::default();
        stream.append_list::<u8, u8>(&[1, 2, 3]);
        let expected: Bytes = "0300010203".into();
        assert_eq!(expected, stream.out());
    }

    #[test]
    fn test_serialize_primitive() {
        let expected: Bytes = "ffff0000".into();
        assert_eq!(expected, serialize(&0xffffu32));
    }
}
