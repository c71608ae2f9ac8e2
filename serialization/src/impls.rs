use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use hash::{H160, H256, H32, H512};
use reader::{Deserializable, Error, Reader};
use std::io;
use stream::{Serializable, Stream};

impl Serializable for bool {
    #[inline]
    fn serialize(&self, s: &mut Stream) {
        s.write_u8(*self as u8).unwrap();
    }
}

impl Serializable for u8 {
    #[inline]
    fn serialize(&self, s: &mut Stream) {
        s.write_u8(*self).unwrap();
    }
}

impl Serializable for u16 {
    #[inline]
    fn serialize(&self, s: &mut Stream) {
        s.write_u16::<LittleEndian>(*self).unwrap();
    }
}

impl Serializable for u32 {
    #[inline]
    fn serialize(&self, s: &mut Stream) {
        s.write_u32::<LittleEndian>(*self).unwrap();
    }
}

impl Serializable for u64 {
    #[inline]
    fn serialize(&self, s: &mut Stream) {
        s.write_u64::<LittleEndian>(*self).unwrap();
    }
}

impl Serializable for i32 {
    #[inline]
    fn serialize(&self, s: &mut Stream) {
        s.write_i32::<LittleEndian>(*self).unwrap();
    }
}

impl Serializable for i64 {
    #[inline]
    fn serialize(&self, s: &mut Stream) {
        s.write_i64::<LittleEndian>(*self).unwrap();
    }
}

impl Deserializable for bool {
    #[inline]
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, Error>
    where
        T: io::Read,
    {
        let value = reader.read_u8()?;
        match value {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::MalformedData),
        }
    }
}

impl Deserializable for u8 {
    #[inline]
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, Error>
    where
        T: io::Read,
    {
        Ok(reader.read_u8()?)
    }
}

impl Deserializable for u16 {
    #[inline]
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, Error>
    where
        T: io::Read,
    {
        Ok(reader.read_u16::<LittleEndian>()?)
    }
}

impl Deserializable for u32 {
    #[inline]
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, Error>
    where
        T: io::Read,
    {
        Ok(reader.read_u32::<LittleEndian>()?)
    }
}

impl Deserializable for u64 {
    #[inline]
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, Error>
    where
        T: io::Read,
    {
        Ok(reader.read_u64::<LittleEndian>()?)
    }
}

impl Deserializable for i32 {
    #[inline]
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, Error>
    where
        T: io::Read,
    {
        Ok(reader.read_i32::<LittleEndian>()?)
    }
}

impl Deserializable for i64 {
    #[inline]
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, Error>
    where
        T: io::Read,
    {
        Ok(reader.read_i64::<LittleEndian>()?)
    }
}

macro_rules! impl_ser_for_hash {
    ($name: ident, $size: expr) => {
        impl Serializable for $name {
            fn serialize(&self, stream: &mut Stream) {
                stream.append_slice(&**self);
            }
        }

        impl Deserializable for $name {
            fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, Error>
            where
                T: io::Read,
            {
                let mut result = Self::default();
                reader.read_slice(&mut *result)?;
                Ok(result)
            }
        }
    };
}

impl_ser_for_hash!(H32, 4);
impl_ser_for_hash!(H160, 20);
impl_ser_for_hash!(H256, 32);
impl_ser_for_hash!(H512, 64);

impl Serializable for Bytes {
    fn serialize(&self, stream: &mut Stream) {
        assert!(self.len() <= u16::max_value() as usize);
        stream.append(&(self.len() as u16)).append_slice(self);
    }
}

impl Deserializable for Bytes {
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, Error>
    where
        T: io::Read,
    {
        let len: u16 = reader.read()?;
        let mut bytes = Bytes::new_with_len(len as usize);
        reader.read_slice(&mut bytes)?;
        Ok(bytes)
    }
}

impl Serializable for String {
    fn serialize(&self, stream: &mut Stream) {
        let bytes: &[u8] = self.as_ref();
        assert!(bytes.len() <= u16::max_value() as usize);
        stream.append(&(bytes.len() as u16)).append_slice(bytes);
    }
}

impl Deserializable for String {
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, Error>
    where
        T: io::Read,
    {
        let bytes: Bytes = reader.read()?;
        String::from_utf8(bytes.take()).map_err(|_| Error::MalformedData)
    }
}

impl<A, B> Serializable for (A, B)
where
    A: Serializable,
    B: Serializable,
{
    fn serialize(&self, stream: &mut Stream) {
        stream.append(&self.0).append(&self.1);
    }
}

impl<A, B> Deserializable for (A, B)
where
    A: Deserializable,
    B: Deserializable,
{
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, Error>
    where
        T: io::Read,
    {
        Ok((reader.read()?, reader.read()?))
    }
}

#[cfg(test)]
mod tests {
    use super::super::{deserialize, serialize};
    use bytes::Bytes;
    use hash::H256;

    #[test]
    fn test_hash_round_trip() {
        let hash: H256 = "0101010101010101010101010101010101010101010101010101010101010101".into();
        let serialized = serialize(&hash);
        assert_eq!(serialized.len(), 32);
        let parsed: H256 = deserialize(serialized.as_ref()).unwrap();
        assert_eq!(parsed, hash);
    }

    #[test]
    fn test_bytes_round_trip() {
        let bytes: Bytes = "0102030405".into();
        let parsed: Bytes = deserialize(serialize(&bytes).as_ref()).unwrap();
        assert_eq!(parsed, bytes);
    }

    #[test]
    fn test_string_round_trip() {
        let value = "rondo".to_owned();
        let parsed: String = deserialize(serialize(&value).as_ref()).unwrap();
        assert_eq!(parsed, value);
    }
}
