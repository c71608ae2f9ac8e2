//! Compressed-data primitive: u32 uncompressed size followed by a
//! u32-length-prefixed zlib stream.

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use reader::{Error, Reader};
use std::io::{self, Read, Write};
use stream::Stream;
use {COMPRESSION_LEVEL, MAX_DATA_SIZE};

impl Stream {
    /// Appends raw data behind the compressed-data envelope.
    pub fn append_compressed(&mut self, data: &[u8]) -> &mut Self {
        assert!(data.len() <= MAX_DATA_SIZE);

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(COMPRESSION_LEVEL));
        encoder.write_all(data).expect("writing to memory buffer");
        let compressed = encoder.finish().expect("flushing to memory buffer");
        assert!(compressed.len() <= u32::max_value() as usize);

        self.append(&(data.len() as u32));
        self.append(&(compressed.len() as u32));
        self.append_slice(&compressed);
        self
    }
}

impl<T> Reader<T>
where
    T: io::Read,
{
    /// Reads data behind the compressed-data envelope.
    pub fn read_compressed(&mut self) -> Result<Vec<u8>, Error> {
        let uncompressed_size = self.read_u32::<LittleEndian>()? as usize;
        if uncompressed_size > MAX_DATA_SIZE {
            return Err(Error::InvalidCompressedData);
        }

        let compressed_size = self.read_u32::<LittleEndian>()? as usize;
        if compressed_size > MAX_DATA_SIZE {
            return Err(Error::InvalidCompressedData);
        }

        let mut compressed = vec![0u8; compressed_size];
        self.read_slice(&mut compressed)?;

        let mut data = Vec::with_capacity(uncompressed_size);
        let mut decoder = ZlibDecoder::new(&compressed[..]);
        decoder
            .take((uncompressed_size + 1) as u64)
            .read_to_end(&mut data)
            .map_err(|_| Error::InvalidCompressedData)?;

        if data.len() != uncompressed_size {
            return Err(Error::InvalidCompressedData);
        }

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use reader::Reader;
    use stream::Stream;

    #[test]
    fn test_compressed_round_trip() {
        let data: Vec<u8> = (0..10240).map(|i| (i % 251) as u8).collect();

        let mut stream = Stream::default();
        stream.append_compressed(&data);
        let serialized = stream.out();
        assert!(serialized.len() < data.len());

        let mut reader = Reader::new(&serialized);
        let decompressed = reader.read_compressed().unwrap();
        assert_eq!(decompressed, data);
        assert!(reader.is_finished());
    }

    #[test]
    fn test_compressed_rejects_size_mismatch() {
        let mut stream = Stream::default();
        stream.append_compressed(b"some payload");
        let mut serialized = stream.out().take();
        // declare a bigger uncompressed size than the stream inflates to
        serialized[0] = serialized[0] + 1;

        let mut reader = Reader::new(&serialized);
        assert!(reader.read_compressed().is_err());
    }
}
