use chain::BlockHeader;
use error::{Error, MessageResult};
use ser::{Reader, Stream};
use std::io;

/// Push notification that the sender's chain advanced, carrying its new
/// latest header. One way, no response.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBlocks {
    pub latest_header: BlockHeader,
}

impl NewBlocks {
    pub const TYPE: u8 = 0x04;

    pub fn serialize_request(&self, stream: &mut Stream) {
        stream.append(&self.latest_header);
    }

    pub fn deserialize_request<T>(reader: &mut Reader<T>) -> MessageResult<NewBlocks>
    where
        T: io::Read,
    {
        let packet = NewBlocks {
            latest_header: reader.read()?,
        };
        if packet.latest_header.id() == 0 {
            return Err(Error::InvalidRequest);
        }
        Ok(packet)
    }
}
