use chain::BlockHeader;
use error::{Error, MessageResult};
use ser::{Reader, Stream};
use std::io;

/// First packet of a session in both directions: the sender's latest block
/// header. One way, no response.
#[derive(Debug, Clone, PartialEq)]
pub struct First {
    pub latest_header: BlockHeader,
}

impl First {
    pub const TYPE: u8 = 0x01;

    pub fn serialize_request(&self, stream: &mut Stream) {
        stream.append(&self.latest_header);
    }

    pub fn deserialize_request<T>(reader: &mut Reader<T>) -> MessageResult<First>
    where
        T: io::Read,
    {
        let packet = First {
            latest_header: reader.read()?,
        };
        if !packet.validate_request() {
            return Err(Error::InvalidRequest);
        }
        Ok(packet)
    }

    fn validate_request(&self) -> bool {
        self.latest_header.id() != 0
    }
}
