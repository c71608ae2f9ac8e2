use chain::TransactionId;
use error::{Error, MessageResult};
use ser::{Reader, Stream};
use std::io;

/// Gossip push with ids of new transactions. One way, no response.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransactions {
    pub transaction_ids: Vec<TransactionId>,
}

impl NewTransactions {
    pub const TYPE: u8 = 0x05;

    /// Ids per packet; sessions flush their buffers at this size.
    pub const MAX_TRANSACTION_IDS: usize = 16384;

    pub fn serialize_request(&self, stream: &mut Stream) {
        stream.append_list::<TransactionId, TransactionId>(&self.transaction_ids);
    }

    pub fn deserialize_request<T>(reader: &mut Reader<T>) -> MessageResult<NewTransactions>
    where
        T: io::Read,
    {
        let packet = NewTransactions {
            transaction_ids: reader.read_list(NewTransactions::MAX_TRANSACTION_IDS)?,
        };
        if packet.transaction_ids.is_empty() {
            return Err(Error::InvalidRequest);
        }
        Ok(packet)
    }
}
