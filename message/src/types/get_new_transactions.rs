use chain::{Transaction, TransactionId, TransactionRef};
use error::{Error, MessageResult};
use network::{NETWORK_MAX_PACKET_SIZE, TRANSACTION_MAX_SIZE};
use ser::{Reader, Stream};
use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;

/// Fetches gossiped transaction bodies by id. The reply returns the
/// transactions the peer still has; missing ids are simply absent.
#[derive(Debug, Clone, PartialEq)]
pub struct GetNewTransactions {
    pub transaction_ids: Vec<TransactionId>,
}

impl GetNewTransactions {
    pub const TYPE: u8 = 0x09;

    pub fn serialize_request(&self, stream: &mut Stream) {
        stream.append_list::<TransactionId, TransactionId>(&self.transaction_ids);
    }

    pub fn deserialize_request<T>(reader: &mut Reader<T>) -> MessageResult<GetNewTransactions>
    where
        T: io::Read,
    {
        let packet = GetNewTransactions {
            transaction_ids: reader.read_list(u16::max_value() as usize)?,
        };
        if !packet.validate_request() {
            return Err(Error::InvalidRequest);
        }
        Ok(packet)
    }

    fn validate_request(&self) -> bool {
        if self.transaction_ids.is_empty() {
            return false;
        }
        let mut size = 0usize;
        for id in &self.transaction_ids {
            if id.transaction_size() == 0 || id.transaction_size() > TRANSACTION_MAX_SIZE {
                return false;
            }
            size += id.transaction_size();
        }
        size <= NETWORK_MAX_PACKET_SIZE - 1024
    }

    pub fn serialize_response(&self, response: &[TransactionRef], stream: &mut Stream) {
        let transactions: Vec<&Transaction> = response
            .iter()
            .map(|transaction| &**transaction)
            .collect();
        stream.append_list::<Transaction, &Transaction>(&transactions);
    }

    pub fn deserialize_response<T>(
        &self,
        reader: &mut Reader<T>,
    ) -> MessageResult<Vec<TransactionRef>>
    where
        T: io::Read,
    {
        let transactions: Vec<Transaction> = reader.read_list(self.transaction_ids.len())?;
        let transactions: Vec<TransactionRef> = transactions.into_iter().map(Arc::new).collect();
        if !self.validate_response(&transactions) {
            return Err(Error::InvalidResponse);
        }
        Ok(transactions)
    }

    /// Every returned transaction must have been requested, exactly once.
    fn validate_response(&self, transactions: &[TransactionRef]) -> bool {
        let requested: BTreeSet<TransactionId> = self.transaction_ids.iter().cloned().collect();
        let mut unique = BTreeSet::new();
        transactions.iter().all(|transaction| {
            requested.contains(&transaction.id()) && unique.insert(transaction.id())
        })
    }
}
