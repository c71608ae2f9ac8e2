//! Packet envelope. Every frame payload starts with a 4-byte packet id.
//! The next byte is either a request type tag, or the `0x00` response
//! marker followed by the id of the packet being replied to.

use bytes::Bytes;
use chain::{BlockHeader, TransactionRef};
use error::{Error, MessageResult};
use ser::{Reader, Stream};
use types::{
    First, GetBlock, GetBlockHeader, GetBlockResponse, GetNewTransactions, NewBlocks,
    NewTransactions,
};

/// Marker byte distinguishing responses from requests.
pub const RESPONSE_MARKER: u8 = 0x00;

/// A decoded request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    First(First),
    NewBlocks(NewBlocks),
    NewTransactions(NewTransactions),
    GetBlockHeader(GetBlockHeader),
    GetBlock(GetBlock),
    GetNewTransactions(GetNewTransactions),
}

/// A decoded response, interpreted through its originating request.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    BlockHeader(Option<BlockHeader>),
    Block(GetBlockResponse),
    NewTransactions(Vec<TransactionRef>),
}

impl Request {
    pub fn packet_type(&self) -> u8 {
        match *self {
            Request::First(_) => First::TYPE,
            Request::NewBlocks(_) => NewBlocks::TYPE,
            Request::NewTransactions(_) => NewTransactions::TYPE,
            Request::GetBlockHeader(_) => GetBlockHeader::TYPE,
            Request::GetBlock(_) => GetBlock::TYPE,
            Request::GetNewTransactions(_) => GetNewTransactions::TYPE,
        }
    }

    /// True for two-way packets.
    pub fn expects_response(&self) -> bool {
        match *self {
            Request::First(_) | Request::NewBlocks(_) | Request::NewTransactions(_) => false,
            Request::GetBlockHeader(_) | Request::GetBlock(_) | Request::GetNewTransactions(_) => {
                true
            }
        }
    }

    pub fn serialize(&self, stream: &mut Stream) {
        stream.append(&self.packet_type());
        match *self {
            Request::First(ref packet) => packet.serialize_request(stream),
            Request::NewBlocks(ref packet) => packet.serialize_request(stream),
            Request::NewTransactions(ref packet) => packet.serialize_request(stream),
            Request::GetBlockHeader(ref packet) => packet.serialize_request(stream),
            Request::GetBlock(ref packet) => packet.serialize_request(stream),
            Request::GetNewTransactions(ref packet) => packet.serialize_request(stream),
        }
    }

    pub fn deserialize(reader: &mut Reader<&[u8]>) -> MessageResult<Request> {
        let packet_type: u8 = reader.read()?;
        let request = match packet_type {
            First::TYPE => Request::First(First::deserialize_request(reader)?),
            NewBlocks::TYPE => Request::NewBlocks(NewBlocks::deserialize_request(reader)?),
            NewTransactions::TYPE => {
                Request::NewTransactions(NewTransactions::deserialize_request(reader)?)
            }
            GetBlockHeader::TYPE => {
                Request::GetBlockHeader(GetBlockHeader::deserialize_request(reader)?)
            }
            GetBlock::TYPE => Request::GetBlock(GetBlock::deserialize_request(reader)?),
            GetNewTransactions::TYPE => {
                Request::GetNewTransactions(GetNewTransactions::deserialize_request(reader)?)
            }
            _ => return Err(Error::InvalidPacketType),
        };
        Ok(request)
    }

    /// Serializes a response produced for this request. Panics when the
    /// response variant does not belong to the request; pairing them up is
    /// the session's job.
    pub fn serialize_response(&self, response: &Response, stream: &mut Stream) {
        match (self, response) {
            (&Request::GetBlockHeader(ref packet), &Response::BlockHeader(ref header)) => {
                packet.serialize_response(header, stream)
            }
            (&Request::GetBlock(ref packet), &Response::Block(ref block_response)) => {
                packet.serialize_response(block_response, stream)
            }
            (
                &Request::GetNewTransactions(ref packet),
                &Response::NewTransactions(ref transactions),
            ) => packet.serialize_response(transactions, stream),
            _ => panic!("response variant does not match the request"),
        }
    }

    /// Parses and validates the raw response body of this request.
    pub fn deserialize_response(&self, body: &[u8]) -> MessageResult<Response> {
        let mut reader = Reader::new(body);
        let response = match *self {
            Request::GetBlockHeader(ref packet) => {
                Response::BlockHeader(packet.deserialize_response(&mut reader)?)
            }
            Request::GetBlock(ref packet) => {
                Response::Block(packet.deserialize_response(&mut reader)?)
            }
            Request::GetNewTransactions(ref packet) => {
                Response::NewTransactions(packet.deserialize_response(&mut reader)?)
            }
            _ => return Err(Error::InvalidResponse),
        };
        if !reader.is_finished() {
            return Err(Error::Deserialize);
        }
        Ok(response)
    }
}

/// A frame payload split into its envelope parts. Response bodies stay raw
/// until the connection finds the originating request.
#[derive(Debug, Clone, PartialEq)]
pub enum RawMessage {
    Request { id: u32, request: Request },
    Response { id: u32, in_reply_to: u32, body: Bytes },
}

impl RawMessage {
    pub fn deserialize(payload: &[u8]) -> MessageResult<RawMessage> {
        let mut reader = Reader::new(payload);
        let id: u32 = reader.read()?;
        let marker = reader.peek_byte()?;

        if marker == RESPONSE_MARKER {
            let _marker: u8 = reader.read()?;
            let in_reply_to: u32 = reader.read()?;
            let mut body = Vec::new();
            ::std::io::Read::read_to_end(&mut reader, &mut body)
                .map_err(|_| Error::Deserialize)?;
            return Ok(RawMessage::Response {
                id: id,
                in_reply_to: in_reply_to,
                body: body.into(),
            });
        }

        let request = Request::deserialize(&mut reader)?;
        if !reader.is_finished() {
            return Err(Error::Deserialize);
        }
        Ok(RawMessage::Request {
            id: id,
            request: request,
        })
    }
}

/// Builds the raw payload of a request packet.
pub fn to_raw_request(packet_id: u32, request: &Request) -> Bytes {
    let mut stream = Stream::default();
    stream.append(&packet_id);
    request.serialize(&mut stream);
    stream.out()
}

/// Builds the raw payload of a response packet.
pub fn to_raw_response(
    packet_id: u32,
    in_reply_to: u32,
    request: &Request,
    response: &Response,
) -> Bytes {
    let mut stream = Stream::default();
    stream
        .append(&packet_id)
        .append(&RESPONSE_MARKER)
        .append(&in_reply_to);
    request.serialize_response(response, &mut stream);
    stream.out()
}

#[cfg(test)]
mod tests {
    use super::{to_raw_request, to_raw_response, RawMessage, Request, Response};
    use test_data::ChainBuilder;
    use types::{BlockPart, BlockPartPayload, GetBlock, GetBlockHeader, GetBlockResponse, First, NewTransactions};

    #[test]
    fn test_request_round_trip() {
        let mut builder = ChainBuilder::new();
        let genesis = builder.genesis();

        let request = Request::First(First {
            latest_header: genesis.header().clone(),
        });
        let raw = to_raw_request(3, &request);

        match RawMessage::deserialize(&raw).unwrap() {
            RawMessage::Request { id, request: parsed } => {
                assert_eq!(id, 3);
                assert_eq!(parsed, request);
            }
            _ => panic!("expected a request"),
        }
    }

    #[test]
    fn test_response_round_trip() {
        let mut builder = ChainBuilder::new();
        builder.genesis();
        let transactions: Vec<_> = (0..2).map(|i| builder.transfer(2, i)).collect();
        let block = builder.next_block(transactions);

        let request = Request::GetBlock(GetBlock {
            block_id: block.id(),
            header_hash: *block.header_hash(),
            part: BlockPart::Body {
                hash: *block.body_hash(),
            },
        });
        let response = Response::Block(GetBlockResponse {
            expired: false,
            payload: BlockPartPayload::Body(Some(block.body().clone())),
        });

        let raw = to_raw_response(7, 3, &request, &response);
        let (in_reply_to, body) = match RawMessage::deserialize(&raw).unwrap() {
            RawMessage::Response {
                id,
                in_reply_to,
                body,
            } => {
                assert_eq!(id, 7);
                (in_reply_to, body)
            }
            _ => panic!("expected a response"),
        };
        assert_eq!(in_reply_to, 3);
        assert_eq!(request.deserialize_response(&body).unwrap(), response);
    }

    #[test]
    fn test_response_validation_rejects_foreign_header() {
        let mut builder = ChainBuilder::new();
        let genesis = builder.genesis();
        let b2 = builder.next_block(vec![]);
        let b3 = builder.next_block(vec![]);

        let request = Request::GetBlockHeader(GetBlockHeader {
            block_ids_and_hashes: vec![(genesis.id(), *genesis.header_hash())],
        });

        // b2 extends the locator, b3 does not
        let good = Response::BlockHeader(Some(b2.header().clone()));
        let raw = to_raw_response(1, 0, &request, &good);
        let body = match RawMessage::deserialize(&raw).unwrap() {
            RawMessage::Response { body, .. } => body,
            _ => panic!("expected a response"),
        };
        assert!(request.deserialize_response(&body).is_ok());

        let bad = Response::BlockHeader(Some(b3.header().clone()));
        let raw = to_raw_response(1, 0, &request, &bad);
        let body = match RawMessage::deserialize(&raw).unwrap() {
            RawMessage::Response { body, .. } => body,
            _ => panic!("expected a response"),
        };
        assert!(request.deserialize_response(&body).is_err());
    }

    #[test]
    fn test_unknown_packet_type() {
        let raw = [1u8, 0, 0, 0, 0xee];
        assert!(RawMessage::deserialize(&raw).is_err());
    }

    #[test]
    fn test_empty_new_transactions_rejected() {
        let request = Request::NewTransactions(NewTransactions {
            transaction_ids: vec![],
        });
        let raw = to_raw_request(1, &request);
        assert!(RawMessage::deserialize(&raw).is_err());
    }
}
