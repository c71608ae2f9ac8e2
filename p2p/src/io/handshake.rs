//! Protocol preamble, exchanged as the first frame in both directions:
//! protocol version, the sender's miner id, and the miner id the sender
//! expects on the other end.

use bytes::Bytes;
use crypto::MinerId;
use futures::{Async, Future, Poll};
use io::{read_frame, write_frame, ReadFrame, WriteFrame};
use network::PROTOCOL_VERSION;
use primitives::hash::H160;
use std::io;
use tokio_io::{AsyncRead, AsyncWrite};

const PREAMBLE_SIZE: usize = 1 + 20 + 20;

#[derive(Debug, PartialEq)]
pub struct HandshakeResult {
    pub remote_id: MinerId,
}

/// Outgoing handshake: the remote miner id is known up front and must match.
pub fn handshake<A>(a: A, local_id: MinerId, expected_remote: MinerId) -> Handshake<A>
where
    A: AsyncRead + AsyncWrite,
{
    Handshake {
        local_id: local_id,
        expected_remote: Some(expected_remote),
        state: HandshakeState::SendPreamble {
            future: write_frame(a, &preamble(&local_id, &expected_remote)),
        },
    }
}

/// Incoming handshake: the remote miner id is learned from the preamble.
/// Our own preamble is sent after the peer's arrived.
pub fn accept_handshake<A>(a: A, local_id: MinerId) -> Handshake<A>
where
    A: AsyncRead + AsyncWrite,
{
    Handshake {
        local_id: local_id,
        expected_remote: None,
        state: HandshakeState::ReceivePreamble {
            future: read_frame(a, PREAMBLE_SIZE),
        },
    }
}

fn preamble(local_id: &MinerId, remote_id: &MinerId) -> Vec<u8> {
    let mut result = Vec::with_capacity(PREAMBLE_SIZE);
    result.push(PROTOCOL_VERSION);
    result.extend_from_slice(&*local_id.0);
    result.extend_from_slice(&*remote_id.0);
    result
}

fn parse_preamble(payload: &Bytes, local_id: &MinerId) -> Result<MinerId, io::Error> {
    if payload.len() != PREAMBLE_SIZE {
        return Err(invalid_preamble("invalid preamble size"));
    }
    if payload[0] != PROTOCOL_VERSION {
        return Err(invalid_preamble("invalid protocol version"));
    }

    let remote_id = MinerId(H160::from(&payload[1..21]));
    let declared_local = MinerId(H160::from(&payload[21..41]));
    if !remote_id.is_valid() {
        return Err(invalid_preamble("invalid remote miner id"));
    }
    // the peer may not know who it dialed yet, but a non-empty expectation
    // must match us
    if declared_local.is_valid() && declared_local != *local_id {
        return Err(invalid_preamble("peer expects a different miner"));
    }
    Ok(remote_id)
}

fn invalid_preamble(reason: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.to_owned())
}

enum HandshakeState<A> {
    SendPreamble { future: WriteFrame<A> },
    ReceivePreamble { future: ReadFrame<A> },
    SendPreambleBack { remote_id: MinerId, future: WriteFrame<A> },
}

pub struct Handshake<A> {
    local_id: MinerId,
    expected_remote: Option<MinerId>,
    state: HandshakeState<A>,
}

impl<A> Future for Handshake<A>
where
    A: AsyncRead + AsyncWrite,
{
    type Item = (A, HandshakeResult);
    type Error = io::Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        loop {
            let next_state = match self.state {
                HandshakeState::SendPreamble { ref mut future } => {
                    let stream = try_ready!(future.poll());
                    HandshakeState::ReceivePreamble {
                        future: read_frame(stream, PREAMBLE_SIZE),
                    }
                }
                HandshakeState::ReceivePreamble { ref mut future } => {
                    let (stream, payload) = try_ready!(future.poll());
                    let remote_id = parse_preamble(&payload, &self.local_id)?;

                    match self.expected_remote {
                        // outgoing: preamble already sent, ids must match
                        Some(ref expected) => {
                            if *expected != remote_id {
                                return Err(invalid_preamble("unexpected remote miner id"));
                            }
                            return Ok(Async::Ready((
                                stream,
                                HandshakeResult {
                                    remote_id: remote_id,
                                },
                            )));
                        }
                        // incoming: reply with our own preamble
                        None => HandshakeState::SendPreambleBack {
                            remote_id: remote_id,
                            future: write_frame(
                                stream,
                                &preamble(&self.local_id, &remote_id),
                            ),
                        },
                    }
                }
                HandshakeState::SendPreambleBack {
                    ref remote_id,
                    ref mut future,
                } => {
                    let stream = try_ready!(future.poll());
                    let result = HandshakeResult {
                        remote_id: *remote_id,
                    };
                    return Ok(Async::Ready((stream, result)));
                }
            };
            self.state = next_state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_preamble, preamble, PREAMBLE_SIZE};
    use bytes::Bytes;
    use crypto::{MinerId, SecretKey};

    fn miner(seed: &[u8]) -> MinerId {
        MinerId::from(&SecretKey::from_seed(seed).public())
    }

    #[test]
    fn test_preamble_parsing() {
        let local = miner(b"local");
        let remote = miner(b"remote");

        let payload: Bytes = preamble(&remote, &local).into();
        assert_eq!(payload.len(), PREAMBLE_SIZE);
        assert_eq!(parse_preamble(&payload, &local).unwrap(), remote);
    }

    #[test]
    fn test_preamble_rejects_wrong_receiver() {
        let local = miner(b"local");
        let remote = miner(b"remote");
        let other = miner(b"other");

        let payload: Bytes = preamble(&remote, &other).into();
        assert!(parse_preamble(&payload, &local).is_err());
    }

    #[test]
    fn test_preamble_accepts_unknown_receiver() {
        let local = miner(b"local");
        let remote = miner(b"remote");

        let payload: Bytes = preamble(&remote, &MinerId::default()).into();
        assert_eq!(parse_preamble(&payload, &local).unwrap(), remote);
    }
}
