//! Per-connection runtime state: the frame sender, packet-id bookkeeping
//! and the request/reply correlation map.

use crypto::MinerId;
use futures::sync::mpsc::UnboundedSender;
use message::{frame, to_raw_request, to_raw_response, RawMessage, Request, Response,
              KEEP_ALIVE_FRAME};
use parking_lot::Mutex;
use protocol::{InboundConnectionRef, OutboundConnection, SessionError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// In-flight request packets per connection.
pub const MAX_WAITING_PACKETS: usize = 64;

/// Transmit half of a connection. Shared with the session as its
/// `OutboundConnection`.
pub struct ConnectionSender {
    remote_id: MinerId,
    tx: UnboundedSender<Vec<u8>>,
    timeout: Duration,
    next_packet_id: AtomicUsize,
    expected_incoming_id: AtomicUsize,
    last_keep_alive_sent: Mutex<Instant>,
    waiting: Mutex<VecDeque<(u32, Request, Instant)>>,
    closed: AtomicBool,
}

impl ConnectionSender {
    pub fn new(
        remote_id: MinerId,
        tx: UnboundedSender<Vec<u8>>,
        timeout: Duration,
    ) -> ConnectionSender {
        ConnectionSender {
            remote_id: remote_id,
            tx: tx,
            timeout: timeout,
            next_packet_id: AtomicUsize::new(0),
            expected_incoming_id: AtomicUsize::new(0),
            last_keep_alive_sent: Mutex::new(Instant::now()),
            waiting: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn remote_id(&self) -> &MinerId {
        &self.remote_id
    }

    fn send_frame(&self, framed: Vec<u8>) {
        if self.is_closed() {
            return;
        }
        if self.tx.unbounded_send(framed).is_err() {
            // writer is gone
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Sends the keep-alive frame when half the timeout passed since the
    /// previous one.
    pub fn maybe_send_keep_alive(&self) {
        let mut last = self.last_keep_alive_sent.lock();
        if last.elapsed() < self.timeout / 2 {
            return;
        }
        *last = Instant::now();
        trace!(target: "p2p", "sending keep alive to {}", self.remote_id);
        self.send_frame(KEEP_ALIVE_FRAME.to_vec());
    }

    /// Incoming packet ids must be exactly sequential.
    pub fn check_incoming_id(&self, id: u32) -> Result<(), SessionError> {
        let expected = self.expected_incoming_id.fetch_add(1, Ordering::SeqCst) as u32;
        if id != expected {
            return Err(SessionError::new(format!(
                "invalid packet id {} (expected {})",
                id, expected
            )));
        }
        Ok(())
    }

    /// Resolves a reply to the request that originated it. Also enforces
    /// the reply timeout on the oldest in-flight request.
    pub fn take_waiting(&self, in_reply_to: u32) -> Result<Request, SessionError> {
        let mut waiting = self.waiting.lock();
        if let Some(&(_, _, sent_at)) = waiting.front() {
            if sent_at.elapsed() > self.timeout {
                return Err(SessionError::new("waited too long for response packet"));
            }
        }

        let position = waiting
            .iter()
            .position(|&(id, _, _)| id == in_reply_to)
            .ok_or_else(|| SessionError::new("invalid response packet id"))?;
        let (_, request, _) = waiting
            .remove(position)
            .expect("position was just found; qed");
        Ok(request)
    }
}

impl OutboundConnection for ConnectionSender {
    fn send_request(&self, request: Request) {
        if self.is_closed() {
            return;
        }

        let id = self.next_packet_id.fetch_add(1, Ordering::SeqCst) as u32;
        let payload = to_raw_request(id, &request);
        if request.expects_response() {
            let mut waiting = self.waiting.lock();
            if waiting.len() >= MAX_WAITING_PACKETS {
                drop(waiting);
                warn!(target: "p2p", "{}: too many waiting packets", self.remote_id);
                self.close();
                return;
            }
            waiting.push_back((id, request, Instant::now()));
        }
        self.send_frame(frame(&payload).take());
    }

    fn send_response(&self, in_reply_to: u32, request: &Request, response: Response) {
        if self.is_closed() {
            return;
        }
        let id = self.next_packet_id.fetch_add(1, Ordering::SeqCst) as u32;
        let payload = to_raw_response(id, in_reply_to, request, &response);
        self.send_frame(frame(&payload).take());
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A registered connection: the sender plus its session.
pub struct Channel {
    remote_id: MinerId,
    outgoing: bool,
    sender: Arc<ConnectionSender>,
    session: InboundConnectionRef,
    session_closed: AtomicBool,
}

impl Channel {
    pub fn new(
        remote_id: MinerId,
        outgoing: bool,
        sender: Arc<ConnectionSender>,
        session: InboundConnectionRef,
    ) -> Channel {
        Channel {
            remote_id: remote_id,
            outgoing: outgoing,
            sender: sender,
            session: session,
            session_closed: AtomicBool::new(false),
        }
    }

    pub fn remote_id(&self) -> &MinerId {
        &self.remote_id
    }

    pub fn is_outgoing(&self) -> bool {
        self.outgoing
    }

    pub fn sender(&self) -> &Arc<ConnectionSender> {
        &self.sender
    }

    pub fn maintain(&self) {
        self.sender.maybe_send_keep_alive();
        self.session.maintain();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn close(&self) {
        self.sender.close();
        if !self.session_closed.swap(true, Ordering::SeqCst) {
            self.session.on_close();
        }
    }

    /// Decodes and dispatches one frame payload.
    pub fn process(&self, payload: &[u8]) -> Result<(), SessionError> {
        let message = RawMessage::deserialize(payload)
            .map_err(|err| SessionError::new(format!("packet parsing error: {}", err)))?;

        match message {
            RawMessage::Request { id, request } => {
                self.sender.check_incoming_id(id)?;
                trace!(
                    target: "p2p",
                    "{}: received packet ({}), id: {}",
                    self.remote_id,
                    request.packet_type(),
                    id
                );
                self.session.on_request(id, request)
            }
            RawMessage::Response {
                id,
                in_reply_to,
                body,
            } => {
                self.sender.check_incoming_id(id)?;
                let request = self.sender.take_waiting(in_reply_to)?;
                trace!(
                    target: "p2p",
                    "{}: received reply packet ({}), id: {}",
                    self.remote_id,
                    request.packet_type(),
                    in_reply_to
                );
                let response = request
                    .deserialize_response(&body)
                    .map_err(|err| SessionError::new(format!("invalid response: {}", err)))?;
                self.session.on_response(&request, response)
            }
        }
    }
}
