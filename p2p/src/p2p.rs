use config::Config;
use crypto::MinerId;
use io::read_frame;
use futures::future::{self, Either, Loop};
use futures::sync::{mpsc, oneshot};
use futures::{Future, Stream};
use net::{accept_connection, connect, Channel, Connection, ConnectionSender};
use parking_lot::{Mutex, RwLock};
use protocol::{LocalSyncNodeRef, OutboundConnection, PeerInfo, PeerPriority};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio_core::net::TcpListener;
use tokio_core::reactor::{Core, Handle, Interval, Timeout};
use tokio_io::io::write_all;
use tokio_io::AsyncRead;
use util::BlockedPeers;

/// Shared connection table and peer policy. Methods that spawn futures are
/// associated functions taking the context by `Arc`.
pub struct Context {
    config: Config,
    node: LocalSyncNodeRef,
    channels: RwLock<HashMap<MinerId, Arc<Channel>>>,
    connecting: Mutex<HashSet<MinerId>>,
    blocked: BlockedPeers,
    pending_connections: AtomicUsize,
}

impl Context {
    pub fn new(config: Config, node: LocalSyncNodeRef) -> Context {
        Context {
            config: config,
            node: node,
            channels: RwLock::new(HashMap::new()),
            connecting: Mutex::new(HashSet::new()),
            blocked: BlockedPeers::default(),
            pending_connections: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn blocked_peers(&self) -> &BlockedPeers {
        &self.blocked
    }

    pub fn is_connected(&self, id: &MinerId) -> bool {
        self.channels.read().contains_key(id)
    }

    pub fn connections_count(&self) -> usize {
        self.channels.read().len()
    }

    pub fn can_accept_pending(&self) -> bool {
        self.pending_connections.load(Ordering::SeqCst) < self.config.params.max_pending_connections
    }

    pub fn pending_started(&self) {
        self.pending_connections.fetch_add(1, Ordering::SeqCst);
    }

    pub fn pending_finished(&self) {
        self.pending_connections.fetch_sub(1, Ordering::SeqCst);
    }

    /// Reserves an outgoing slot towards the given miner.
    pub fn can_start_connecting(&self, id: &MinerId) -> bool {
        if self.blocked.is_blocked(id) || self.is_connected(id) {
            return false;
        }
        self.connecting.lock().insert(*id)
    }

    pub fn connecting_finished(&self, id: &MinerId) {
        self.connecting.lock().remove(id);
    }

    fn tier_capacity(&self, priority: PeerPriority, outgoing: bool) -> usize {
        let limits = &self.config.params.peer_limits;
        match priority {
            PeerPriority::High => limits.high_priority,
            PeerPriority::Medium if outgoing => limits.medium_priority_outgoing,
            PeerPriority::Medium => limits.medium_priority_incoming,
            PeerPriority::Low if outgoing => limits.low_priority_outgoing,
            PeerPriority::Low => limits.low_priority_incoming,
        }
    }

    fn can_register(&self, id: &MinerId, outgoing: bool) -> bool {
        if !id.is_valid() || self.blocked.is_blocked(id) || self.is_connected(id) {
            return false;
        }

        let priority = self.node.peer_priority(id);
        let used = self
            .channels
            .read()
            .values()
            .filter(|channel| {
                self.node.peer_priority(channel.remote_id()) == priority
                    && (priority == PeerPriority::High
                        || channel.is_outgoing() == outgoing)
            })
            .count();
        used < self.tier_capacity(priority, outgoing)
    }

    fn unregister(&self, id: &MinerId) {
        if let Some(channel) = self.channels.write().remove(id) {
            info!(target: "p2p", "disconnected from {}", id);
            channel.close();
        }
    }

    /// Periodic tick: prune dead channels, run keep-alives and session
    /// maintenance, redial configured peers.
    pub fn maintain(context: &Arc<Context>, handle: &Handle) {
        let channels: Vec<Arc<Channel>> =
            context.channels.read().values().cloned().collect();
        for channel in channels {
            if channel.is_closed() {
                let id = *channel.remote_id();
                context.unregister(&id);
            } else {
                channel.maintain();
            }
        }

        for &(id, address) in &context.config.peers {
            if id == context.config.local_id || context.is_connected(&id) {
                continue;
            }
            connect(context.clone(), handle, id, address);
        }
    }

    pub fn close_all(&self) {
        let ids: Vec<MinerId> = self.channels.read().keys().cloned().collect();
        for id in ids {
            self.unregister(&id);
        }
    }

    /// Wires a handshaken connection: builds the channel, asks the sync
    /// layer for a session and spawns the read and write pumps.
    pub fn on_connection(context: Arc<Context>, handle: &Handle, connection: Connection) {
        let Connection {
            stream,
            remote_id,
            address,
            outgoing,
        } = connection;

        if !context.can_register(&remote_id, outgoing) {
            debug!(target: "p2p", "dropping connection to {}: not accepted", remote_id);
            return;
        }

        let timeout = Duration::from_secs(context.config.params.connection_timeout);
        let (tx, rx) = mpsc::unbounded();
        let sender = Arc::new(ConnectionSender::new(remote_id, tx, timeout));
        let session = context.node.create_session(
            PeerInfo {
                id: remote_id,
                address: address,
                outgoing: outgoing,
            },
            sender.clone(),
        );
        let channel = Arc::new(Channel::new(remote_id, outgoing, sender, session));
        context
            .channels
            .write()
            .insert(remote_id, channel.clone());
        info!(
            target: "p2p",
            "connected to {} at {} ({})",
            remote_id,
            address,
            if outgoing { "outgoing" } else { "incoming" }
        );

        let (read_half, write_half) = stream.split();

        // write pump: ends when the channel is dropped
        let write_channel = channel.clone();
        let writer = rx
            .fold(write_half, |write_half, framed: Vec<u8>| {
                write_all(write_half, framed)
                    .map(|(write_half, _)| write_half)
                    .map_err(|_| ())
            })
            .then(move |_| {
                write_channel.sender().close();
                Ok(())
            });
        handle.spawn(writer);

        // read pump
        let max_size = context.config.params.max_packet_size;
        let keep_alive_floor = timeout / 4;
        let read_channel = channel.clone();
        let read_context = context.clone();
        let read_handle = handle.clone();
        let reader = future::loop_fn(
            (read_half, Instant::now()),
            move |(read_half, last_keep_alive)| {
                if read_channel.is_closed() {
                    return Either::B(future::ok(Loop::Break(())));
                }

                let read_timeout = match Timeout::new(timeout, &read_handle) {
                    Ok(read_timeout) => read_timeout,
                    Err(err) => return Either::B(future::err(err)),
                };

                let channel = read_channel.clone();
                let context = read_context.clone();
                Either::A(
                    read_frame(read_half, max_size)
                        .select2(read_timeout)
                        .map_err(|err| match err {
                            Either::A((err, _)) => err,
                            Either::B((err, _)) => err,
                        })
                        .and_then(move |result| match result {
                            Either::A(((read_half, payload), _)) => {
                                if payload.is_empty() {
                                    if last_keep_alive.elapsed() <= keep_alive_floor {
                                        return Err(io::Error::new(
                                            io::ErrorKind::InvalidData,
                                            "invalid keep alive packet",
                                        ));
                                    }
                                    return Ok(Loop::Continue((read_half, Instant::now())));
                                }

                                match channel.process(&payload) {
                                    Ok(()) => {
                                        Ok(Loop::Continue((read_half, last_keep_alive)))
                                    }
                                    Err(err) => {
                                        // protocol violation: block the peer
                                        warn!(
                                            target: "p2p",
                                            "{}: session error: {}",
                                            channel.remote_id(),
                                            err
                                        );
                                        context.blocked.block(*channel.remote_id());
                                        Err(io::Error::new(
                                            io::ErrorKind::InvalidData,
                                            err.0,
                                        ))
                                    }
                                }
                            }
                            Either::B(_) => {
                                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
                            }
                        }),
                )
            },
        );

        let cleanup_context = context.clone();
        let reader = reader.then(move |result| {
            if let Err(err) = result {
                debug!(target: "p2p", "{}: connection closed: {}", remote_id, err);
            }
            cleanup_context.unregister(&remote_id);
            Ok(())
        });
        handle.spawn(reader);
    }
}

/// The p2p runtime: one event-loop thread accepting, dialing and pumping
/// connections.
pub struct P2P {
    context: Arc<Context>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl P2P {
    pub fn new(config: Config, node: LocalSyncNodeRef) -> io::Result<P2P> {
        let context = Arc::new(Context::new(config, node));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = ::std::sync::mpsc::channel();

        let thread_context = context.clone();
        let thread = thread::Builder::new()
            .name("p2p".to_owned())
            .spawn(move || {
                let mut core = match Core::new() {
                    Ok(core) => core,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let handle = core.handle();

                let listener = match TcpListener::bind(
                    &thread_context.config.listen_address,
                    &handle,
                ) {
                    Ok(listener) => listener,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                info!(
                    target: "p2p",
                    "listening on {}",
                    thread_context.config.listen_address
                );
                let _ = ready_tx.send(Ok(()));

                let accept_context = thread_context.clone();
                let accept_handle = handle.clone();
                let server = listener
                    .incoming()
                    .for_each(move |(stream, address)| {
                        accept_connection(
                            accept_context.clone(),
                            &accept_handle,
                            stream,
                            address,
                        );
                        Ok(())
                    })
                    .map_err(|err| {
                        warn!(target: "p2p", "accept loop failed: {}", err);
                    });
                handle.spawn(server);

                match Interval::new(Duration::from_secs(1), &handle) {
                    Ok(interval) => {
                        let maintain_context = thread_context.clone();
                        let maintain_handle = handle.clone();
                        let maintenance = interval
                            .for_each(move |_| {
                                Context::maintain(&maintain_context, &maintain_handle);
                                Ok(())
                            })
                            .map_err(|err| {
                                warn!(target: "p2p", "maintenance loop failed: {}", err);
                            });
                        handle.spawn(maintenance);
                    }
                    Err(err) => {
                        warn!(target: "p2p", "cannot create maintenance interval: {}", err);
                    }
                }

                let _ = core.run(shutdown_rx);
                thread_context.close_all();
            })?;

        ready_rx
            .recv()
            .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "p2p thread died")))?;

        Ok(P2P {
            context: context,
            shutdown: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn shutdown(&self) {
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

impl Drop for P2P {
    fn drop(&mut self) {
        self.shutdown();
    }
}
