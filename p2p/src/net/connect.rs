use crypto::MinerId;
use futures::future::Either;
use futures::Future;
use io::handshake;
use net::Connection;
use p2p::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_core::net::TcpStream;
use tokio_core::reactor::{Handle, Timeout};

/// Dials a known peer, runs the outgoing handshake under the connection
/// timeout and hands the result to the context.
pub fn connect(context: Arc<Context>, handle: &Handle, id: MinerId, address: SocketAddr) {
    if !context.can_start_connecting(&id) {
        return;
    }

    let deadline = Duration::from_secs(context.config().params.connection_timeout);
    let timeout = match Timeout::new(deadline, handle) {
        Ok(timeout) => timeout,
        Err(err) => {
            warn!(target: "p2p", "cannot create connect timeout: {}", err);
            context.connecting_finished(&id);
            return;
        }
    };

    trace!(target: "p2p", "connecting to {} at {}", id, address);
    let local_id = context.config().local_id;
    let connection = TcpStream::connect(&address, handle)
        .and_then(move |stream| handshake(stream, local_id, id));

    let spawn_handle = handle.clone();
    let future = connection.select2(timeout).then(move |result| {
        context.connecting_finished(&id);
        match result {
            Ok(Either::A(((stream, result), _))) => {
                Context::on_connection(
                    context.clone(),
                    &spawn_handle,
                    Connection {
                        stream: stream,
                        remote_id: result.remote_id,
                        address: address,
                        outgoing: true,
                    },
                );
            }
            Ok(Either::B(_)) => {
                debug!(target: "p2p", "connection to {} timed out", address);
            }
            Err(Either::A((err, _))) | Err(Either::B((err, _))) => {
                debug!(target: "p2p", "connection to {} failed: {}", address, err);
            }
        }
        Ok(())
    });
    handle.spawn(future);
}
