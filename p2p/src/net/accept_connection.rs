use futures::future::Either;
use futures::Future;
use io::accept_handshake;
use net::Connection;
use p2p::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_core::net::TcpStream;
use tokio_core::reactor::{Handle, Timeout};

/// Runs the incoming handshake under the connection timeout and hands the
/// result to the context.
pub fn accept_connection(
    context: Arc<Context>,
    handle: &Handle,
    stream: TcpStream,
    address: SocketAddr,
) {
    if !context.can_accept_pending() {
        trace!(target: "p2p", "rejecting connection from {}: too many pending", address);
        return;
    }
    context.pending_started();

    let deadline = Duration::from_secs(context.config().params.connection_timeout);
    let timeout = match Timeout::new(deadline, handle) {
        Ok(timeout) => timeout,
        Err(err) => {
            warn!(target: "p2p", "cannot create accept timeout: {}", err);
            context.pending_finished();
            return;
        }
    };

    let local_id = context.config().local_id;
    let spawn_handle = handle.clone();
    let future = accept_handshake(stream, local_id)
        .select2(timeout)
        .then(move |result| {
            context.pending_finished();
            match result {
                Ok(Either::A(((stream, result), _))) => {
                    Context::on_connection(
                        context.clone(),
                        &spawn_handle,
                        Connection {
                            stream: stream,
                            remote_id: result.remote_id,
                            address: address,
                            outgoing: false,
                        },
                    );
                }
                Ok(Either::B(_)) => {
                    debug!(target: "p2p", "handshake with {} timed out", address);
                }
                Err(Either::A((err, _))) | Err(Either::B((err, _))) => {
                    debug!(target: "p2p", "handshake with {} failed: {}", address, err);
                }
            }
            Ok(())
        });
    handle.spawn(future);
}
