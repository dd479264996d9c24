//! Server connection loop

use super::{Call, Connection, Peer, ServerSession, dispatch};
use protocol::{FunctionId, ProtocolVersion, RetVal};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What happened on a connection that closed cleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub client_version: ProtocolVersion,
    /// Calls dispatched
    pub calls: u64,
    /// Unknown function ids answered with `Failure`
    pub unknown_functions: u64,
}

/// Resolve once the shutdown flag is set
///
/// Never resolves if the sender is gone without having signalled.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Serve one accepted connection until the peer closes
///
/// Runs the handshake, then reads function ids and dispatches them. An
/// unknown id is answered with a single `Failure` and the loop continues.
/// The loop ends on EOF between calls, on shutdown, on a transport error or
/// on a malformed record; in every case the session's live handle is released
/// and the stream is shut down. Only the last two are reported as errors.
pub async fn serve_connection<S>(
    mut conn: Connection<S>,
    mut session: ServerSession,
    mut shutdown: watch::Receiver<bool>,
) -> crate::Result<ConnectionSummary>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let client_version = match conn.server_handshake().await {
        Ok(version) => version,
        Err(e) => {
            let _ = conn.shutdown().await;
            return Err(e.into());
        }
    };
    info!(
        "Client connected (protocol {}.{}.{})",
        client_version.major, client_version.minor, client_version.patch
    );

    let mut summary = ConnectionSummary {
        client_version,
        calls: 0,
        unknown_functions: 0,
    };

    let outcome = loop {
        let next = tokio::select! {
            next = conn.next_function() => next,
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("Shutdown requested, closing connection");
                break Ok(());
            }
        };

        let raw = match next {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("Peer closed the connection");
                break Ok(());
            }
            Err(e) => break Err(e),
        };

        let function = match FunctionId::try_from(raw) {
            Ok(function) => function,
            Err(e) => {
                warn!("{}", e);
                summary.unknown_functions += 1;
                if let Err(e) = conn.send(&RetVal::Failure).await {
                    break Err(e);
                }
                continue;
            }
        };

        let mut call = Call::empty(function);
        match dispatch(Peer::Server(&mut conn, &mut session), &mut call).await {
            Ok(retval) => {
                debug!("{} -> {:?}", function, retval);
                summary.calls += 1;
            }
            Err(e) => break Err(e),
        }
    };

    session.finish().await;
    let _ = conn.shutdown().await;

    match outcome {
        Ok(()) => {
            info!("Connection closed after {} calls", summary.calls);
            Ok(summary)
        }
        Err(e) => {
            warn!("Connection closed: {}", e);
            Err(e.into())
        }
    }
}
