//! RPC engine
//!
//! A client builds a [`Call`] and dispatches it with [`Peer::Client`]; the
//! server loop reads a function id, builds [`Call::empty`] for it and
//! dispatches with [`Peer::Server`]. Every operation lives in [`ops`] as one
//! unit carrying both halves of its exchange.

pub mod call;
pub mod connection;
pub mod ops;
pub mod remote;
pub mod serve;
pub mod session;

pub use call::Call;
pub use connection::{Connection, Timeouts};
pub use remote::RemoteUsb;
pub use serve::{ConnectionSummary, serve_connection, wait_for_shutdown};
pub use session::{LiveHandle, ServerSession};

use ops::Operation;
use protocol::{RetVal, Role};
use tokio::io::{AsyncRead, AsyncWrite};

/// The side a dispatch runs on, with the state that side needs
pub enum Peer<'a, S> {
    Client(&'a mut Connection<S>),
    Server(&'a mut Connection<S>, &'a mut ServerSession),
}

impl<S> Peer<'_, S> {
    pub fn role(&self) -> Role {
        match self {
            Peer::Client(_) => Role::Client,
            Peer::Server(..) => Role::Server,
        }
    }
}

macro_rules! each_op {
    ($call:expr, $op:ident => $body:expr) => {
        match $call {
            Call::Init($op) => $body,
            Call::ListDevices($op) => $body,
            Call::GetDescriptor($op) => $body,
            Call::OpenWithVidPid($op) => $body,
            Call::Close($op) => $body,
            Call::Open($op) => $body,
            Call::ClaimInterface($op) => $body,
            Call::ReleaseInterface($op) => $body,
            Call::Exit($op) => $body,
            Call::Inert($op) => $body,
        }
    };
}

/// Run one call on the given side of the connection
///
/// On the client the function id is written first and the call's outputs are
/// only updated once the whole response decoded. On the server the call's
/// inputs are filled from the wire and a response is always written; device
/// failures come back as `Ok(RetVal::Failure)`. `Err` means the connection is
/// no longer usable.
pub async fn dispatch<S>(peer: Peer<'_, S>, call: &mut Call) -> protocol::Result<RetVal>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match peer {
        Peer::Client(conn) => {
            conn.send_function(call.function()).await?;
            each_op!(call, op => op.client_side(conn).await)
        }
        Peer::Server(conn, session) => {
            each_op!(call, op => op.server_side(conn, session).await)
        }
    }
}
