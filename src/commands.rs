use crate::address::TargetAddress;
use crate::codec::{ConnectReply, ConnectRequest};
use crate::error::Socks5Error;
use crate::protocol::Command;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Dialer opens the outbound connection for a CONNECT request
pub trait Dialer: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// dial connects to addr and returns the stream together with its
    /// local bound address
    fn dial(
        &self,
        addr: SocketAddr,
    ) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;
}

/// TcpDialer dials plain TCP through the host network stack
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, addr: SocketAddr) -> io::Result<(TcpStream, SocketAddr)> {
        let stream = TcpStream::connect(addr).await?;
        let local_addr = stream.local_addr()?;
        Ok((stream, local_addr))
    }
}

/// Connected holds the outbound stream of an executed CONNECT
pub struct Connected<S> {
    pub upstream: S,
    /// Resolved address that was dialed
    pub remote: SocketAddr,
    /// Local end of the outbound connection, echoed in the reply
    pub bound: SocketAddr,
}

/// execute runs a decoded request. Only CONNECT has a handler; BIND and
/// UDP ASSOCIATE are recognised but rejected here
pub async fn execute<D: Dialer>(
    request: &ConnectRequest,
    dialer: &D,
    dial_timeout: Duration,
) -> Result<Connected<D::Stream>, Socks5Error> {
    match request.command {
        Command::Connect => handle_connect_cmd(&request.target, dialer, dial_timeout).await,
        Command::Bind | Command::UdpAssociate => {
            Err(Socks5Error::UnsupportedCommand(request.command as u8))
        }
    }
}

// ================
// CONNECT COMMAND
// ================

/// handle_connect_cmd resolves the target and dials it under a timeout
async fn handle_connect_cmd<D: Dialer>(
    target: &TargetAddress,
    dialer: &D,
    dial_timeout: Duration,
) -> Result<Connected<D::Stream>, Socks5Error> {
    let remote = target.resolve().await?;
    debug!("resolved {target} to {remote}");

    match tokio::time::timeout(dial_timeout, dialer.dial(remote)).await {
        Ok(Ok((upstream, bound))) => Ok(Connected {
            upstream,
            remote,
            bound,
        }),
        Ok(Err(e)) => Err(Socks5Error::DialError {
            target: target.to_string(),
            source: e,
        }),
        Err(_) => Err(Socks5Error::DialError {
            target: target.to_string(),
            source: io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no connection within {dial_timeout:?}"),
            ),
        }),
    }
}

/// send_reply writes a connect reply to the client
pub async fn send_reply<S: AsyncWrite + Unpin>(
    stream: &mut S,
    reply: &ConnectReply,
) -> io::Result<()> {
    stream.write_all(&reply.encode()).await?;
    stream.flush().await
}
