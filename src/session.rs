//! Per-connection SOCKS5 state machine
//!
//! A session walks strictly forward through
//! `Start -> MethodNegotiated -> Authenticated -> RequestParsed -> Connected
//! -> Relaying -> Closed`, with `Failed` reachable from any state before
//! `Closed`. Handshake and request phases are sequential; the relay phase is
//! the only place a session runs concurrent work.

use crate::auth::{self, AcceptAll, AuthResult, CredentialValidator};
use crate::codec::{ConnectReply, ConnectRequest};
use crate::commands::{self, Dialer, TcpDialer};
use crate::config::{RELAY_BUFFER_SIZE, ServerConfig};
use crate::error::Socks5Error;
use crate::pool::BufferPool;
use crate::protocol::{AuthMethod, ReplyCode, Version};
use crate::relay;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Start,
    MethodNegotiated,
    Authenticated,
    RequestParsed,
    Connected,
    Relaying,
    Failed,
    Closed,
}

/// SessionContext is everything a session needs besides its own stream.
/// One context is shared by all sessions of a server
pub struct SessionContext<D = TcpDialer> {
    pub validator: Arc<dyn CredentialValidator>,
    pub dialer: D,
    pub pool: BufferPool,
    pub dial_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl SessionContext<TcpDialer> {
    pub fn from_config(config: &ServerConfig) -> Self {
        let validator: Arc<dyn CredentialValidator> = match &config.auth {
            Some(creds) => Arc::new(creds.clone()),
            None => Arc::new(AcceptAll),
        };

        Self {
            validator,
            dialer: TcpDialer,
            pool: BufferPool::new(RELAY_BUFFER_SIZE, config.pool_capacity),
            dial_timeout: config.dial_timeout,
            handshake_timeout: config.handshake_timeout,
        }
    }
}

impl Default for SessionContext<TcpDialer> {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl<D> SessionContext<D> {
    /// with_dialer swaps the outbound dialer, keeping everything else
    pub fn with_dialer<D2: Dialer>(self, dialer: D2) -> SessionContext<D2> {
        SessionContext {
            validator: self.validator,
            dialer,
            pool: self.pool,
            dial_timeout: self.dial_timeout,
            handshake_timeout: self.handshake_timeout,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn CredentialValidator>) -> Self {
        self.validator = validator;
        self
    }
}

/// handle_connection runs the full SOCKS5 flow on an accepted stream and
/// returns once the session is closed
pub async fn handle_connection<S, D>(stream: S, ctx: &SessionContext<D>) -> Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    D: Dialer,
{
    Session::new(stream).run(ctx).await
}

/// Session owns the client stream for the lifetime of one connection
pub struct Session<S> {
    /// None once the stream has been closed or handed to the relay
    stream: Option<BufReader<S>>,
    state: SessionState,
    auth: Option<AuthResult>,
    replied: bool,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(BufReader::new(stream)),
            state: SessionState::Start,
            auth: None,
            replied: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// auth is the outcome of authentication once the session got that far
    pub fn auth(&self) -> Option<&AuthResult> {
        self.auth.as_ref()
    }

    pub async fn run<D: Dialer>(mut self, ctx: &SessionContext<D>) -> Result<(), Socks5Error> {
        let handshake = tokio::time::timeout(ctx.handshake_timeout, self.handshake(ctx)).await;
        let request = match handshake {
            Ok(Ok(request)) => request,
            Ok(Err(e)) => return Err(self.fail(e).await),
            Err(_) => {
                return Err(self
                    .fail(Socks5Error::HandshakeTimeout(ctx.handshake_timeout))
                    .await);
            }
        };

        let connected = match commands::execute(&request, &ctx.dialer, ctx.dial_timeout).await {
            Ok(connected) => connected,
            Err(e) => return Err(self.fail(e).await),
        };
        self.transition(SessionState::Connected);

        let reply = ConnectReply::new(ReplyCode::Succeeded, connected.bound);
        if let Err(e) = self.send_connect_reply(&reply).await {
            return Err(self.fail(e.into()).await);
        }
        info!(
            "tunnel established to {} ({}) via {}",
            request.target, connected.remote, connected.bound
        );

        let Some(client) = self.stream.take() else {
            return Err(self.fail(not_connected()).await);
        };
        self.transition(SessionState::Relaying);

        match relay::relay(client, connected.upstream, &ctx.pool).await {
            Ok(stats) => {
                info!(
                    "connection closed: {} bytes from client, {} bytes from server ({} finished first)",
                    stats.from_client, stats.from_upstream, stats.finished_first
                );
                self.transition(SessionState::Closed);
                Ok(())
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// handshake covers every state before the outbound dial
    async fn handshake<D: Dialer>(
        &mut self,
        ctx: &SessionContext<D>,
    ) -> Result<ConnectRequest, Socks5Error> {
        self.peek_version().await?;

        let method = auth::negotiate_method(self.stream()?).await?;
        self.transition(SessionState::MethodNegotiated);

        let result = auth::authenticate(self.stream()?, method, ctx.validator.as_ref()).await?;
        if method == AuthMethod::UserPass {
            debug!("account {:?} authenticated", result.identity);
        }
        self.auth = Some(result);
        self.transition(SessionState::Authenticated);

        let request = ConnectRequest::read_from(self.stream()?).await?;
        self.transition(SessionState::RequestParsed);
        debug!("request {:?} to {}", request.command, request.target);

        Ok(request)
    }

    /// peek_version looks at the first byte without consuming it
    async fn peek_version(&mut self) -> Result<(), Socks5Error> {
        let buf = self.stream()?.fill_buf().await?;
        let Some(&version) = buf.first() else {
            return Err(Socks5Error::MalformedMessage(
                "connection closed before greeting".to_string(),
            ));
        };

        if version == Version::SOCKS4 as u8 {
            debug!("rejecting SOCKS4 client");
        }
        if version != Version::SOCKS5 as u8 {
            return Err(Socks5Error::UnsupportedVersion(version));
        }
        Ok(())
    }

    /// send_connect_reply sends the one connect reply a session may send
    async fn send_connect_reply(&mut self, reply: &ConnectReply) -> io::Result<()> {
        if self.replied {
            return Ok(());
        }
        self.replied = true;

        let stream = self.stream.as_mut().ok_or_else(not_connected_io)?;
        commands::send_reply(stream, reply).await
    }

    /// fail moves the session to Failed, sends the connect reply the error
    /// warrants when the request phase has been reached, then closes
    async fn fail(&mut self, err: Socks5Error) -> Socks5Error {
        if self.state >= SessionState::Authenticated && self.state < SessionState::Relaying {
            if let Some(code) = err.reply_code() {
                if let Err(e) = self.send_connect_reply(&ConnectReply::failure(code)).await {
                    debug!("failure reply not delivered: {e}");
                }
            }
        }

        self.transition(SessionState::Failed);
        self.close().await;
        err
    }

    /// close shuts the client stream down. Calling it again does nothing
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("shutdown of client stream failed: {e}");
            }
        }
        if self.state != SessionState::Closed {
            self.transition(SessionState::Closed);
        }
    }

    fn transition(&mut self, next: SessionState) {
        if next <= self.state {
            warn!("ignoring backwards transition {:?} -> {:?}", self.state, next);
            return;
        }
        debug!("session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn stream(&mut self) -> Result<&mut BufReader<S>, Socks5Error> {
        self.stream.as_mut().ok_or_else(not_connected)
    }
}

fn not_connected_io() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "client stream already closed")
}

fn not_connected() -> Socks5Error {
    Socks5Error::Io(not_connected_io())
}
