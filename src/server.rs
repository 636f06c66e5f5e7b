use crate::{
    auth::UserPass,
    config::ServerConfig,
    session::{self, SessionContext},
};
use anyhow::{Context, Result, bail};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{Instrument, debug, error, info, info_span};

/// Socks5Server represents a SOCKS5 server and houses related
/// configuration data
pub struct Socks5Server {
    pub config: ServerConfig,
    listener: Option<TcpListener>,
}

/// Socks5Server implementation block
impl Socks5Server {
    /// new is a constructor for the Socks5Server type
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self::from_config(ServerConfig {
            listen_addr: listen_addr.into(),
            ..ServerConfig::default()
        })
    }

    pub fn from_config(config: ServerConfig) -> Self {
        Self {
            config,
            listener: None,
        }
    }

    /// with_auth applies the desired authentication
    pub fn with_auth(mut self, auth: Option<UserPass>) -> Self {
        self.config.auth = auth;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.config.dial_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn listen_addr(&self) -> &str {
        &self.config.listen_addr
    }

    /// bind to the listen address and return the address actually bound
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if self.listener.is_some() {
            bail!("[ERR] server is already bound");
        }

        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("[ERR] failed to bind {}", self.config.listen_addr))?;
        let addr = listener.local_addr()?;

        info!("SOCKS5 proxy listening on {}", addr);

        self.listener = Some(listener);
        Ok(addr)
    }

    /// run accepts clients forever, one session task per connection
    pub async fn run(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let Some(listener) = self.listener.take() else {
            bail!("[ERR] listener unavailable");
        };

        if self.config.auth.is_some() {
            info!("Authentication enabled");
        }
        let ctx = Arc::new(SessionContext::from_config(&self.config));

        loop {
            let (inbound, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Keep serving after a failed accept
                    error!("accept failed: {}", e);
                    continue;
                }
            };

            let ctx = Arc::clone(&ctx);
            let span = info_span!("session", peer = %peer_addr);

            tokio::spawn(
                async move {
                    info!("new client");

                    if let Err(e) = inbound.set_nodelay(true) {
                        debug!("set_nodelay failed: {}", e);
                    }

                    if let Err(e) = session::handle_connection(inbound, ctx.as_ref()).await {
                        error!("connection error: {}", e);
                    }
                }
                .instrument(span),
            );
        }
    }
}
