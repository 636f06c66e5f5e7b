//! A lightweight SOCKS5 proxy library
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT (BIND and UDP ASSOCIATE are answered with "command not supported")
//!     - No Authentication
//!     - Username/Password Authentication
//!     - Async using tokio, one task per session
//!     - Pooled 32 KiB relay buffers
//!     - Dial and handshake timeouts
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//! - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)
//!
//! # Example
//! ```no_run
//! use sockslite::{Socks5Server, auth::UserPass};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = Socks5Server::new("127.0.0.1:1080").with_auth(Some(UserPass {
//!         username: "bob".to_string(),
//!         password: "xyz".to_string(),
//!     }));
//!     server.run().await
//! }
//! ```

pub mod address;
pub mod auth;
pub mod codec;
pub mod commands;
pub mod config;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;

// Re-export main types at crate root for convenience
pub use auth::{CredentialValidator, UserPass};
pub use config::ServerConfig;
pub use error::Socks5Error;
pub use protocol::{AuthMethod, Command, ReplyCode, Version};
pub use server::Socks5Server;
pub use session::{SessionContext, handle_connection};
