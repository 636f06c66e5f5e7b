//! Error taxonomy for a SOCKS5 session
//!
//! Every variant is fatal to the session that raised it and to nothing else.

use crate::protocol::ReplyCode;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Socks5Error covers every way a single session can end abnormally
#[derive(Error, Debug)]
pub enum Socks5Error {
    /// Message shorter than its declared length, or carrying a bad version tag
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// First byte of the connection was not 0x05
    #[error("unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    #[error("unsupported command: {0:#04x}")]
    UnsupportedCommand(u8),

    #[error("unsupported address type: {0:#04x}")]
    UnsupportedAddressType(u8),

    #[error("no acceptable authentication method")]
    NoAcceptableMethod,

    #[error("unexpected auth sub-negotiation version: {0:#04x}")]
    AuthVersionMismatch(u8),

    #[error("credentials rejected for account '{0}'")]
    AuthRejected(String),

    #[error("failed to resolve '{target}': {reason}")]
    ResolutionError { target: String, reason: String },

    #[error("failed to connect to {target}: {source}")]
    DialError {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("handshake not completed within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("relay error: {0}")]
    RelayError(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Socks5Error implementation block
impl Socks5Error {
    /// reply_code returns the connect-reply status this error warrants, or
    /// None when the client gets no connect reply at all
    pub fn reply_code(&self) -> Option<ReplyCode> {
        match self {
            Socks5Error::UnsupportedCommand(_) => Some(ReplyCode::CommandNotSupported),
            Socks5Error::UnsupportedAddressType(_) => Some(ReplyCode::AddrTypeUnsupported),
            Socks5Error::ResolutionError { .. } => Some(ReplyCode::HostUnreachable),
            Socks5Error::DialError { source, .. } => Some(ReplyCode::from(source)),
            _ => None,
        }
    }

    /// from_read_error maps an I/O error hit while reading a protocol message.
    /// Running out of bytes means the message was shorter than declared
    pub fn from_read_error(err: io::Error, what: &str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Socks5Error::MalformedMessage(format!("{what} truncated"))
        } else {
            Socks5Error::Io(err)
        }
    }
}

impl From<&io::Error> for ReplyCode {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
            io::ErrorKind::HostUnreachable => ReplyCode::HostUnreachable,
            io::ErrorKind::TimedOut => ReplyCode::HostUnreachable,
            io::ErrorKind::NetworkUnreachable => ReplyCode::NetworkUnreachable,
            io::ErrorKind::PermissionDenied => ReplyCode::ConnectionNotAllowed,
            _ => ReplyCode::ServerFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_code_from_io_error() {
        let cases = vec![
            (io::ErrorKind::ConnectionRefused, ReplyCode::ConnectionRefused),
            (io::ErrorKind::HostUnreachable, ReplyCode::HostUnreachable),
            (io::ErrorKind::TimedOut, ReplyCode::HostUnreachable),
            (io::ErrorKind::NetworkUnreachable, ReplyCode::NetworkUnreachable),
            (io::ErrorKind::PermissionDenied, ReplyCode::ConnectionNotAllowed),
            (io::ErrorKind::Other, ReplyCode::ServerFailure),
        ];

        for (kind, expected) in cases {
            assert_eq!(ReplyCode::from(&io::Error::from(kind)), expected);
        }
    }

    #[test]
    fn test_reply_code_per_error() {
        assert_eq!(
            Socks5Error::UnsupportedCommand(0x02).reply_code(),
            Some(ReplyCode::CommandNotSupported)
        );
        assert_eq!(
            Socks5Error::UnsupportedAddressType(0x09).reply_code(),
            Some(ReplyCode::AddrTypeUnsupported)
        );
        let err = Socks5Error::ResolutionError {
            target: "nowhere.invalid:80".to_string(),
            reason: "no addresses".to_string(),
        };
        assert_eq!(err.reply_code(), Some(ReplyCode::HostUnreachable));

        assert_eq!(
            Socks5Error::MalformedMessage("x".to_string()).reply_code(),
            None
        );
        assert_eq!(Socks5Error::NoAcceptableMethod.reply_code(), None);
        assert_eq!(Socks5Error::AuthVersionMismatch(0x05).reply_code(), None);
    }

    #[test]
    fn test_from_read_error() {
        let eof = io::Error::from(io::ErrorKind::UnexpectedEof);
        assert!(matches!(
            Socks5Error::from_read_error(eof, "greeting"),
            Socks5Error::MalformedMessage(_)
        ));

        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(matches!(
            Socks5Error::from_read_error(reset, "greeting"),
            Socks5Error::Io(_)
        ));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            Socks5Error::UnsupportedCommand(0x02).to_string(),
            "unsupported command: 0x02"
        );
        assert_eq!(
            Socks5Error::NoAcceptableMethod.to_string(),
            "no acceptable authentication method"
        );
    }
}
