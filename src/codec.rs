//! Wire codec for the SOCKS5 messages this server speaks
//!
//! Each message has a pure `decode`/`encode` pair over byte slices. The
//! `read_from` helpers pull exactly the bytes a message declares from a
//! stream: first the fixed header that carries a length field, then exactly
//! that many more bytes. The assembled buffer goes through `decode`.

use crate::address::{
    Address, TargetAddress, parse_domain_address, parse_ipv4_address, parse_ipv6_address,
    parse_port,
};
use crate::error::Socks5Error;
use crate::protocol::{AUTH_VERSION, AddressType, AuthStatus, Command, RSV, ReplyCode, Version};
use bytes::{BufMut, Bytes, BytesMut};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Greeting is the client's opening message
// +----+----------+----------+
// |VER | NMETHODS | METHODS  |
// +----+----------+----------+
// | 1  |    1     | 1 to 255 |
// +----+----------+----------+
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub version: u8,
    /// Offered methods, duplicates dropped, in the order offered
    pub methods: Vec<u8>,
}

impl Greeting {
    pub fn decode(buf: &[u8]) -> Result<Self, Socks5Error> {
        if buf.len() < 2 {
            return Err(malformed("greeting shorter than its header"));
        }

        let n_methods = buf[1] as usize;
        if buf.len() < 2 + n_methods {
            return Err(malformed(&format!(
                "greeting declares {n_methods} methods but carries {}",
                buf.len() - 2
            )));
        }

        let mut methods = Vec::with_capacity(n_methods);
        for &method in &buf[2..2 + n_methods] {
            if !methods.contains(&method) {
                methods.push(method);
            }
        }

        Ok(Self {
            version: buf[0],
            methods,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.methods.len());
        buf.put_u8(self.version);
        buf.put_u8(self.methods.len() as u8);
        buf.put_slice(&self.methods);
        buf.freeze()
    }

    pub async fn read_from<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Self, Socks5Error> {
        let mut buf = vec![0u8; 2];
        read_exact(stream, &mut buf, "greeting").await?;

        let n_methods = buf[1] as usize;
        buf.resize(2 + n_methods, 0);
        read_exact(stream, &mut buf[2..], "greeting methods").await?;

        Self::decode(&buf)
    }
}

/// MethodSelection is the server's choice of authentication method
// +----+--------+
// |VER | METHOD |
// +----+--------+
// | 1  |   1    |
// +----+--------+
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSelection {
    pub method: u8,
}

impl MethodSelection {
    pub fn encode(&self) -> [u8; 2] {
        [Version::SOCKS5 as u8, self.method]
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Socks5Error> {
        match buf {
            [v, method] if *v == Version::SOCKS5 as u8 => Ok(Self { method: *method }),
            [v, _] => Err(malformed(&format!("method selection version {v:#04x}"))),
            _ => Err(malformed("method selection must be 2 bytes")),
        }
    }
}

/// UserPassRequest is the username/password sub-negotiation request
// +----+------+----------+------+----------+
// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
// +----+------+----------+------+----------+
// | 1  |  1   | 0 to 255 |  1   | 0 to 255 |
// +----+------+----------+------+----------+
#[derive(Clone, PartialEq, Eq)]
pub struct UserPassRequest {
    pub version: u8,
    pub username: Vec<u8>,
    pub password: Vec<u8>,
}

// Keeps passwords out of logs
impl std::fmt::Debug for UserPassRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserPassRequest")
            .field("version", &self.version)
            .field("username", &String::from_utf8_lossy(&self.username))
            .field("password", &"<redacted>")
            .finish()
    }
}

impl UserPassRequest {
    pub fn decode(buf: &[u8]) -> Result<Self, Socks5Error> {
        if buf.len() < 2 {
            return Err(malformed("auth request shorter than its header"));
        }

        let ulen = buf[1] as usize;
        let plen_at = 2 + ulen;
        if buf.len() < plen_at + 1 {
            return Err(malformed("auth request truncated in username"));
        }

        let plen = buf[plen_at] as usize;
        if buf.len() < plen_at + 1 + plen {
            return Err(malformed("auth request truncated in password"));
        }

        Ok(Self {
            version: buf[0],
            username: buf[2..plen_at].to_vec(),
            password: buf[plen_at + 1..plen_at + 1 + plen].to_vec(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(3 + self.username.len() + self.password.len());
        buf.put_u8(self.version);
        buf.put_u8(self.username.len() as u8);
        buf.put_slice(&self.username);
        buf.put_u8(self.password.len() as u8);
        buf.put_slice(&self.password);
        buf.freeze()
    }

    /// read_from stops right after the version byte when it is not the
    /// sub-negotiation version, so nothing further is read from the client
    pub async fn read_from<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Self, Socks5Error> {
        let mut buf = vec![0u8; 1];
        read_exact(stream, &mut buf, "auth request").await?;
        if buf[0] != AUTH_VERSION {
            return Err(Socks5Error::AuthVersionMismatch(buf[0]));
        }

        buf.resize(2, 0);
        read_exact(stream, &mut buf[1..], "auth request").await?;

        // Username plus the password length byte
        let start = buf.len();
        buf.resize(start + buf[1] as usize + 1, 0);
        read_exact(stream, &mut buf[start..], "auth username").await?;

        let start = buf.len();
        let plen = buf[start - 1] as usize;
        buf.resize(start + plen, 0);
        read_exact(stream, &mut buf[start..], "auth password").await?;

        Self::decode(&buf)
    }
}

/// AuthReply is the sub-negotiation status
// +----+--------+
// |VER | STATUS |
// +----+--------+
// | 1  |   1    |
// +----+--------+
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthReply {
    pub status: AuthStatus,
}

impl AuthReply {
    pub fn encode(&self) -> [u8; 2] {
        [AUTH_VERSION, self.status as u8]
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Socks5Error> {
        match buf {
            [AUTH_VERSION, 0x00] => Ok(Self {
                status: AuthStatus::Success,
            }),
            [AUTH_VERSION, _] => Ok(Self {
                status: AuthStatus::Failure,
            }),
            _ => Err(malformed("invalid auth reply")),
        }
    }
}

/// ConnectRequest is the client's command request
// +----+-----+-------+------+----------+----------+
// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
// +----+-----+-------+------+----------+----------+
// | 1  |  1  | X'00' |  1   | Variable |    2     |
// +----+-----+-------+------+----------+----------+
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub command: Command,
    pub target: TargetAddress,
}

impl ConnectRequest {
    pub fn decode(buf: &[u8]) -> Result<Self, Socks5Error> {
        let (command, addr_type) = Self::check_header(buf)?;

        let mut offset = 4;
        let address = match addr_type {
            AddressType::IPv4 => parse_ipv4_address(buf, &mut offset)?,
            AddressType::DomainName => parse_domain_address(buf, &mut offset)?,
            AddressType::IPv6 => parse_ipv6_address(buf, &mut offset)?,
        };
        let port = parse_port(buf, &mut offset)?;

        Ok(Self {
            command,
            target: TargetAddress::new(address, port),
        })
    }

    pub fn encode(&self) -> Bytes {
        let address = &self.target.address;
        let mut buf = BytesMut::with_capacity(6 + address.encoded_len());
        buf.put_u8(Version::SOCKS5 as u8);
        buf.put_u8(self.command as u8);
        buf.put_u8(RSV);
        buf.put_u8(address.address_type() as u8);
        address.put(&mut buf);
        buf.put_u16(self.target.port);
        buf.freeze()
    }

    pub async fn read_from<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Self, Socks5Error> {
        let mut buf = vec![0u8; 4];
        read_exact(stream, &mut buf, "request header").await?;

        // Reject bad commands and address types before reading any further
        let (_, addr_type) = Self::check_header(&buf)?;

        let remaining = match addr_type {
            AddressType::IPv4 => 4 + 2,
            AddressType::IPv6 => 16 + 2,
            AddressType::DomainName => {
                let mut len = [0u8; 1];
                read_exact(stream, &mut len, "domain length").await?;
                buf.push(len[0]);
                len[0] as usize + 2
            }
        };

        let start = buf.len();
        buf.resize(start + remaining, 0);
        read_exact(stream, &mut buf[start..], "request address").await?;

        Self::decode(&buf)
    }

    fn check_header(buf: &[u8]) -> Result<(Command, AddressType), Socks5Error> {
        if buf.len() < 4 {
            return Err(malformed("request shorter than its header"));
        }
        if buf[0] != Version::SOCKS5 as u8 {
            return Err(malformed(&format!("request version {:#04x}", buf[0])));
        }

        let command =
            Command::from_byte(buf[1]).ok_or(Socks5Error::UnsupportedCommand(buf[1]))?;
        let addr_type =
            AddressType::from_byte(buf[3]).ok_or(Socks5Error::UnsupportedAddressType(buf[3]))?;

        Ok((command, addr_type))
    }
}

/// ConnectReply answers a ConnectRequest. The address type is always IPv4
// +----+-----+-------+------+----------+----------+
// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
// +----+-----+-------+------+----------+----------+
// | 1  |  1  | X'00' |  1   |    4     |    2     |
// +----+-----+-------+------+----------+----------+
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectReply {
    pub status: ReplyCode,
    pub bound: SocketAddrV4,
}

impl ConnectReply {
    pub const LEN: usize = 10;

    /// new builds a reply for the given bound address. IPv6 addresses that
    /// are not IPv4-mapped are reported as 0.0.0.0 with their port
    pub fn new(status: ReplyCode, bound: SocketAddr) -> Self {
        let bound = match bound {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(addr) => SocketAddrV4::new(
                addr.ip().to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED),
                addr.port(),
            ),
        };
        Self { status, bound }
    }

    /// failure builds a reply with an unspecified bound address
    pub fn failure(status: ReplyCode) -> Self {
        Self {
            status,
            bound: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
        }
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut reply = [0u8; Self::LEN];
        reply[0] = Version::SOCKS5 as u8;
        reply[1] = self.status as u8;
        reply[2] = RSV;
        reply[3] = AddressType::IPv4 as u8;
        reply[4..8].copy_from_slice(&self.bound.ip().octets());
        reply[8..10].copy_from_slice(&self.bound.port().to_be_bytes());
        reply
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Socks5Error> {
        if buf.len() < Self::LEN {
            return Err(malformed("reply shorter than 10 bytes"));
        }
        if buf[0] != Version::SOCKS5 as u8 {
            return Err(malformed(&format!("reply version {:#04x}", buf[0])));
        }
        if buf[3] != AddressType::IPv4 as u8 {
            return Err(Socks5Error::UnsupportedAddressType(buf[3]));
        }

        let status = ReplyCode::from_byte(buf[1])
            .ok_or_else(|| malformed(&format!("unknown reply status {:#04x}", buf[1])))?;
        let mut offset = 4;
        let ip = match parse_ipv4_address(buf, &mut offset)? {
            Address::IPv4(ip) => ip,
            other => return Err(malformed(&format!("unexpected bound address {other:?}"))),
        };
        let port = parse_port(buf, &mut offset)?;

        Ok(Self {
            status,
            bound: SocketAddrV4::new(ip, port),
        })
    }
}

/// read_exact fills buf from the stream, treating early end-of-stream as a
/// truncated message
async fn read_exact<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut [u8],
    what: &str,
) -> Result<(), Socks5Error> {
    stream
        .read_exact(buf)
        .await
        .map(|_| ())
        .map_err(|e| Socks5Error::from_read_error(e, what))
}

fn malformed(msg: &str) -> Socks5Error {
    Socks5Error::MalformedMessage(msg.to_string())
}
