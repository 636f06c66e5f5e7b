use crate::error::Socks5Error;
use crate::protocol::AddressType;
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

/// Address represents a network address or domain to be used as the
/// SOCKS5 target address. Domain names are kept as the raw bytes the
/// client sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    IPv4(Ipv4Addr),
    DomainName(Vec<u8>),
    IPv6(Ipv6Addr),
}

/// Address implementation block
impl Address {
    /// address_type returns the ATYP tag for this address
    pub fn address_type(&self) -> AddressType {
        match self {
            Address::IPv4(_) => AddressType::IPv4,
            Address::DomainName(_) => AddressType::DomainName,
            Address::IPv6(_) => AddressType::IPv6,
        }
    }

    /// encoded_len is the number of bytes this address occupies on the wire,
    /// not counting the ATYP byte
    pub fn encoded_len(&self) -> usize {
        match self {
            Address::IPv4(_) => 4,
            Address::DomainName(name) => 1 + name.len(),
            Address::IPv6(_) => 16,
        }
    }

    /// put writes the address bytes (without ATYP) into buf. Domain names
    /// longer than 255 bytes cannot be expressed and are truncated
    pub fn put(&self, buf: &mut BytesMut) {
        match self {
            Address::IPv4(ip) => buf.put_slice(&ip.octets()),
            Address::DomainName(name) => {
                let len = name.len().min(u8::MAX as usize);
                buf.put_u8(len as u8);
                buf.put_slice(&name[..len]);
            }
            Address::IPv6(ip) => buf.put_slice(&ip.octets()),
        }
    }
}

/// TargetAddress represents a forward proxy address and port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddress {
    pub address: Address,
    pub port: u16,
}

/// TargetAddress implementation block
impl TargetAddress {
    pub fn new(address: Address, port: u16) -> Self {
        Self { address, port }
    }

    /// resolve turns the target into a dialable socket address. IP literals
    /// and domain names both go through the host resolver as "host:port"
    pub async fn resolve(&self) -> Result<SocketAddr, Socks5Error> {
        let host_port = self.to_string();

        if let Address::DomainName(name) = &self.address {
            if name.is_empty() {
                return Err(resolution_error(&host_port, "empty domain name"));
            }
            if std::str::from_utf8(name).is_err() {
                return Err(resolution_error(&host_port, "domain name is not valid UTF-8"));
            }
        }

        tokio::net::lookup_host(&host_port)
            .await
            .map_err(|e| resolution_error(&host_port, &e.to_string()))?
            .next()
            .ok_or_else(|| resolution_error(&host_port, "no addresses found"))
    }
}

/// Formats as host:port, bracketing IPv6 hosts
impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Address::IPv4(ip) => write!(f, "{ip}:{}", self.port),
            Address::DomainName(name) => {
                write!(f, "{}:{}", String::from_utf8_lossy(name), self.port)
            }
            Address::IPv6(ip) => write!(f, "[{ip}]:{}", self.port),
        }
    }
}

fn resolution_error(target: &str, reason: &str) -> Socks5Error {
    Socks5Error::ResolutionError {
        target: target.to_string(),
        reason: reason.to_string(),
    }
}

/// parse_ipv4_address parses an IPv4 address from a byte slice
pub fn parse_ipv4_address(data: &[u8], offset: &mut usize) -> Result<Address, Socks5Error> {
    let ip_bytes: [u8; 4] = take(data, offset, 4, "IPv4 address")?
        .try_into()
        .map_err(|_| malformed("invalid IPv4 bytes"))?;

    Ok(Address::IPv4(Ipv4Addr::from(ip_bytes)))
}

/// parse_ipv6_address parses an IPv6 address from a byte slice
pub fn parse_ipv6_address(data: &[u8], offset: &mut usize) -> Result<Address, Socks5Error> {
    let ip_bytes: [u8; 16] = take(data, offset, 16, "IPv6 address")?
        .try_into()
        .map_err(|_| malformed("invalid IPv6 bytes"))?;

    Ok(Address::IPv6(Ipv6Addr::from(ip_bytes)))
}

/// parse_domain_address parses a length-prefixed domain from a byte slice.
/// The first octet holds the number of octets to follow (0-255)
pub fn parse_domain_address(data: &[u8], offset: &mut usize) -> Result<Address, Socks5Error> {
    let domain_len = take(data, offset, 1, "domain length")?[0] as usize;
    let domain = take(data, offset, domain_len, "domain name")?;

    Ok(Address::DomainName(domain.to_vec()))
}

/// parse_port parses a big-endian port from a byte slice
pub fn parse_port(data: &[u8], offset: &mut usize) -> Result<u16, Socks5Error> {
    let port = take(data, offset, 2, "port")?;
    Ok(u16::from_be_bytes([port[0], port[1]]))
}

/// take returns the next len bytes and advances offset past them
fn take<'a>(
    data: &'a [u8],
    offset: &mut usize,
    len: usize,
    what: &str,
) -> Result<&'a [u8], Socks5Error> {
    let end = *offset + len;
    if end > data.len() {
        return Err(malformed(&format!(
            "not enough data for {what}: need {end} bytes, have {}",
            data.len()
        )));
    }

    let bytes = &data[*offset..end];
    *offset = end;
    Ok(bytes)
}

fn malformed(msg: &str) -> Socks5Error {
    Socks5Error::MalformedMessage(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_ipv4() {
        let target = TargetAddress::new(Address::IPv4(Ipv4Addr::new(127, 0, 0, 1)), 80);
        assert_eq!(target.to_string(), "127.0.0.1:80");
    }

    #[test]
    fn test_display_ipv6_is_bracketed() {
        let target = TargetAddress::new(Address::IPv6(Ipv6Addr::LOCALHOST), 443);
        assert_eq!(target.to_string(), "[::1]:443");

        let ip: Ipv6Addr = "2001:db8::8a2e:370:7334".parse().unwrap();
        let target = TargetAddress::new(Address::IPv6(ip), 0);
        assert_eq!(target.to_string(), "[2001:db8::8a2e:370:7334]:0");
    }

    #[test]
    fn test_display_domain() {
        let target = TargetAddress::new(Address::DomainName(b"example.com".to_vec()), 65535);
        assert_eq!(target.to_string(), "example.com:65535");
    }

    #[test]
    fn test_parse_domain_address() {
        let mut data = vec![3u8];
        data.extend_from_slice(b"abc");
        let mut offset = 0;
        let addr = parse_domain_address(&data, &mut offset).unwrap();
        assert_eq!(addr, Address::DomainName(b"abc".to_vec()));
        assert_eq!(offset, 4);
    }

    #[test]
    fn test_parse_domain_address_truncated() {
        // Declares 10 bytes, carries 3
        let data = [10u8, b'a', b'b', b'c'];
        let mut offset = 0;
        let result = parse_domain_address(&data, &mut offset);
        assert!(matches!(result, Err(Socks5Error::MalformedMessage(_))));
    }

    #[test]
    fn test_parse_ipv4_and_port() {
        let data = [10, 0, 0, 1, 0x1F, 0x90];
        let mut offset = 0;
        let addr = parse_ipv4_address(&data, &mut offset).unwrap();
        let port = parse_port(&data, &mut offset).unwrap();
        assert_eq!(addr, Address::IPv4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(port, 8080);
        assert_eq!(offset, 6);
    }

    #[test]
    fn test_parse_ipv6_truncated() {
        let data = [0u8; 15];
        let mut offset = 0;
        assert!(parse_ipv6_address(&data, &mut offset).is_err());
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_encoded_len() {
        assert_eq!(Address::IPv4(Ipv4Addr::UNSPECIFIED).encoded_len(), 4);
        assert_eq!(Address::IPv6(Ipv6Addr::UNSPECIFIED).encoded_len(), 16);
        assert_eq!(Address::DomainName(vec![b'a'; 255]).encoded_len(), 256);
    }

    #[tokio::test]
    async fn test_resolve_ip_literals() {
        let target = TargetAddress::new(Address::IPv4(Ipv4Addr::new(127, 0, 0, 1)), 8080);
        assert_eq!(
            target.resolve().await.unwrap(),
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );

        let target = TargetAddress::new(Address::IPv6(Ipv6Addr::LOCALHOST), 65535);
        assert_eq!(
            target.resolve().await.unwrap(),
            "[::1]:65535".parse::<SocketAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_resolve_rejects_bad_domains() {
        let empty = TargetAddress::new(Address::DomainName(Vec::new()), 80);
        assert!(matches!(
            empty.resolve().await,
            Err(Socks5Error::ResolutionError { .. })
        ));

        let not_utf8 = TargetAddress::new(Address::DomainName(vec![0xFF, 0xFE]), 80);
        assert!(matches!(
            not_utf8.resolve().await,
            Err(Socks5Error::ResolutionError { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_unknown_domain() {
        let target = TargetAddress::new(
            Address::DomainName(b"this-domain-does-not-exist-12345.invalid".to_vec()),
            80,
        );
        assert!(matches!(
            target.resolve().await,
            Err(Socks5Error::ResolutionError { .. })
        ));
    }
}
