//! RFC 1928 greeting/request/reply framing.
//!
//! The decoders here are pure functions over `&[u8]`: they never touch an `AsyncRead`
//! directly, so the same code path handles bytes delivered one at a time over a real
//! socket or an entire message delivered in a single read. This is what lets a caller
//! feed a message in arbitrary fragments and always get the same `Decoded` result once
//! enough bytes have accumulated.

use proxy_types::DestAddr;
use std::convert::TryFrom;
use std::fmt;
use std::io::Write;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

pub const SOCKS_VERSION: u8 = 0x05;
pub const NO_AUTH_REQUIRED: u8 = 0x00;
pub const NO_ACCEPTABLE_METHODS: u8 = 0xFF;

/// Upper bound on the size of an encoded address (1 ATYP + up to 1+255 domain bytes + 2 port bytes).
const ADDR_MAX_LEN: usize = 260;

/// Result of trying to decode one message out of a buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded<T> {
    /// The buffer must grow to at least this many total bytes before decoding can be
    /// retried (not a delta on top of what's already buffered). The caller must not
    /// advance its buffer past what it already had.
    Need(usize),
    /// A full message was parsed, consuming exactly `consumed` bytes from the front
    /// of the buffer. Any bytes beyond `consumed` were not touched.
    Done { value: T, consumed: usize },
}

/// Why a buffer failed to decode as a well-formed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    BadVersion,
    BadCommand,
    AtypeUnsupported,
    DomainNotUtf8,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::BadVersion => write!(f, "unsupported protocol version"),
            DecodeError::BadCommand => write!(f, "unsupported command"),
            DecodeError::AtypeUnsupported => write!(f, "unsupported address type"),
            DecodeError::DomainNotUtf8 => write!(f, "domain name is not valid utf-8"),
        }
    }
}

impl std::error::Error for DecodeError {}

pub type DecodeResult<T> = Result<Decoded<T>, DecodeError>;

/// Client greeting: `VER | NMETHODS | METHODS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub methods: Vec<u8>,
}

pub fn decode_greeting(buf: &[u8]) -> DecodeResult<Greeting> {
    if buf.is_empty() {
        return Ok(Decoded::Need(2));
    }

    if buf[0] != SOCKS_VERSION {
        return Err(DecodeError::BadVersion);
    }

    if buf.len() < 2 {
        return Ok(Decoded::Need(2));
    }

    let nmethods = usize::from(buf[1]);
    let total = 2 + nmethods;

    if buf.len() < total {
        return Ok(Decoded::Need(total));
    }

    Ok(Decoded::Done {
        value: Greeting {
            methods: buf[2..total].to_vec(),
        },
        consumed: total,
    })
}

pub fn encode_method_selection(buf: &mut Vec<u8>, method: u8) {
    buf.push(SOCKS_VERSION);
    buf.push(method);
}

/// SOCKS command, as carried by the request frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Connect = 0x01,
    Bind = 0x02,
    UdpAssociate = 0x03,
}

impl TryFrom<u8> for Command {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Command::Connect),
            0x02 => Ok(Command::Bind),
            0x03 => Ok(Command::UdpAssociate),
            _ => Err(DecodeError::BadCommand),
        }
    }
}

/// Client request: `VER | CMD | RSV | ATYP | DST.ADDR | DST.PORT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub dst: DestAddr,
}

const REQUEST_FIXED_LEN: usize = 4;

pub fn decode_request(buf: &[u8]) -> DecodeResult<Request> {
    if buf.len() < REQUEST_FIXED_LEN {
        return Ok(Decoded::Need(REQUEST_FIXED_LEN));
    }

    if buf[0] != SOCKS_VERSION {
        return Err(DecodeError::BadVersion);
    }

    let command = Command::try_from(buf[1])?;
    let atype = buf[3];

    let (dst, total) = match decode_addr_at(buf, REQUEST_FIXED_LEN, atype)? {
        Decoded::Need(n) => return Ok(Decoded::Need(n)),
        Decoded::Done { value, consumed } => (value, consumed),
    };

    Ok(Decoded::Done {
        value: Request { command, dst },
        consumed: total,
    })
}

/// Reply message: `VER | REP | RSV | ATYP | BND.ADDR | BND.PORT`.
///
/// Always encoded in its full form (4 to 22 bytes), padding with `0.0.0.0:0` when no
/// bound address is available yet. RFC 1928 only describes this shape; the 2-byte
/// short form some implementations use as a shortcut is accepted on decode (not
/// needed here, since this server never reads replies) but never produced.
pub fn encode_reply(buf: &mut Vec<u8>, reply_code: u8, bound: &DestAddr) {
    buf.push(SOCKS_VERSION);
    buf.push(reply_code);
    buf.push(0x00); // reserved
    encode_addr(buf, bound);
}

pub fn reply_addr_unspecified() -> DestAddr {
    DestAddr::Ip(SocketAddr::from(([0, 0, 0, 0], 0)))
}

/// Decodes an address + port starting at `offset` within `buf`. `Need` values are
/// absolute lengths from the start of `buf`, matching `decode_request`'s contract.
fn decode_addr_at(buf: &[u8], offset: usize, atype: u8) -> DecodeResult<DestAddr> {
    match atype {
        1 => {
            let total = offset + 4 + 2;
            if buf.len() < total {
                return Ok(Decoded::Need(total));
            }
            let ip = Ipv4Addr::new(buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]);
            let port = u16::from_be_bytes([buf[offset + 4], buf[offset + 5]]);
            Ok(Decoded::Done {
                value: DestAddr::Ip(SocketAddr::V4(SocketAddrV4::new(ip, port))),
                consumed: total,
            })
        }
        3 => {
            if buf.len() < offset + 1 {
                return Ok(Decoded::Need(offset + 1));
            }
            let len = usize::from(buf[offset]);
            let total = offset + 1 + len + 2;
            if buf.len() < total {
                return Ok(Decoded::Need(total));
            }
            let domain_start = offset + 1;
            let domain_end = domain_start + len;
            let domain = std::str::from_utf8(&buf[domain_start..domain_end])
                .map_err(|_| DecodeError::DomainNotUtf8)?
                .to_owned();
            let port = u16::from_be_bytes([buf[domain_end], buf[domain_end + 1]]);
            Ok(Decoded::Done {
                value: DestAddr::Domain(domain, port),
                consumed: total,
            })
        }
        4 => {
            let total = offset + 16 + 2;
            if buf.len() < total {
                return Ok(Decoded::Need(total));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[offset..offset + 16]);
            let ip = Ipv6Addr::from(octets);
            let port = u16::from_be_bytes([buf[offset + 16], buf[offset + 17]]);
            Ok(Decoded::Done {
                value: DestAddr::Ip(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0))),
                consumed: total,
            })
        }
        _ => Err(DecodeError::AtypeUnsupported),
    }
}

fn encode_addr(buf: &mut Vec<u8>, addr: &DestAddr) {
    let mut scratch = [0u8; ADDR_MAX_LEN];
    let mut writer: &mut [u8] = &mut scratch;

    match addr {
        DestAddr::Ip(SocketAddr::V4(addr)) => {
            writer.write_all(&[1]).expect("scratch buffer large enough");
            writer.write_all(&addr.ip().octets()).expect("scratch buffer large enough");
            writer.write_all(&addr.port().to_be_bytes()).expect("scratch buffer large enough");
        }
        DestAddr::Ip(SocketAddr::V6(addr)) => {
            writer.write_all(&[4]).expect("scratch buffer large enough");
            writer.write_all(&addr.ip().octets()).expect("scratch buffer large enough");
            writer.write_all(&addr.port().to_be_bytes()).expect("scratch buffer large enough");
        }
        DestAddr::Domain(domain, port) => {
            let len = u8::try_from(domain.len()).expect("domain name within 255 bytes (checked by codec)");
            writer.write_all(&[3, len]).expect("scratch buffer large enough");
            writer.write_all(domain.as_bytes()).expect("scratch buffer large enough");
            writer.write_all(&port.to_be_bytes()).expect("scratch buffer large enough");
        }
    }

    let written = ADDR_MAX_LEN - writer.len();
    buf.extend_from_slice(&scratch[..written]);
}
