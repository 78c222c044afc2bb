//! The `REP` byte of a SOCKS5 reply (RFC 1928, section 6).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    Succeeded = 0x00,
    GeneralSocksServerFailure = 0x01,
    ConnectionNotAllowedByRuleset = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl ReplyCode {
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyCode::Succeeded => write!(f, "succeeded"),
            ReplyCode::GeneralSocksServerFailure => write!(f, "general SOCKS server failure"),
            ReplyCode::ConnectionNotAllowedByRuleset => write!(f, "connection not allowed by ruleset"),
            ReplyCode::NetworkUnreachable => write!(f, "network unreachable"),
            ReplyCode::HostUnreachable => write!(f, "host unreachable"),
            ReplyCode::ConnectionRefused => write!(f, "connection refused"),
            ReplyCode::TtlExpired => write!(f, "TTL expired"),
            ReplyCode::CommandNotSupported => write!(f, "command not supported"),
            ReplyCode::AddressTypeNotSupported => write!(f, "address type not supported"),
        }
    }
}

impl std::error::Error for ReplyCode {}

impl From<std::io::ErrorKind> for ReplyCode {
    fn from(kind: std::io::ErrorKind) -> ReplyCode {
        match kind {
            std::io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
            std::io::ErrorKind::TimedOut => ReplyCode::TtlExpired,
            std::io::ErrorKind::HostUnreachable => ReplyCode::HostUnreachable,
            std::io::ErrorKind::NetworkUnreachable => ReplyCode::NetworkUnreachable,
            _ => ReplyCode::GeneralSocksServerFailure,
        }
    }
}

impl From<std::io::Error> for ReplyCode {
    fn from(e: std::io::Error) -> ReplyCode {
        ReplyCode::from(e.kind())
    }
}

impl From<&std::io::Error> for ReplyCode {
    fn from(e: &std::io::Error) -> ReplyCode {
        ReplyCode::from(e.kind())
    }
}

/// Maps a request-decode failure to the reply sent back to the client. Only
/// `AtypeUnsupported` gets its own code (`ADDRESS_TYPE_NOT_SUPPORTED`); every other
/// malformed-request cause — including a bad version byte this late in the
/// handshake — collapses to `COMMAND_NOT_SUPPORTED`, matching the "Malformed(atype)"
/// vs. "Malformed(other)" split in the request transition table. A bad version byte
/// in the *greeting* is handled separately (no reply at all; see `connection::Connection`).
impl From<crate::wire::DecodeError> for ReplyCode {
    fn from(e: crate::wire::DecodeError) -> ReplyCode {
        match e {
            crate::wire::DecodeError::AtypeUnsupported => ReplyCode::AddressTypeNotSupported,
            crate::wire::DecodeError::BadVersion
            | crate::wire::DecodeError::BadCommand
            | crate::wire::DecodeError::DomainNotUtf8 => ReplyCode::CommandNotSupported,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_io_error_kinds_map_without_a_feature_gate() {
        assert_eq!(ReplyCode::from(std::io::ErrorKind::HostUnreachable), ReplyCode::HostUnreachable);
        assert_eq!(ReplyCode::from(std::io::ErrorKind::NetworkUnreachable), ReplyCode::NetworkUnreachable);
    }

    #[test]
    fn unmapped_errors_fall_back_to_general_failure() {
        assert_eq!(ReplyCode::from(std::io::ErrorKind::Other), ReplyCode::GeneralSocksServerFailure);
    }

    #[test]
    fn only_bad_atype_gets_its_own_reply_code() {
        assert_eq!(ReplyCode::from(crate::wire::DecodeError::AtypeUnsupported), ReplyCode::AddressTypeNotSupported);
        assert_eq!(ReplyCode::from(crate::wire::DecodeError::BadCommand), ReplyCode::CommandNotSupported);
        assert_eq!(ReplyCode::from(crate::wire::DecodeError::BadVersion), ReplyCode::CommandNotSupported);
        assert_eq!(ReplyCode::from(crate::wire::DecodeError::DomainNotUtf8), ReplyCode::CommandNotSupported);
    }
}
