#![forbid(unsafe_code)]
#![doc = "SSL 3.0 / TLS 1.0-1.2 record and handshake protocol engine."]

pub mod alert;
pub mod cert_verify;
pub mod config;
pub mod connection;
pub mod connection_info;
pub mod connection_state;
pub mod crypt;
pub mod handshake;
pub mod record;
pub mod session;
pub mod transport;
pub mod version;

use std::fmt;

/// Protocol versions spoken by the engine, ordered oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    Ssl30,
    Tls10,
    Tls11,
    Tls12,
}

impl ProtocolVersion {
    /// All versions, newest first.
    pub const ALL: [ProtocolVersion; 4] = [
        ProtocolVersion::Tls12,
        ProtocolVersion::Tls11,
        ProtocolVersion::Tls10,
        ProtocolVersion::Ssl30,
    ];

    /// The two-byte wire encoding (major, minor).
    pub fn wire(self) -> u16 {
        match self {
            ProtocolVersion::Ssl30 => 0x0300,
            ProtocolVersion::Tls10 => 0x0301,
            ProtocolVersion::Tls11 => 0x0302,
            ProtocolVersion::Tls12 => 0x0303,
        }
    }

    pub fn from_wire(v: u16) -> Option<Self> {
        match v {
            0x0300 => Some(ProtocolVersion::Ssl30),
            0x0301 => Some(ProtocolVersion::Tls10),
            0x0302 => Some(ProtocolVersion::Tls11),
            0x0303 => Some(ProtocolVersion::Tls12),
            _ => None,
        }
    }

    /// The next lower version, if any.
    pub fn previous(self) -> Option<Self> {
        match self {
            ProtocolVersion::Ssl30 => None,
            ProtocolVersion::Tls10 => Some(ProtocolVersion::Ssl30),
            ProtocolVersion::Tls11 => Some(ProtocolVersion::Tls10),
            ProtocolVersion::Tls12 => Some(ProtocolVersion::Tls11),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolVersion::Ssl30 => "SSL 3.0",
            ProtocolVersion::Tls10 => "TLS 1.0",
            ProtocolVersion::Tls11 => "TLS 1.1",
            ProtocolVersion::Tls12 => "TLS 1.2",
        };
        f.write_str(name)
    }
}

/// Cipher suite identifier as carried in hello messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherSuite(pub u16);

impl CipherSuite {
    pub const RSA_WITH_NULL_MD5: Self = Self(0x0001);
    pub const RSA_WITH_NULL_SHA: Self = Self(0x0002);
    pub const RSA_WITH_RC4_128_MD5: Self = Self(0x0004);
    pub const RSA_WITH_RC4_128_SHA: Self = Self(0x0005);
    pub const RSA_WITH_3DES_EDE_CBC_SHA: Self = Self(0x000A);
    pub const RSA_WITH_AES_128_CBC_SHA: Self = Self(0x002F);
    pub const RSA_WITH_AES_256_CBC_SHA: Self = Self(0x0035);
    // TLS 1.2 only
    pub const RSA_WITH_AES_128_CBC_SHA256: Self = Self(0x003C);
    pub const RSA_WITH_AES_256_CBC_SHA256: Self = Self(0x003D);

    /// Signalling value announcing secure renegotiation support when no
    /// extensions are sent (RFC 5746).
    pub const EMPTY_RENEGOTIATION_INFO_SCSV: Self = Self(0x00FF);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_wire_and_order() {
        for v in ProtocolVersion::ALL {
            assert_eq!(ProtocolVersion::from_wire(v.wire()), Some(v));
        }
        assert!(ProtocolVersion::Ssl30 < ProtocolVersion::Tls10);
        assert!(ProtocolVersion::Tls11 < ProtocolVersion::Tls12);
        assert_eq!(ProtocolVersion::from_wire(0x0200), None);
        assert_eq!(ProtocolVersion::Tls10.previous(), Some(ProtocolVersion::Ssl30));
        assert_eq!(ProtocolVersion::Tls12.to_string(), "TLS 1.2");
    }
}
