//! Negotiated connection parameters and the security rating.

use std::fmt;

use crate::{CipherSuite, ProtocolVersion};

/// Coarse security level derived from a [`SecurityRating`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityLevel {
    /// No encryption.
    None,
    Low,
    Medium,
    High,
}

/// Summary of a completed handshake, reported once per negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityRating {
    pub version: ProtocolVersion,
    pub cipher_name: &'static str,
    pub cipher_bits: u32,
    /// Server key size; 0 if the certificate handler did not report one.
    pub key_bits: u32,
    pub revocation_unknown: bool,
}

impl SecurityRating {
    pub fn level(&self) -> SecurityLevel {
        if self.cipher_bits == 0 {
            return SecurityLevel::None;
        }
        let weak_key = self.key_bits != 0 && self.key_bits < 1024;
        if self.version == ProtocolVersion::Ssl30 || self.cipher_bits < 112 || weak_key {
            return SecurityLevel::Low;
        }
        let short_key = self.key_bits != 0 && self.key_bits < 2048;
        if self.revocation_unknown || short_key {
            return SecurityLevel::Medium;
        }
        SecurityLevel::High
    }

    /// Human-readable cipher summary, e.g. `TLS 1.2 AES128-SHA (128 bit, 2048 bit RSA)`.
    pub fn summary(&self) -> String {
        let mut s = format!("{} {} ({} bit", self.version, self.cipher_name, self.cipher_bits);
        if self.key_bits != 0 {
            s.push_str(&format!(", {} bit RSA", self.key_bits));
        }
        s.push(')');
        if self.revocation_unknown {
            s.push_str(", revocation status unknown");
        }
        s
    }
}

impl fmt::Display for SecurityRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Snapshot of a connection after its handshake completed.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub version: ProtocolVersion,
    pub cipher_suite: CipherSuite,
    pub resumed: bool,
    pub server_name: Option<String>,
    pub peer_certificates: Vec<Vec<u8>>,
    pub next_protocol: Option<Vec<u8>>,
    pub security: SecurityRating,
    /// Further requests must not be pipelined over this connection.
    pub pipelining_forbidden: bool,
}
