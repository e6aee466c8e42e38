//! Cipher suite parameters and key derivation primitives.

pub mod prf;
pub mod ssl3;
pub mod transcript;

use crate::{CipherSuite, ProtocolVersion};
use sslr_types::{CipherAlgId, HashAlgId, TlsError};

/// Key exchange algorithm of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchangeAlg {
    /// Premaster encrypted to the server's RSA certificate key.
    Rsa,
}

/// Static parameters of a supported cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSuiteParams {
    pub suite: CipherSuite,
    pub name: &'static str,
    pub key_exchange: KeyExchangeAlg,
    pub cipher: CipherAlgId,
    pub mac: HashAlgId,
    pub min_version: ProtocolVersion,
    pub max_version: ProtocolVersion,
}

const SUITES: &[CipherSuiteParams] = &[
    CipherSuiteParams {
        suite: CipherSuite::RSA_WITH_NULL_MD5,
        name: "NULL-MD5",
        key_exchange: KeyExchangeAlg::Rsa,
        cipher: CipherAlgId::Null,
        mac: HashAlgId::Md5,
        min_version: ProtocolVersion::Ssl30,
        max_version: ProtocolVersion::Tls12,
    },
    CipherSuiteParams {
        suite: CipherSuite::RSA_WITH_NULL_SHA,
        name: "NULL-SHA",
        key_exchange: KeyExchangeAlg::Rsa,
        cipher: CipherAlgId::Null,
        mac: HashAlgId::Sha1,
        min_version: ProtocolVersion::Ssl30,
        max_version: ProtocolVersion::Tls12,
    },
    CipherSuiteParams {
        suite: CipherSuite::RSA_WITH_RC4_128_MD5,
        name: "RC4-MD5",
        key_exchange: KeyExchangeAlg::Rsa,
        cipher: CipherAlgId::Rc4_128,
        mac: HashAlgId::Md5,
        min_version: ProtocolVersion::Ssl30,
        max_version: ProtocolVersion::Tls12,
    },
    CipherSuiteParams {
        suite: CipherSuite::RSA_WITH_RC4_128_SHA,
        name: "RC4-SHA",
        key_exchange: KeyExchangeAlg::Rsa,
        cipher: CipherAlgId::Rc4_128,
        mac: HashAlgId::Sha1,
        min_version: ProtocolVersion::Ssl30,
        max_version: ProtocolVersion::Tls12,
    },
    CipherSuiteParams {
        suite: CipherSuite::RSA_WITH_3DES_EDE_CBC_SHA,
        name: "DES-CBC3-SHA",
        key_exchange: KeyExchangeAlg::Rsa,
        cipher: CipherAlgId::TripleDesEdeCbc,
        mac: HashAlgId::Sha1,
        min_version: ProtocolVersion::Ssl30,
        max_version: ProtocolVersion::Tls12,
    },
    CipherSuiteParams {
        suite: CipherSuite::RSA_WITH_AES_128_CBC_SHA,
        name: "AES128-SHA",
        key_exchange: KeyExchangeAlg::Rsa,
        cipher: CipherAlgId::Aes128Cbc,
        mac: HashAlgId::Sha1,
        min_version: ProtocolVersion::Ssl30,
        max_version: ProtocolVersion::Tls12,
    },
    CipherSuiteParams {
        suite: CipherSuite::RSA_WITH_AES_256_CBC_SHA,
        name: "AES256-SHA",
        key_exchange: KeyExchangeAlg::Rsa,
        cipher: CipherAlgId::Aes256Cbc,
        mac: HashAlgId::Sha1,
        min_version: ProtocolVersion::Ssl30,
        max_version: ProtocolVersion::Tls12,
    },
    CipherSuiteParams {
        suite: CipherSuite::RSA_WITH_AES_128_CBC_SHA256,
        name: "AES128-SHA256",
        key_exchange: KeyExchangeAlg::Rsa,
        cipher: CipherAlgId::Aes128Cbc,
        mac: HashAlgId::Sha256,
        min_version: ProtocolVersion::Tls12,
        max_version: ProtocolVersion::Tls12,
    },
    CipherSuiteParams {
        suite: CipherSuite::RSA_WITH_AES_256_CBC_SHA256,
        name: "AES256-SHA256",
        key_exchange: KeyExchangeAlg::Rsa,
        cipher: CipherAlgId::Aes256Cbc,
        mac: HashAlgId::Sha256,
        min_version: ProtocolVersion::Tls12,
        max_version: ProtocolVersion::Tls12,
    },
];

impl CipherSuiteParams {
    /// Look up the parameters of a supported suite.
    pub fn from_suite(suite: CipherSuite) -> Result<Self, TlsError> {
        SUITES
            .iter()
            .find(|p| p.suite == suite)
            .copied()
            .ok_or(TlsError::NoSharedCipherSuite)
    }

    /// All suites this engine implements.
    pub fn all() -> &'static [CipherSuiteParams] {
        SUITES
    }

    pub fn supports_version(&self, version: ProtocolVersion) -> bool {
        version >= self.min_version && version <= self.max_version
    }

    pub fn mac_len(&self) -> usize {
        self.mac.output_len()
    }

    pub fn key_len(&self) -> usize {
        self.cipher.key_len()
    }

    /// IV bytes taken from the key block. TLS 1.1+ CBC records carry an
    /// explicit IV instead.
    pub fn fixed_iv_len(&self, version: ProtocolVersion) -> usize {
        if version >= ProtocolVersion::Tls11 {
            0
        } else {
            self.cipher.iv_len()
        }
    }

    /// Total key block length for both directions.
    pub fn key_block_len(&self, version: ProtocolVersion) -> usize {
        2 * (self.mac_len() + self.key_len() + self.fixed_iv_len(version))
    }
}

/// Whether outgoing application data on this suite needs the 1/(n-1)
/// split on SSL 3.0 / TLS 1.0.
///
/// Deny-list: suites whose bulk cipher does not chain IVs across records.
pub fn requires_record_splitting(suite: CipherSuite) -> bool {
    !matches!(
        suite,
        CipherSuite::RSA_WITH_NULL_MD5
            | CipherSuite::RSA_WITH_NULL_SHA
            | CipherSuite::RSA_WITH_RC4_128_MD5
            | CipherSuite::RSA_WITH_RC4_128_SHA
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_block_len() {
        let p = CipherSuiteParams::from_suite(CipherSuite::RSA_WITH_AES_128_CBC_SHA).unwrap();
        // 2 * (20 + 16 + 16)
        assert_eq!(p.key_block_len(ProtocolVersion::Tls10), 104);
        // explicit IV: 2 * (20 + 16)
        assert_eq!(p.key_block_len(ProtocolVersion::Tls12), 72);

        let rc4 = CipherSuiteParams::from_suite(CipherSuite::RSA_WITH_RC4_128_MD5).unwrap();
        assert_eq!(rc4.key_block_len(ProtocolVersion::Ssl30), 64);
    }

    #[test]
    fn test_sha256_suites_are_tls12_only() {
        let p = CipherSuiteParams::from_suite(CipherSuite::RSA_WITH_AES_256_CBC_SHA256).unwrap();
        assert!(p.supports_version(ProtocolVersion::Tls12));
        assert!(!p.supports_version(ProtocolVersion::Tls11));
    }

    #[test]
    fn test_unknown_suite() {
        assert!(matches!(
            CipherSuiteParams::from_suite(CipherSuite(0xC02F)),
            Err(TlsError::NoSharedCipherSuite)
        ));
    }

    #[test]
    fn test_record_splitting_deny_list() {
        assert!(requires_record_splitting(CipherSuite::RSA_WITH_AES_128_CBC_SHA));
        assert!(requires_record_splitting(CipherSuite::RSA_WITH_3DES_EDE_CBC_SHA));
        assert!(!requires_record_splitting(CipherSuite::RSA_WITH_RC4_128_SHA));
        assert!(!requires_record_splitting(CipherSuite::RSA_WITH_NULL_SHA));
    }
}
