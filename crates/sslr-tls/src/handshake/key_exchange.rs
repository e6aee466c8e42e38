//! Client key exchange.

use sslr_types::{CryptoError, TlsError};
use zeroize::Zeroize;

use crate::config::PremasterEncryptor;

/// RSA premaster length: client_version(2) || random(46).
pub const RSA_PREMASTER_LEN: usize = 48;

/// Client side of a key exchange method.
pub trait KeyExchange {
    /// Whether the method needs a ServerKeyExchange message.
    fn needs_server_key_exchange(&self) -> bool {
        false
    }

    fn process_server_key_exchange(&mut self, _body: &[u8]) -> Result<(), TlsError> {
        Err(TlsError::UnexpectedMessage(
            "ServerKeyExchange not used by this key exchange".into(),
        ))
    }

    /// Generate the premaster and its encrypted form for the server whose
    /// leaf certificate is `leaf_cert`.
    fn prepare_premaster(&mut self, client_version: u16, leaf_cert: &[u8]) -> Result<(), TlsError>;

    fn pre_master_secret(&self) -> Result<&[u8], TlsError>;

    /// exchange_keys payload of the ClientKeyExchange message.
    fn client_key_exchange(&self) -> Result<&[u8], TlsError>;
}

/// RSA key transport. The public-key operation is delegated to the
/// configured encryptor.
pub struct RsaKeyExchange {
    encryptor: PremasterEncryptor,
    premaster: Vec<u8>,
    encrypted: Vec<u8>,
}

impl RsaKeyExchange {
    pub fn new(encryptor: PremasterEncryptor) -> Self {
        Self {
            encryptor,
            premaster: Vec::new(),
            encrypted: Vec::new(),
        }
    }
}

impl KeyExchange for RsaKeyExchange {
    fn prepare_premaster(&mut self, client_version: u16, leaf_cert: &[u8]) -> Result<(), TlsError> {
        if leaf_cert.is_empty() {
            return Err(TlsError::HandshakeFailed(
                "no server certificate for RSA key exchange".into(),
            ));
        }
        self.premaster.zeroize();
        let mut pms = vec![0u8; RSA_PREMASTER_LEN];
        pms[..2].copy_from_slice(&client_version.to_be_bytes());
        getrandom::getrandom(&mut pms[2..])
            .map_err(|_| TlsError::CryptoError(CryptoError::RandomFailed))?;
        match (self.encryptor)(leaf_cert, &pms) {
            Ok(encrypted) => self.encrypted = encrypted,
            Err(e) => {
                pms.zeroize();
                return Err(e);
            }
        }
        self.premaster = pms;
        Ok(())
    }

    fn pre_master_secret(&self) -> Result<&[u8], TlsError> {
        if self.premaster.is_empty() {
            return Err(TlsError::InternalError("premaster not prepared".into()));
        }
        Ok(&self.premaster)
    }

    fn client_key_exchange(&self) -> Result<&[u8], TlsError> {
        if self.encrypted.is_empty() {
            return Err(TlsError::InternalError("premaster not prepared".into()));
        }
        Ok(&self.encrypted)
    }
}

impl Drop for RsaKeyExchange {
    fn drop(&mut self) {
        self.premaster.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn xor_encryptor() -> PremasterEncryptor {
        Arc::new(|cert: &[u8], pms: &[u8]| {
            Ok::<Vec<u8>, TlsError>(pms.iter().map(|b| b ^ cert[0]).collect())
        })
    }

    #[test]
    fn test_rsa_premaster_layout() {
        let mut kx = RsaKeyExchange::new(xor_encryptor());
        assert!(kx.pre_master_secret().is_err());
        kx.prepare_premaster(0x0303, &[0xFF, 1, 2]).unwrap();
        let pms = kx.pre_master_secret().unwrap().to_vec();
        assert_eq!(pms.len(), 48);
        assert_eq!(&pms[..2], &[3, 3]);
        let enc = kx.client_key_exchange().unwrap();
        let back: Vec<u8> = enc.iter().map(|b| b ^ 0xFF).collect();
        assert_eq!(back, pms);
    }

    #[test]
    fn test_fresh_randomness_per_premaster() {
        let mut kx = RsaKeyExchange::new(xor_encryptor());
        kx.prepare_premaster(0x0301, &[1]).unwrap();
        let a = kx.pre_master_secret().unwrap().to_vec();
        kx.prepare_premaster(0x0301, &[1]).unwrap();
        assert_ne!(a, kx.pre_master_secret().unwrap());
    }

    #[test]
    fn test_requires_certificate_and_rejects_ske() {
        let mut kx = RsaKeyExchange::new(xor_encryptor());
        assert!(matches!(
            kx.prepare_premaster(0x0301, &[]),
            Err(TlsError::HandshakeFailed(_))
        ));
        assert!(!kx.needs_server_key_exchange());
        assert!(matches!(
            kx.process_server_key_exchange(&[1, 2]),
            Err(TlsError::UnexpectedMessage(_))
        ));
    }

    #[test]
    fn test_encryptor_error_propagates() {
        let failing: PremasterEncryptor =
            Arc::new(|_: &[u8], _: &[u8]| {
            Err::<Vec<u8>, _>(TlsError::CertVerifyFailed("not RSA".into()))
        });
        let mut kx = RsaKeyExchange::new(failing);
        assert!(matches!(
            kx.prepare_premaster(0x0301, &[1]),
            Err(TlsError::CertVerifyFailed(_))
        ));
        assert!(kx.client_key_exchange().is_err());
    }
}
