//! Per-direction cipher state: bulk cipher, MAC secret and sequence number.

use crate::crypt::ssl3;
use sslr_crypto::hash::new_digest;
use sslr_crypto::hmac::Hmac;
use sslr_crypto::{Digest, SymmetricCipher};
use sslr_types::{HashAlgId, TlsError};
use zeroize::Zeroize;

/// Record MAC construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMac {
    /// No MAC (initial null state).
    None,
    /// SSL 3.0 pad1/pad2 construction.
    Ssl3(HashAlgId),
    /// TLS HMAC.
    Hmac(HashAlgId),
}

impl RecordMac {
    pub fn output_len(self) -> usize {
        match self {
            RecordMac::None => 0,
            RecordMac::Ssl3(alg) | RecordMac::Hmac(alg) => alg.output_len(),
        }
    }

    fn hash_alg(self) -> Option<HashAlgId> {
        match self {
            RecordMac::None => None,
            RecordMac::Ssl3(alg) | RecordMac::Hmac(alg) => Some(alg),
        }
    }
}

/// Work performed by the most recent decrypt, used to verify that the
/// integrity check does the same amount of work for every padding value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecryptWork {
    pub padding_check_rounds: usize,
    pub mac_blocks: usize,
    pub dummy_blocks: usize,
    pub jitter_blocks: usize,
}

/// Live key material for one traffic direction.
pub struct CipherState {
    cipher: Option<Box<dyn SymmetricCipher>>,
    mac: RecordMac,
    mac_secret: Vec<u8>,
    hmac: Option<Hmac>,
    scratch: Option<Box<dyn Digest>>,
    seq: u64,
    pub(crate) last_decrypt_work: DecryptWork,
}

impl CipherState {
    /// An unconfigured state: no cipher object, so any record operation
    /// fails with an internal error.
    pub fn new() -> Self {
        Self {
            cipher: None,
            mac: RecordMac::None,
            mac_secret: Vec::new(),
            hmac: None,
            scratch: None,
            seq: 0,
            last_decrypt_work: DecryptWork::default(),
        }
    }

    /// The TLS_NULL_WITH_NULL_NULL state used before the first ChangeCipherSpec.
    pub fn plaintext() -> Self {
        let mut s = Self::new();
        s.cipher = Some(Box::new(sslr_crypto::cipher::NullCipher));
        s
    }

    /// Install the bulk cipher object and MAC construction.
    pub fn configure(&mut self, cipher: Box<dyn SymmetricCipher>, mac: RecordMac) {
        self.cipher = Some(cipher);
        self.mac = mac;
        self.hmac = None;
        self.scratch = mac.hash_alg().map(new_digest);
        self.seq = 0;
    }

    /// Install the MAC secret. Must precede any MAC computation.
    pub fn load_secret(&mut self, secret: &[u8]) -> Result<(), TlsError> {
        self.mac_secret.zeroize();
        self.mac_secret = secret.to_vec();
        self.hmac = match self.mac {
            RecordMac::Hmac(alg) => Some(Hmac::new(alg, secret)?),
            _ => None,
        };
        Ok(())
    }

    /// Key the bulk cipher. An empty IV leaves a zero chaining value.
    pub fn load_key_iv(&mut self, key: &[u8], iv: &[u8]) -> Result<(), TlsError> {
        let cipher = self.cipher_mut()?;
        cipher.load_key(key)?;
        if !iv.is_empty() {
            cipher.load_iv(iv)?;
        }
        Ok(())
    }

    /// True for the null/null state, whose records pass through unprotected.
    pub fn is_plaintext(&self) -> bool {
        self.mac == RecordMac::None && self.block_size() == 1
    }

    /// Cipher block size; 0 when no cipher object is installed.
    pub fn block_size(&self) -> usize {
        self.cipher.as_ref().map_or(0, |c| c.block_size())
    }

    pub fn mac_size(&self) -> usize {
        self.mac.output_len()
    }

    pub fn sequence_number(&self) -> u64 {
        self.seq
    }

    /// Work counters of the most recent decrypt.
    pub fn last_decrypt_work(&self) -> DecryptWork {
        self.last_decrypt_work
    }

    pub(crate) fn cipher_mut(&mut self) -> Result<&mut Box<dyn SymmetricCipher>, TlsError> {
        self.cipher
            .as_mut()
            .ok_or_else(|| TlsError::InternalError("no cipher object".into()))
    }

    pub(crate) fn advance_sequence(&mut self) -> Result<(), TlsError> {
        self.seq = self
            .seq
            .checked_add(1)
            .ok_or_else(|| TlsError::InternalError("sequence number overflow".into()))?;
        Ok(())
    }

    /// Compute the record MAC for `payload` under sequence number `seq`.
    ///
    /// SSL 3.0: `hash(secret ‖ pad2 ‖ hash(secret ‖ pad1 ‖ seq ‖ type ‖ length ‖ payload))`.
    /// TLS: `HMAC(secret, seq ‖ type ‖ version ‖ length ‖ payload)`.
    pub fn calculate_record_mac(
        &mut self,
        seq: u64,
        version: u16,
        content_type: u8,
        payload: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        match self.mac {
            RecordMac::None => Ok(Vec::new()),
            RecordMac::Ssl3(alg) => {
                if self.mac_secret.is_empty() {
                    return Err(TlsError::InternalError("MAC secret not loaded".into()));
                }
                ssl3::record_mac(alg, &self.mac_secret, seq, content_type, payload)
            }
            RecordMac::Hmac(alg) => {
                let hmac = self
                    .hmac
                    .as_mut()
                    .ok_or_else(|| TlsError::InternalError("MAC secret not loaded".into()))?;
                hmac.update(&seq.to_be_bytes())?;
                hmac.update(&[content_type])?;
                hmac.update(&version.to_be_bytes())?;
                hmac.update(&(payload.len() as u16).to_be_bytes())?;
                hmac.update(payload)?;
                let mut out = vec![0u8; alg.output_len()];
                hmac.finish(&mut out)?;
                Ok(out)
            }
        }
    }

    /// Run `blocks` extra hash compressions whose result is discarded.
    pub(crate) fn burn_mac_blocks(&mut self, blocks: usize) -> Result<(), TlsError> {
        if let Some(scratch) = self.scratch.as_mut() {
            let block = [0u8; 64];
            for _ in 0..blocks {
                scratch.update(&block)?;
            }
            scratch.reset();
        }
        Ok(())
    }
}

impl Default for CipherState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CipherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherState")
            .field("block_size", &self.block_size())
            .field("mac", &self.mac)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

impl Drop for CipherState {
    fn drop(&mut self) {
        self.mac_secret.zeroize();
    }
}
