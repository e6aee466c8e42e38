//! HMAC (RFC 2104) over the digests in [`crate::hash`].

use crate::hash::new_digest;
use crate::provider::Digest;
use sslr_types::{CryptoError, HashAlgId};
use zeroize::Zeroize;

const IPAD: u8 = 0x36;
const OPAD: u8 = 0x5c;

/// A keyed HMAC context. `finish` leaves it ready for the next message
/// under the same key.
pub struct Hmac {
    alg: HashAlgId,
    inner: Box<dyn Digest>,
    outer: Box<dyn Digest>,
    key_block: Vec<u8>,
}

impl Hmac {
    pub fn new(alg: HashAlgId, key: &[u8]) -> Result<Self, CryptoError> {
        let block_len = alg.block_len();
        let mut key_block = vec![0u8; block_len];
        if key.len() > block_len {
            let mut h = new_digest(alg);
            h.update(key)?;
            h.finish(&mut key_block[..alg.output_len()])?;
        } else {
            key_block[..key.len()].copy_from_slice(key);
        }
        let mut mac = Self {
            alg,
            inner: new_digest(alg),
            outer: new_digest(alg),
            key_block,
        };
        mac.rekey()?;
        Ok(mac)
    }

    pub fn algorithm(&self) -> HashAlgId {
        self.alg
    }

    pub fn output_size(&self) -> usize {
        self.alg.output_len()
    }

    fn rekey(&mut self) -> Result<(), CryptoError> {
        self.inner.reset();
        self.outer.reset();
        let mut pad: Vec<u8> = self.key_block.iter().map(|b| b ^ IPAD).collect();
        self.inner.update(&pad)?;
        for (p, k) in pad.iter_mut().zip(&self.key_block) {
            *p = k ^ OPAD;
        }
        self.outer.update(&pad)?;
        pad.zeroize();
        Ok(())
    }

    pub fn update(&mut self, data: &[u8]) -> Result<(), CryptoError> {
        self.inner.update(data)
    }

    /// Write the tag to `out` and re-arm the context with the same key.
    pub fn finish(&mut self, out: &mut [u8]) -> Result<(), CryptoError> {
        let mut inner_hash = vec![0u8; self.alg.output_len()];
        self.inner.finish(&mut inner_hash)?;
        self.outer.update(&inner_hash)?;
        inner_hash.zeroize();
        self.outer.finish(out)?;
        self.rekey()
    }

    /// One-shot HMAC.
    pub fn mac(alg: HashAlgId, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut ctx = Self::new(alg, key)?;
        ctx.update(data)?;
        let mut out = vec![0u8; alg.output_len()];
        ctx.finish(&mut out)?;
        Ok(out)
    }
}

impl Drop for Hmac {
    fn drop(&mut self) {
        self.key_block.zeroize();
    }
}
