//! MD5, SHA-1 and SHA-256 behind the [`Digest`] trait.

use crate::provider::Digest;
use sha2::digest::{Digest as RcDigest, FixedOutputReset};
use sslr_types::{CryptoError, HashAlgId};

/// A digest context wrapping a RustCrypto hash.
#[derive(Clone, Default)]
pub struct Hash<D> {
    inner: D,
}

pub type Md5 = Hash<md5::Md5>;
pub type Sha1 = Hash<sha1::Sha1>;
pub type Sha256 = Hash<sha2::Sha256>;

impl<D> Hash<D>
where
    D: RcDigest + FixedOutputReset + Default + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            inner: D::default(),
        }
    }

    /// One-shot digest.
    pub fn digest(data: &[u8]) -> Vec<u8> {
        let mut ctx = D::default();
        RcDigest::update(&mut ctx, data);
        ctx.finalize().to_vec()
    }
}

impl<D> Digest for Hash<D>
where
    D: RcDigest + FixedOutputReset + Default + Send + Sync,
{
    fn output_size(&self) -> usize {
        <D as RcDigest>::output_size()
    }

    fn block_size(&self) -> usize {
        64
    }

    fn update(&mut self, data: &[u8]) -> Result<(), CryptoError> {
        RcDigest::update(&mut self.inner, data);
        Ok(())
    }

    fn finish(&mut self, out: &mut [u8]) -> Result<(), CryptoError> {
        let n = <D as RcDigest>::output_size();
        if out.len() < n {
            return Err(CryptoError::BufferTooSmall {
                need: n,
                got: out.len(),
            });
        }
        let digest = RcDigest::finalize_reset(&mut self.inner);
        out[..n].copy_from_slice(&digest);
        Ok(())
    }

    fn reset(&mut self) {
        RcDigest::reset(&mut self.inner);
    }
}

/// Create a fresh digest context for `alg`.
pub fn new_digest(alg: HashAlgId) -> Box<dyn Digest> {
    match alg {
        HashAlgId::Md5 => Box::new(Md5::new()),
        HashAlgId::Sha1 => Box::new(Sha1::new()),
        HashAlgId::Sha256 => Box::new(Sha256::new()),
    }
}

/// One-shot digest of the concatenation of `parts`.
pub fn hash_parts(alg: HashAlgId, parts: &[&[u8]]) -> Result<Vec<u8>, CryptoError> {
    let mut ctx = new_digest(alg);
    for part in parts {
        ctx.update(part)?;
    }
    let mut out = vec![0u8; ctx.output_size()];
    ctx.finish(&mut out)?;
    Ok(out)
}
