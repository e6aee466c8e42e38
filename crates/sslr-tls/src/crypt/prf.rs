//! TLS pseudo-random functions (RFC 2246 §5, RFC 5246 §5).
//!
//! ```text
//! P_hash(secret, seed) = HMAC_hash(secret, A(1) + seed) ||
//!                        HMAC_hash(secret, A(2) + seed) || ...
//! A(0) = seed
//! A(i) = HMAC_hash(secret, A(i-1))
//! ```

use sslr_crypto::hmac::Hmac;
use sslr_types::{HashAlgId, TlsError};
use zeroize::Zeroize;

/// P_hash expansion, writing `out.len()` bytes.
fn p_hash(alg: HashAlgId, secret: &[u8], seed: &[u8], out: &mut [u8]) -> Result<(), TlsError> {
    let mut hmac = Hmac::new(alg, secret)?;
    let n = alg.output_len();
    let mut a = vec![0u8; n];
    let mut block = vec![0u8; n];

    hmac.update(seed)?;
    hmac.finish(&mut a)?;

    for chunk in out.chunks_mut(n) {
        hmac.update(&a)?;
        hmac.update(seed)?;
        hmac.finish(&mut block)?;
        chunk.copy_from_slice(&block[..chunk.len()]);

        hmac.update(&a)?;
        hmac.finish(&mut a)?;
    }
    block.zeroize();
    a.zeroize();
    Ok(())
}

fn label_seed(label: &str, seed: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(label.len() + seed.len());
    v.extend_from_slice(label.as_bytes());
    v.extend_from_slice(seed);
    v
}

/// TLS 1.2 PRF over SHA-256.
pub fn prf_tls12(
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, TlsError> {
    let mut out = vec![0u8; output_len];
    p_hash(HashAlgId::Sha256, secret, &label_seed(label, seed), &mut out)?;
    Ok(out)
}

/// TLS 1.0/1.1 PRF: P_MD5 over the first half of the secret XOR P_SHA1
/// over the second half. For odd lengths the halves share a middle byte.
pub fn prf_tls10(
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, TlsError> {
    let half = secret.len().div_ceil(2);
    let s1 = &secret[..half];
    let s2 = &secret[secret.len() - half..];
    let ls = label_seed(label, seed);

    let mut out = vec![0u8; output_len];
    p_hash(HashAlgId::Md5, s1, &ls, &mut out)?;
    let mut sha = vec![0u8; output_len];
    p_hash(HashAlgId::Sha1, s2, &ls, &mut sha)?;
    for (o, s) in out.iter_mut().zip(&sha) {
        *o ^= s;
    }
    sha.zeroize();
    Ok(out)
}
