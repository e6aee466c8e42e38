//! SSL 3.0 key derivation, Finished hash and record MAC.

use sslr_crypto::hash::new_digest;
use sslr_types::{HashAlgId, TlsError};
use zeroize::Zeroize;

const PAD1: u8 = 0x36;
const PAD2: u8 = 0x5c;

/// Finished sender constants.
pub const SENDER_CLIENT: &[u8; 4] = b"CLNT";
pub const SENDER_SERVER: &[u8; 4] = b"SRVR";

/// Pad length for the MAC and Finished constructions: 48 for MD5, 40 for SHA-1.
pub fn pad_len(alg: HashAlgId) -> Result<usize, TlsError> {
    match alg {
        HashAlgId::Md5 => Ok(48),
        HashAlgId::Sha1 => Ok(40),
        HashAlgId::Sha256 => Err(TlsError::InternalError(
            "SHA-256 has no SSL 3.0 MAC construction".into(),
        )),
    }
}

fn hash(alg: HashAlgId, parts: &[&[u8]]) -> Result<Vec<u8>, TlsError> {
    Ok(sslr_crypto::hash::hash_parts(alg, parts)?)
}

/// MD5(secret ‖ SHA1(salt ‖ secret ‖ r1 ‖ r2)) for salts "A", "BB", "CCC", ...
fn expand(secret: &[u8], r1: &[u8], r2: &[u8], len: usize) -> Result<Vec<u8>, TlsError> {
    let rounds = len.div_ceil(16);
    if rounds > 26 {
        return Err(TlsError::InternalError("SSL 3.0 key block too long".into()));
    }
    let mut out = Vec::with_capacity(rounds * 16);
    for i in 0..rounds {
        let salt = vec![b'A' + i as u8; i + 1];
        let mut inner = hash(HashAlgId::Sha1, &[&salt, secret, r1, r2])?;
        out.extend_from_slice(&hash(HashAlgId::Md5, &[secret, &inner])?);
        inner.zeroize();
    }
    out.truncate(len);
    Ok(out)
}

/// The 48-byte master secret from the premaster and both randoms.
pub fn master_secret(
    pre_master: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> Result<Vec<u8>, TlsError> {
    expand(pre_master, client_random, server_random, 48)
}

/// Key block; note the server random comes first here.
pub fn key_block(
    master: &[u8],
    server_random: &[u8; 32],
    client_random: &[u8; 32],
    len: usize,
) -> Result<Vec<u8>, TlsError> {
    expand(master, server_random, client_random, len)
}

fn finished_half(
    alg: HashAlgId,
    messages: &[u8],
    sender: &[u8],
    master: &[u8],
) -> Result<Vec<u8>, TlsError> {
    let n = pad_len(alg)?;
    let inner = hash(alg, &[messages, sender, master, &vec![PAD1; n]])?;
    hash(alg, &[master, &vec![PAD2; n], &inner])
}

/// 36-byte Finished body: MD5 half followed by SHA-1 half.
pub fn finished(messages: &[u8], master: &[u8], is_client: bool) -> Result<Vec<u8>, TlsError> {
    let sender: &[u8] = if is_client {
        SENDER_CLIENT
    } else {
        SENDER_SERVER
    };
    let mut out = finished_half(HashAlgId::Md5, messages, sender, master)?;
    out.extend_from_slice(&finished_half(HashAlgId::Sha1, messages, sender, master)?);
    Ok(out)
}

/// `hash(secret ‖ pad2 ‖ hash(secret ‖ pad1 ‖ seq ‖ type ‖ length ‖ data))`
pub fn record_mac(
    alg: HashAlgId,
    secret: &[u8],
    seq: u64,
    content_type: u8,
    data: &[u8],
) -> Result<Vec<u8>, TlsError> {
    let n = pad_len(alg)?;
    let mut ctx = new_digest(alg);
    ctx.update(secret)?;
    ctx.update(&vec![PAD1; n])?;
    ctx.update(&seq.to_be_bytes())?;
    ctx.update(&[content_type])?;
    ctx.update(&(data.len() as u16).to_be_bytes())?;
    ctx.update(data)?;
    let mut inner = vec![0u8; alg.output_len()];
    ctx.finish(&mut inner)?;

    ctx.update(secret)?;
    ctx.update(&vec![PAD2; n])?;
    ctx.update(&inner)?;
    let mut mac = vec![0u8; alg.output_len()];
    ctx.finish(&mut mac)?;
    Ok(mac)
}
