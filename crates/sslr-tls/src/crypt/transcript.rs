//! Handshake transcript.
//!
//! Messages are buffered rather than hashed incrementally: the Finished
//! computation differs per version (raw messages for SSL 3.0, MD5‖SHA-1
//! for TLS 1.0/1.1, SHA-256 for TLS 1.2), and the version is only known
//! once the ServerHello has already been appended.

use sslr_crypto::hash::hash_parts;
use sslr_types::{HashAlgId, TlsError};

#[derive(Debug, Default, Clone)]
pub struct HandshakeTranscript {
    messages: Vec<u8>,
}

impl HandshakeTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one complete handshake message, header included.
    pub fn update(&mut self, message: &[u8]) {
        self.messages.extend_from_slice(message);
    }

    pub fn messages(&self) -> &[u8] {
        &self.messages
    }

    pub fn hash(&self, alg: HashAlgId) -> Result<Vec<u8>, TlsError> {
        Ok(hash_parts(alg, &[&self.messages])?)
    }

    /// MD5 ‖ SHA-1 of the transcript (TLS 1.0/1.1 handshake hash).
    pub fn md5_sha1(&self) -> Result<Vec<u8>, TlsError> {
        let mut out = self.hash(HashAlgId::Md5)?;
        out.extend_from_slice(&self.hash(HashAlgId::Sha1)?);
        Ok(out)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_transcript_hash_is_non_destructive() {
        let mut t = HandshakeTranscript::new();
        t.update(b"hello");
        let h1 = t.hash(HashAlgId::Sha256).unwrap();
        assert_eq!(h1, t.hash(HashAlgId::Sha256).unwrap());
        t.update(b" world");
        assert_eq!(
            to_hex(&t.hash(HashAlgId::Sha256).unwrap()),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_md5_sha1_len() {
        let mut t = HandshakeTranscript::new();
        t.update(b"abc");
        let h = t.md5_sha1().unwrap();
        assert_eq!(h.len(), 36);
        assert_eq!(to_hex(&h[..16]), "900150983cd24fb0d6963f7d28e17f72");
    }
}
