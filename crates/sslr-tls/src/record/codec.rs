//! Record protection: MAC-then-encrypt with CBC or stream ciphers.
//!
//! CBC fragment = [explicit IV] || E(payload || MAC || padding), where every
//! padding byte, including the final length byte, equals `padding_total - 1`.
//!
//! The decrypt path is hardened against Lucky Thirteen: after the length
//! precheck, the padding scan, the MAC computation and the MAC comparison
//! run the same amount of work for every padding value a record of a given
//! length can carry. The dummy loops below are load-bearing and must not be
//! optimised away; `tests::test_lucky13_*` pin their work counts.

use super::cipher_state::{CipherState, DecryptWork};
use super::{Record, MAX_CIPHERTEXT_LENGTH, MAX_PLAINTEXT_LENGTH};
use sslr_types::{CryptoError, TlsError};
use subtle::{
    Choice, ConditionallySelectable, ConstantTimeEq, ConstantTimeGreater, ConstantTimeLess,
};

/// First wire version (TLS 1.1) that carries an explicit per-record IV.
const EXPLICIT_IV_VERSION: u16 = 0x0302;

/// seq(8) || type(1) || version(2) || length(2)
const MAC_HEADER_LEN: usize = 13;
const HASH_BLOCK: usize = 64;

/// Rounds of the padding scan; covers the largest possible padding.
const PADDING_SCAN_ROUNDS: u32 = 256;

/// Upper bound (inclusive) of the random extra compressions per record.
const MAX_JITTER_BLOCKS: usize = 3;

fn has_explicit_iv(block_size: usize, version: u16) -> bool {
    block_size > 1 && version >= EXPLICIT_IV_VERSION
}

fn hash_blocks(len: usize) -> usize {
    len.div_ceil(HASH_BLOCK)
}

fn random_bytes(buf: &mut [u8]) -> Result<(), TlsError> {
    getrandom::getrandom(buf).map_err(|_| TlsError::CryptoError(CryptoError::RandomFailed))
}

/// Smallest acceptable protected fragment for this cipher state.
pub fn min_ciphertext_len(block_size: usize, mac_size: usize, explicit_iv: bool) -> usize {
    if block_size > 1 {
        let base = block_size.max(mac_size + 1);
        if explicit_iv {
            base + block_size
        } else {
            base
        }
    } else {
        mac_size
    }
}

/// Constant-time padding scan over the decrypted fragment (IV removed).
///
/// Returns the padding total (length byte included) and whether it is
/// valid. On failure the padding is treated as empty so the MAC is still
/// computed over a record-length-dependent amount of data.
fn check_padding(plain: &[u8], mac_size: usize, block_size: usize, ssl3: bool) -> (usize, Choice) {
    let len = plain.len() as u32;
    let pad = u32::from(plain[plain.len() - 1]);

    // mac + pad + 1 <= len
    let mut good = !(mac_size as u32 + pad + 1).ct_gt(&len);
    if ssl3 {
        // SSL 3.0 padding content is arbitrary; only its length is bounded.
        good &= pad.ct_lt(&(block_size as u32));
    }

    let mut mismatch = 0u8;
    for i in 1..=PADDING_SCAN_ROUNDS {
        let in_range = i.ct_lt(&len);
        let covered = !i.ct_gt(&pad) & in_range;
        let idx = (len - 1).saturating_sub(i) as usize;
        let diff = plain[idx] ^ pad as u8;
        mismatch |= u8::conditional_select(&0, &diff, covered);
    }
    if !ssl3 {
        good &= mismatch.ct_eq(&0);
    }

    let total = u32::conditional_select(&0, &(pad + 1), good);
    (total as usize, good)
}

impl Record {
    /// Protect this plaintext record under `state`.
    ///
    /// The sequence number advances only when the whole operation succeeds.
    pub fn encrypt(&self, state: &mut CipherState) -> Result<Record, TlsError> {
        let block_size = state.block_size();
        if block_size == 0 {
            return Err(TlsError::InternalError("no cipher configured".into()));
        }
        if self.fragment.len() > MAX_PLAINTEXT_LENGTH {
            return Err(TlsError::RecordOverflow);
        }
        let explicit_iv = has_explicit_iv(block_size, self.version);
        let mac = state.calculate_record_mac(
            state.sequence_number(),
            self.version,
            self.content_type as u8,
            &self.fragment,
        )?;

        let mut buf =
            Vec::with_capacity(2 * block_size + self.fragment.len() + mac.len());
        if explicit_iv {
            buf.resize(block_size, 0);
            random_bytes(&mut buf)?;
        }
        buf.extend_from_slice(&self.fragment);
        buf.extend_from_slice(&mac);
        if block_size > 1 {
            // Always 1..=block_size bytes, never zero.
            let total = block_size - buf.len() % block_size;
            buf.resize(buf.len() + total, (total - 1) as u8);
        }

        state.cipher_mut()?.encrypt_vector(&mut buf)?;
        state.advance_sequence()?;
        Ok(Record::new(self.content_type, self.version, buf))
    }

    /// Verify and strip protection from this record.
    ///
    /// A fragment that fails the length precheck is rejected with
    /// `DecryptionFailed` before the cipher is touched and without consuming
    /// a sequence number. Every later failure is reported as `BadRecordMac`
    /// and still consumes one.
    pub fn decrypt(&self, state: &mut CipherState) -> Result<Record, TlsError> {
        let block_size = state.block_size();
        if block_size == 0 {
            return Err(TlsError::InternalError("no cipher configured".into()));
        }
        let mac_size = state.mac_size();
        let len = self.fragment.len();
        if len > MAX_CIPHERTEXT_LENGTH {
            return Err(TlsError::RecordOverflow);
        }
        let explicit_iv = has_explicit_iv(block_size, self.version);
        if len < min_ciphertext_len(block_size, mac_size, explicit_iv)
            || (block_size > 1 && len % block_size != 0)
        {
            return Err(TlsError::DecryptionFailed);
        }

        let mut buf = self.fragment.clone();
        state.cipher_mut()?.decrypt_vector(&mut buf)?;
        let plain = if explicit_iv {
            &buf[block_size..]
        } else {
            &buf[..]
        };
        let orig_len = plain.len();

        let ssl3 = self.version < 0x0301;
        let (padding_total, padding_ok, rounds) = if block_size > 1 {
            let (total, ok) = check_padding(plain, mac_size, block_size, ssl3);
            (total, ok, PADDING_SCAN_ROUNDS as usize)
        } else {
            (0, Choice::from(1), 0)
        };

        // The precheck guarantees orig_len >= mac_size; keep the arithmetic
        // total anyway and fail through the MAC path if it ever is not.
        let (content_len, mac_present) = match orig_len.checked_sub(padding_total + mac_size) {
            Some(n) => (n, Choice::from(1)),
            None => (orig_len.saturating_sub(padding_total), Choice::from(0)),
        };
        let content = &plain[..content_len];
        let received_mac = if mac_present.unwrap_u8() == 1 {
            &plain[content_len..content_len + mac_size]
        } else {
            &plain[..0]
        };

        let computed = state.calculate_record_mac(
            state.sequence_number(),
            self.version,
            self.content_type as u8,
            content,
        )?;

        // Pad the MAC work up to what the longest content of this record
        // length would have cost, then add a little random noise.
        let full_blocks = hash_blocks(MAC_HEADER_LEN + orig_len.saturating_sub(mac_size));
        let mac_blocks = hash_blocks(MAC_HEADER_LEN + content_len);
        let dummy_blocks = full_blocks.saturating_sub(mac_blocks);
        let mut jitter = [0u8; 1];
        random_bytes(&mut jitter)?;
        let jitter_blocks = jitter[0] as usize % (MAX_JITTER_BLOCKS + 1);
        state.burn_mac_blocks(dummy_blocks + jitter_blocks)?;
        state.last_decrypt_work = DecryptWork {
            padding_check_rounds: rounds,
            mac_blocks,
            dummy_blocks,
            jitter_blocks,
        };

        let mac_ok = if computed.len() == received_mac.len() {
            computed.as_slice().ct_eq(received_mac)
        } else {
            Choice::from(0)
        };
        state.advance_sequence()?;

        if (padding_ok & mac_ok & mac_present).unwrap_u8() != 1 {
            return Err(TlsError::BadRecordMac);
        }
        if content_len > MAX_PLAINTEXT_LENGTH {
            return Err(TlsError::RecordOverflow);
        }
        Ok(Record::new(self.content_type, self.version, content.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::cipher_state::RecordMac;
    use crate::record::ContentType;
    use sslr_crypto::cipher::{new_cipher, Aes128Cbc};
    use sslr_crypto::SymmetricCipher;
    use sslr_types::{CipherAlgId, HashAlgId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const KEY: [u8; 16] = [0x11; 16];
    const IV: [u8; 16] = [0x22; 16];
    const MAC_KEY: [u8; 20] = [0x33; 20];

    fn aes_sha1_state() -> CipherState {
        let mut s = CipherState::new();
        s.configure(
            new_cipher(CipherAlgId::Aes128Cbc).unwrap(),
            RecordMac::Hmac(HashAlgId::Sha1),
        );
        s.load_secret(&MAC_KEY).unwrap();
        s.load_key_iv(&KEY, &IV).unwrap();
        s
    }

    fn state_for(alg: CipherAlgId, mac: RecordMac, key: &[u8], iv: &[u8]) -> CipherState {
        let mut s = CipherState::new();
        s.configure(new_cipher(alg).unwrap(), mac);
        s.load_secret(&[0x5a; 20]).unwrap();
        s.load_key_iv(key, iv).unwrap();
        s
    }

    /// Encrypt a hand-built plaintext (content || mac || padding) with the
    /// raw CBC cipher, bypassing the record encoder.
    fn seal_raw(plaintext: &[u8]) -> Vec<u8> {
        let mut c = Aes128Cbc::new();
        c.load_key(&KEY).unwrap();
        c.load_iv(&IV).unwrap();
        let mut buf = plaintext.to_vec();
        c.encrypt_vector(&mut buf).unwrap();
        buf
    }

    fn mac_for(content: &[u8]) -> Vec<u8> {
        aes_sha1_state()
            .calculate_record_mac(0, 0x0301, ContentType::ApplicationData as u8, content)
            .unwrap()
    }

    struct CountingCipher {
        calls: Arc<AtomicUsize>,
    }

    impl SymmetricCipher for CountingCipher {
        fn block_size(&self) -> usize {
            16
        }
        fn key_size(&self) -> usize {
            16
        }
        fn iv_size(&self) -> usize {
            16
        }
        fn load_key(&mut self, _key: &[u8]) -> Result<(), CryptoError> {
            Ok(())
        }
        fn load_iv(&mut self, _iv: &[u8]) -> Result<(), CryptoError> {
            Ok(())
        }
        fn encrypt_vector(&mut self, _data: &mut [u8]) -> Result<(), CryptoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn decrypt_vector(&mut self, _data: &mut [u8]) -> Result<(), CryptoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_roundtrip_every_cipher_and_version() {
        let cases = [
            (CipherAlgId::Aes128Cbc, 16, 16),
            (CipherAlgId::Aes256Cbc, 32, 16),
            (CipherAlgId::TripleDesEdeCbc, 24, 8),
            (CipherAlgId::Rc4_128, 16, 0),
            (CipherAlgId::Null, 0, 0),
        ];
        for (alg, key_len, iv_len) in cases {
            for version in [0x0300u16, 0x0301, 0x0302, 0x0303] {
                let mac = if version == 0x0300 {
                    RecordMac::Ssl3(HashAlgId::Sha1)
                } else {
                    RecordMac::Hmac(HashAlgId::Sha1)
                };
                let key = vec![7u8; key_len];
                let iv = vec![9u8; iv_len];
                let mut tx = state_for(alg, mac, &key, &iv);
                let mut rx = state_for(alg, mac, &key, &iv);
                for (i, len) in [0usize, 1, 15, 16, 17, 300].into_iter().enumerate() {
                    let payload: Vec<u8> = (0..len).map(|b| b as u8).collect();
                    let rec = Record::new(ContentType::ApplicationData, version, payload.clone());
                    let sealed = rec.encrypt(&mut tx).unwrap();
                    let opened = sealed.decrypt(&mut rx).unwrap();
                    assert_eq!(opened.fragment, payload, "{alg:?} {version:#06x} len {len}");
                    assert_eq!(tx.sequence_number(), i as u64 + 1);
                    assert_eq!(rx.sequence_number(), tx.sequence_number());
                }
            }
        }
    }

    #[test]
    fn test_cbc_padding_layout() {
        let mut tx = aes_sha1_state();
        // 12 + 20 = 32 bytes -> a whole block of padding is added.
        let sealed = Record::new(ContentType::ApplicationData, 0x0301, vec![0u8; 12])
            .encrypt(&mut tx)
            .unwrap();
        assert_eq!(sealed.fragment.len(), 48);

        let mut rx = Aes128Cbc::new();
        rx.load_key(&KEY).unwrap();
        rx.load_iv(&IV).unwrap();
        let mut plain = sealed.fragment.clone();
        rx.decrypt_vector(&mut plain).unwrap();
        assert!(plain[32..].iter().all(|&b| b == 15));
    }

    #[test]
    fn test_explicit_iv_adds_one_block() {
        let mut tx = aes_sha1_state();
        let sealed = Record::new(ContentType::ApplicationData, 0x0302, vec![0u8; 12])
            .encrypt(&mut tx)
            .unwrap();
        assert_eq!(sealed.fragment.len(), 64);
        let sealed_again = Record::new(ContentType::ApplicationData, 0x0302, vec![0u8; 12])
            .encrypt(&mut tx)
            .unwrap();
        assert_ne!(sealed.fragment[..16], sealed_again.fragment[..16]);
    }

    #[test]
    fn test_no_cipher_is_internal_error() {
        let mut s = CipherState::new();
        let rec = Record::new(ContentType::ApplicationData, 0x0303, vec![1, 2, 3]);
        assert!(matches!(rec.encrypt(&mut s), Err(TlsError::InternalError(_))));
        assert!(matches!(rec.decrypt(&mut s), Err(TlsError::InternalError(_))));
        assert_eq!(s.sequence_number(), 0);
    }

    #[test]
    fn test_short_ciphertext_rejected_before_cipher_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut s = CipherState::new();
        s.configure(
            Box::new(CountingCipher {
                calls: calls.clone(),
            }),
            RecordMac::Hmac(HashAlgId::Sha1),
        );
        s.load_secret(&MAC_KEY).unwrap();

        // B = 16, M = 20: minimum is max(16, 21) = 21, so 32 after alignment;
        // with an explicit IV the minimum becomes 37.
        assert_eq!(min_ciphertext_len(16, 20, false), 21);
        assert_eq!(min_ciphertext_len(16, 20, true), 37);
        for (version, len) in [(0x0301u16, 16usize), (0x0302, 32), (0x0303, 16), (0x0301, 0)] {
            let rec = Record::new(ContentType::ApplicationData, version, vec![0u8; len]);
            assert!(matches!(rec.decrypt(&mut s), Err(TlsError::DecryptionFailed)));
        }
        // unaligned
        let rec = Record::new(ContentType::ApplicationData, 0x0301, vec![0u8; 33]);
        assert!(matches!(rec.decrypt(&mut s), Err(TlsError::DecryptionFailed)));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(s.sequence_number(), 0);
    }

    #[test]
    fn test_stream_minimum_is_mac_size() {
        let mut rx = state_for(
            CipherAlgId::Rc4_128,
            RecordMac::Hmac(HashAlgId::Md5),
            &[1u8; 16],
            &[],
        );
        let rec = Record::new(ContentType::ApplicationData, 0x0301, vec![0u8; 15]);
        assert!(matches!(rec.decrypt(&mut rx), Err(TlsError::DecryptionFailed)));
        assert_eq!(rx.sequence_number(), 0);
    }

    #[test]
    fn test_tampered_record_is_bad_mac_and_consumes_sequence() {
        let mut tx = aes_sha1_state();
        let mut rx = aes_sha1_state();
        let mut sealed = Record::new(ContentType::ApplicationData, 0x0301, vec![0x5a; 200])
            .encrypt(&mut tx)
            .unwrap();
        // 200 content + 20 MAC + 4 padding
        assert_eq!(sealed.fragment.len(), 224);
        sealed.fragment[0] ^= 1;
        assert!(matches!(sealed.decrypt(&mut rx), Err(TlsError::BadRecordMac)));
        assert_eq!(rx.sequence_number(), 1);

        let work = rx.last_decrypt_work();
        assert_eq!(work.padding_check_rounds, 256);
        assert_eq!(work.mac_blocks + work.dummy_blocks, (13 + 224 - 20usize).div_ceil(64));
        assert!(work.jitter_blocks <= MAX_JITTER_BLOCKS);
    }

    #[test]
    fn test_bad_padding_content_is_bad_mac() {
        // 10 content + 20 MAC + 2 padding; the length byte says 1 but the
        // padding byte before it is 0.
        let content = [0xabu8; 10];
        let mut pt = content.to_vec();
        pt.extend_from_slice(&mac_for(&content));
        pt.extend_from_slice(&[0x00, 0x01]);
        let mut rx = aes_sha1_state();
        let rec = Record::new(ContentType::ApplicationData, 0x0301, seal_raw(&pt));
        assert!(matches!(rec.decrypt(&mut rx), Err(TlsError::BadRecordMac)));

        // Same work as for a record whose padding checked out.
        let work = rx.last_decrypt_work();
        assert_eq!(work.padding_check_rounds, 256);
        assert_eq!(work.mac_blocks + work.dummy_blocks, (13 + pt.len() - 20).div_ceil(64));
        assert!(work.jitter_blocks <= MAX_JITTER_BLOCKS);
    }

    #[test]
    fn test_ssl3_padding_content_not_checked() {
        let mut tx = state_for(
            CipherAlgId::Aes128Cbc,
            RecordMac::Ssl3(HashAlgId::Sha1),
            &KEY,
            &IV,
        );
        let content = b"0123456789".to_vec();
        let mac = tx
            .calculate_record_mac(0, 0x0300, ContentType::ApplicationData as u8, &content)
            .unwrap();
        let mut pt = content.clone();
        pt.extend_from_slice(&mac);
        // two bytes of padding, the first one arbitrary
        pt.extend_from_slice(&[0xee, 0x01]);
        let mut rx = state_for(
            CipherAlgId::Aes128Cbc,
            RecordMac::Ssl3(HashAlgId::Sha1),
            &KEY,
            &IV,
        );
        let rec = Record::new(ContentType::ApplicationData, 0x0300, seal_raw(&pt));
        assert_eq!(rec.decrypt(&mut rx).unwrap().fragment, content);
    }

    /// Padding length byte so large that mac + pad + 1 exceeds the record:
    /// rejected, and the MAC work equals that of a record of the same length
    /// carrying the longest valid padding.
    #[test]
    fn test_lucky13_oversized_padding_costs_the_same() {
        // 256-byte record: the valid case carries 1 byte of content and
        // 235 bytes of padding.
        let content = [0x01u8];
        let mut valid = content.to_vec();
        valid.extend_from_slice(&mac_for(&content));
        valid.extend_from_slice(&[234u8; 235]);
        assert_eq!(valid.len(), 256);
        let mut rx = aes_sha1_state();
        let rec = Record::new(ContentType::ApplicationData, 0x0301, seal_raw(&valid));
        assert_eq!(rec.decrypt(&mut rx).unwrap().fragment, content);
        let valid_work = rx.last_decrypt_work();

        let mut invalid = vec![0u8; 255];
        invalid.push(255);
        let mut rx = aes_sha1_state();
        let rec = Record::new(ContentType::ApplicationData, 0x0301, seal_raw(&invalid));
        assert!(matches!(rec.decrypt(&mut rx), Err(TlsError::BadRecordMac)));
        let invalid_work = rx.last_decrypt_work();

        assert_eq!(valid_work.padding_check_rounds, 256);
        assert_eq!(invalid_work.padding_check_rounds, 256);
        assert_eq!(valid_work.mac_blocks, 1);
        assert_eq!(valid_work.dummy_blocks, 3);
        assert_eq!(invalid_work.mac_blocks, 4);
        assert_eq!(invalid_work.dummy_blocks, 0);
        // ceil((13 + 256 - 20) / 64)
        assert_eq!(
            valid_work.mac_blocks + valid_work.dummy_blocks,
            invalid_work.mac_blocks + invalid_work.dummy_blocks
        );
        assert!(valid_work.jitter_blocks <= MAX_JITTER_BLOCKS);
    }

    #[test]
    fn test_lucky13_work_constant_across_padding_values() {
        // 160-byte records, padding totals from 1 to 140.
        let mut totals = Vec::new();
        for pad_total in [1usize, 16, 64, 100, 140] {
            let content_len = 160 - 20 - pad_total;
            let content = vec![0x61u8; content_len];
            let mut pt = content.clone();
            pt.extend_from_slice(&mac_for(&content));
            pt.extend(std::iter::repeat((pad_total - 1) as u8).take(pad_total));
            let mut rx = aes_sha1_state();
            let rec = Record::new(ContentType::ApplicationData, 0x0301, seal_raw(&pt));
            assert_eq!(rec.decrypt(&mut rx).unwrap().fragment, content);
            let w = rx.last_decrypt_work();
            assert_eq!(w.mac_blocks, (13 + content_len).div_ceil(64));
            totals.push(w.mac_blocks + w.dummy_blocks);
        }
        // ceil((13 + 160 - 20) / 64) = 3
        assert!(totals.iter().all(|&t| t == 3), "{totals:?}");
    }

    #[test]
    fn test_sequence_lockstep_over_many_records() {
        let mut tx = aes_sha1_state();
        let mut rx = aes_sha1_state();
        for n in 0..50u64 {
            let rec = Record::new(ContentType::Handshake, 0x0301, vec![n as u8; n as usize]);
            let opened = rec.encrypt(&mut tx).unwrap().decrypt(&mut rx).unwrap();
            assert_eq!(opened.fragment.len(), n as usize);
        }
        assert_eq!(tx.sequence_number(), 50);
        assert_eq!(rx.sequence_number(), 50);
    }

    #[test]
    fn test_oversized_plaintext_rejected() {
        let mut tx = aes_sha1_state();
        let rec = Record::new(
            ContentType::ApplicationData,
            0x0303,
            vec![0u8; MAX_PLAINTEXT_LENGTH + 1],
        );
        assert!(matches!(rec.encrypt(&mut tx), Err(TlsError::RecordOverflow)));
        assert_eq!(tx.sequence_number(), 0);
    }
}
