//! Integration tests for sslr.
//! Cross-crate record round trips over every (version, suite) pair.

#[cfg(test)]
mod tests {
    use sslr_crypto::hmac::Hmac;
    use sslr_tls::connection_state::ConnectionState;
    use sslr_tls::crypt::CipherSuiteParams;
    use sslr_tls::record::layer::RecordFramer;
    use sslr_tls::record::{ContentType, Record, MAX_PLAINTEXT_LENGTH};
    use sslr_tls::version::VersionPolicy;
    use sslr_tls::{CipherSuite, ProtocolVersion};
    use sslr_types::{HashAlgId, TlsError};

    const CLIENT_RANDOM: [u8; 32] = [0x0c; 32];
    const SERVER_RANDOM: [u8; 32] = [0x5e; 32];

    fn pairs() -> Vec<(ProtocolVersion, CipherSuiteParams)> {
        let mut out = Vec::new();
        for version in ProtocolVersion::ALL {
            for params in CipherSuiteParams::all() {
                if params.supports_version(version) {
                    out.push((version, *params));
                }
            }
        }
        out
    }

    fn keyed(
        version: ProtocolVersion,
        params: CipherSuiteParams,
        master: &[u8],
        is_client: bool,
    ) -> ConnectionState {
        let mut s = ConnectionState::new();
        s.client_random = CLIENT_RANDOM;
        s.server_random = SERVER_RANDOM;
        s.version = Some(version);
        s.suite = Some(params);
        s.set_master_secret(master.to_vec());
        s.calculate_keys(is_client).unwrap();
        s
    }

    /// Push `wire` through a framer in `chunk`-sized reads.
    fn frame_all(wire: &[u8], chunk: usize) -> Vec<Record> {
        let mut framer = RecordFramer::new();
        let mut records = Vec::new();
        for piece in wire.chunks(chunk) {
            let mut rest = piece;
            while !rest.is_empty() {
                let (used, record) = framer.feed(rest).unwrap();
                rest = &rest[used..];
                records.extend(record);
            }
        }
        assert!(framer.is_idle());
        records
    }

    // -------------------------------------------------------
    // 1. Every pair: both directions, lockstep sequence numbers
    // -------------------------------------------------------
    #[test]
    fn test_every_version_suite_pair_round_trips() {
        let sizes = [0usize, 1, 15, 16, 17, 255, 1000, MAX_PLAINTEXT_LENGTH];
        let all = pairs();
        // 4 versions; NULL, RC4, 3DES and AES-SHA run everywhere, SHA256 only on 1.2.
        assert_eq!(all.len(), 4 * 7 + 2);

        for (version, params) in all {
            let master = vec![0x42; 48];
            let mut client = keyed(version, params, &master, true);
            let mut server = keyed(version, params, &master, false);

            let mut wire = Vec::new();
            for (i, size) in sizes.iter().enumerate() {
                let payload = vec![i as u8; *size];
                let rec = Record::new(ContentType::ApplicationData, version.wire(), payload);
                wire.extend(rec.encrypt(client.write_state_mut().unwrap()).unwrap().to_bytes());
            }

            let records = frame_all(&wire, 1000);
            assert_eq!(records.len(), sizes.len(), "{version} {}", params.name);
            for (i, (record, size)) in records.iter().zip(sizes).enumerate() {
                let opened = record.decrypt(server.read_state_mut().unwrap()).unwrap();
                assert_eq!(opened.fragment, vec![i as u8; size], "{version} {}", params.name);
            }
            assert_eq!(
                client.write_state_mut().unwrap().sequence_number(),
                sizes.len() as u64
            );
            assert_eq!(
                server.read_state_mut().unwrap().sequence_number(),
                sizes.len() as u64
            );

            // And back again.
            let reply = Record::new(ContentType::Handshake, version.wire(), b"reply".to_vec());
            let sealed = reply.encrypt(server.write_state_mut().unwrap()).unwrap();
            let opened = sealed.decrypt(client.read_state_mut().unwrap()).unwrap();
            assert_eq!(opened.fragment, b"reply");
            assert_eq!(opened.content_type, ContentType::Handshake);
        }
    }

    // -------------------------------------------------------
    // 2. Records framed byte by byte
    // -------------------------------------------------------
    #[test]
    fn test_single_byte_reads() {
        let params = CipherSuiteParams::from_suite(CipherSuite::RSA_WITH_AES_128_CBC_SHA).unwrap();
        let master = vec![7; 48];
        let mut client = keyed(ProtocolVersion::Tls11, params, &master, true);
        let mut server = keyed(ProtocolVersion::Tls11, params, &master, false);

        let mut wire = Vec::new();
        for word in [&b"alpha"[..], &b"beta"[..], &b"gamma"[..]] {
            let rec = Record::new(ContentType::ApplicationData, 0x0302, word.to_vec());
            wire.extend(rec.encrypt(client.write_state_mut().unwrap()).unwrap().to_bytes());
        }
        let got: Vec<Vec<u8>> = frame_all(&wire, 1)
            .iter()
            .map(|r| r.decrypt(server.read_state_mut().unwrap()).unwrap().fragment)
            .collect();
        assert_eq!(got, vec![b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()]);
    }

    // -------------------------------------------------------
    // 3. NULL-SHA MAC matches an independent HMAC
    // -------------------------------------------------------
    #[test]
    fn test_null_sha_mac_matches_hmac() {
        let params = CipherSuiteParams::from_suite(CipherSuite::RSA_WITH_NULL_SHA).unwrap();
        let master = vec![0x99; 48];
        let keys = VersionPolicy::for_version(ProtocolVersion::Tls10)
            .calculate_keys(&master, &CLIENT_RANDOM, &SERVER_RANDOM, &params)
            .unwrap();
        let mut client = keyed(ProtocolVersion::Tls10, params, &master, true);

        for seq in 0u64..3 {
            let data = format!("record {seq}").into_bytes();
            let rec = Record::new(ContentType::ApplicationData, 0x0301, data.clone());
            let sealed = rec.encrypt(client.write_state_mut().unwrap()).unwrap();
            assert_eq!(&sealed.fragment[..data.len()], &data[..]);

            let mut input = Vec::new();
            input.extend_from_slice(&seq.to_be_bytes());
            input.push(ContentType::ApplicationData as u8);
            input.extend_from_slice(&[3, 1]);
            input.extend_from_slice(&(data.len() as u16).to_be_bytes());
            input.extend_from_slice(&data);
            let expected = Hmac::mac(HashAlgId::Sha1, &keys.client_mac_secret, &input).unwrap();
            assert_eq!(&sealed.fragment[data.len()..], &expected[..]);
        }
    }

    // -------------------------------------------------------
    // 4. Key block slicing per pair
    // -------------------------------------------------------
    #[test]
    fn test_key_material_lengths() {
        for (version, params) in pairs() {
            let keys = VersionPolicy::for_version(version)
                .calculate_keys(&[1; 48], &CLIENT_RANDOM, &SERVER_RANDOM, &params)
                .unwrap();
            assert_eq!(keys.client_mac_secret.len(), params.mac_len());
            assert_eq!(keys.server_key.len(), params.key_len());
            assert_eq!(keys.client_iv.len(), params.fixed_iv_len(version));
            if version >= ProtocolVersion::Tls11 {
                assert!(keys.client_iv.is_empty(), "{version} {}", params.name);
            }
            let total = 2 * (params.mac_len() + params.key_len() + params.fixed_iv_len(version));
            assert_eq!(total, params.key_block_len(version));
        }
    }

    // -------------------------------------------------------
    // 5. Mismatched keys and cross-version replays are rejected
    // -------------------------------------------------------
    #[test]
    fn test_wrong_keys_give_bad_record_mac() {
        for (version, params) in pairs() {
            let mut client = keyed(version, params, &[1; 48], true);
            let mut server = keyed(version, params, &[2; 48], false);
            let rec = Record::new(ContentType::ApplicationData, version.wire(), vec![0xAB; 64]);
            let sealed = rec.encrypt(client.write_state_mut().unwrap()).unwrap();
            assert!(
                matches!(
                    sealed.decrypt(server.read_state_mut().unwrap()),
                    Err(TlsError::BadRecordMac)
                ),
                "{version} {}",
                params.name
            );
        }
    }

    #[test]
    fn test_replayed_record_fails_on_sequence() {
        let params = CipherSuiteParams::from_suite(CipherSuite::RSA_WITH_RC4_128_SHA).unwrap();
        let master = vec![3; 48];
        let mut client = keyed(ProtocolVersion::Tls12, params, &master, true);
        let mut server = keyed(ProtocolVersion::Tls12, params, &master, false);

        let rec = Record::new(ContentType::ApplicationData, 0x0303, b"once".to_vec());
        let sealed = rec.encrypt(client.write_state_mut().unwrap()).unwrap();
        let wire = sealed.to_bytes();
        let (parsed, used) = Record::parse(&wire).unwrap();
        assert_eq!(used, wire.len());
        assert_eq!(
            parsed.decrypt(server.read_state_mut().unwrap()).unwrap().fragment,
            b"once"
        );
        assert!(matches!(
            parsed.decrypt(server.read_state_mut().unwrap()),
            Err(TlsError::BadRecordMac)
        ));
    }

    // -------------------------------------------------------
    // 6. Master secret agreement across versions
    // -------------------------------------------------------
    #[test]
    fn test_master_secret_is_version_specific() {
        let premaster = [0x33u8; 48];
        let secrets: Vec<Vec<u8>> = ProtocolVersion::ALL
            .iter()
            .map(|v| {
                VersionPolicy::for_version(*v)
                    .calculate_master_secret(&premaster, &CLIENT_RANDOM, &SERVER_RANDOM)
                    .unwrap()
            })
            .collect();
        for s in &secrets {
            assert_eq!(s.len(), 48);
        }
        // TLS 1.0 and 1.1 share a PRF.
        assert_eq!(secrets[1], secrets[2]);
        assert_ne!(secrets[0], secrets[1]);
        assert_ne!(secrets[2], secrets[3]);
    }
}
