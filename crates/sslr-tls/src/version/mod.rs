//! Version-dependent behaviour: key schedule, Finished hash, record MAC
//! construction, handshake action tables and alert translation.
//!
//! TLS 1.1 shares the TLS 1.0 PRF and Finished hash; it only differs in the
//! record layer (explicit IVs) and in alert translation.

use sslr_crypto::cipher::new_cipher;
use sslr_types::{HashAlgId, TlsError};
use zeroize::Zeroize;

use crate::alert::AlertDescription;
use crate::crypt::transcript::HandshakeTranscript;
use crate::crypt::{prf, ssl3, CipherSuiteParams};
use crate::handshake::actions::{ActionQueue, ActionStatus, MessageTag, PostAction};
use crate::handshake::HandshakeType;
use crate::record::cipher_state::{CipherState, RecordMac};
use crate::ProtocolVersion;

const MASTER_SECRET_LEN: usize = 48;
const TLS_FINISHED_LEN: usize = 12;
const SSL3_FINISHED_LEN: usize = 36;

/// Per-direction key material sliced from the key block.
pub struct KeyMaterial {
    pub client_mac_secret: Vec<u8>,
    pub server_mac_secret: Vec<u8>,
    pub client_key: Vec<u8>,
    pub server_key: Vec<u8>,
    pub client_iv: Vec<u8>,
    pub server_iv: Vec<u8>,
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.client_mac_secret.zeroize();
        self.server_mac_secret.zeroize();
        self.client_key.zeroize();
        self.server_key.zeroize();
        self.client_iv.zeroize();
        self.server_iv.zeroize();
    }
}

/// Message-dependent parts of the client's second flight.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlightOptions {
    /// The server sent CertificateRequest.
    pub certificate_requested: bool,
    /// NPN was negotiated.
    pub next_protocol: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionPolicy {
    Ssl30,
    /// TLS 1.0 and, with `explicit_iv`, TLS 1.1.
    Tls10 { explicit_iv: bool },
    Tls12,
}

fn hs(t: HandshakeType) -> MessageTag {
    MessageTag::Handshake(t)
}

impl VersionPolicy {
    pub fn for_version(version: ProtocolVersion) -> Self {
        match version {
            ProtocolVersion::Ssl30 => VersionPolicy::Ssl30,
            ProtocolVersion::Tls10 => VersionPolicy::Tls10 { explicit_iv: false },
            ProtocolVersion::Tls11 => VersionPolicy::Tls10 { explicit_iv: true },
            ProtocolVersion::Tls12 => VersionPolicy::Tls12,
        }
    }

    pub fn version(self) -> ProtocolVersion {
        match self {
            VersionPolicy::Ssl30 => ProtocolVersion::Ssl30,
            VersionPolicy::Tls10 { explicit_iv: false } => ProtocolVersion::Tls10,
            VersionPolicy::Tls10 { explicit_iv: true } => ProtocolVersion::Tls11,
            VersionPolicy::Tls12 => ProtocolVersion::Tls12,
        }
    }

    /// SSL 3.0 has no hello extensions.
    pub fn supports_extensions(self) -> bool {
        self != VersionPolicy::Ssl30
    }

    fn prf(self, secret: &[u8], label: &str, seed: &[u8], len: usize) -> Result<Vec<u8>, TlsError> {
        match self {
            VersionPolicy::Tls12 => prf::prf_tls12(secret, label, seed, len),
            _ => prf::prf_tls10(secret, label, seed, len),
        }
    }

    pub fn calculate_master_secret(
        self,
        pre_master: &[u8],
        client_random: &[u8; 32],
        server_random: &[u8; 32],
    ) -> Result<Vec<u8>, TlsError> {
        if self == VersionPolicy::Ssl30 {
            return ssl3::master_secret(pre_master, client_random, server_random);
        }
        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(client_random);
        seed.extend_from_slice(server_random);
        self.prf(pre_master, "master secret", &seed, MASTER_SECRET_LEN)
    }

    /// Expand the master secret and slice it: MAC secrets, keys, IVs.
    pub fn calculate_keys(
        self,
        master: &[u8],
        client_random: &[u8; 32],
        server_random: &[u8; 32],
        params: &CipherSuiteParams,
    ) -> Result<KeyMaterial, TlsError> {
        let version = self.version();
        let len = params.key_block_len(version);
        let mut block = if self == VersionPolicy::Ssl30 {
            ssl3::key_block(master, server_random, client_random, len)?
        } else {
            let mut seed = Vec::with_capacity(64);
            seed.extend_from_slice(server_random);
            seed.extend_from_slice(client_random);
            self.prf(master, "key expansion", &seed, len)?
        };

        let mac = params.mac_len();
        let key = params.key_len();
        let iv = params.fixed_iv_len(version);
        let mut pos = 0;
        let mut take = |n: usize| {
            let v = block[pos..pos + n].to_vec();
            pos += n;
            v
        };
        let material = KeyMaterial {
            client_mac_secret: take(mac),
            server_mac_secret: take(mac),
            client_key: take(key),
            server_key: take(key),
            client_iv: take(iv),
            server_iv: take(iv),
        };
        block.zeroize();
        Ok(material)
    }

    pub fn finished_len(self) -> usize {
        match self {
            VersionPolicy::Ssl30 => SSL3_FINISHED_LEN,
            _ => TLS_FINISHED_LEN,
        }
    }

    /// verify_data over the transcript so far, from `is_client`'s side.
    pub fn finished_message(
        self,
        master: &[u8],
        transcript: &HandshakeTranscript,
        is_client: bool,
    ) -> Result<Vec<u8>, TlsError> {
        let label = if is_client {
            "client finished"
        } else {
            "server finished"
        };
        match self {
            VersionPolicy::Ssl30 => ssl3::finished(transcript.messages(), master, is_client),
            VersionPolicy::Tls10 { .. } => {
                self.prf(master, label, &transcript.md5_sha1()?, TLS_FINISHED_LEN)
            }
            VersionPolicy::Tls12 => self.prf(
                master,
                label,
                &transcript.hash(HashAlgId::Sha256)?,
                TLS_FINISHED_LEN,
            ),
        }
    }

    pub fn record_mac(self, hash: HashAlgId) -> RecordMac {
        match self {
            VersionPolicy::Ssl30 => RecordMac::Ssl3(hash),
            _ => RecordMac::Hmac(hash),
        }
    }

    /// A keyed cipher state for one direction of `params`.
    pub fn cipher_state(
        self,
        params: &CipherSuiteParams,
        mac_secret: &[u8],
        key: &[u8],
        iv: &[u8],
    ) -> Result<CipherState, TlsError> {
        let mut state = CipherState::new();
        state.configure(new_cipher(params.cipher)?, self.record_mac(params.mac));
        state.load_secret(mac_secret)?;
        state.load_key_iv(key, iv)?;
        Ok(state)
    }

    /// Normalise an alert for this version. `None` means no legal alert
    /// exists and the connection must simply close.
    pub fn translate_alert(self, desc: AlertDescription) -> Option<AlertDescription> {
        use AlertDescription::*;
        match self {
            VersionPolicy::Ssl30 => match desc {
                CloseNotify | UnexpectedMessage | BadRecordMac | DecompressionFailure
                | HandshakeFailure | NoCertificate | BadCertificate | UnsupportedCertificate
                | CertificateRevoked | CertificateExpired | CertificateUnknown
                | IllegalParameter => Some(desc),
                DecryptionFailed | RecordOverflow => Some(BadRecordMac),
                DecodeError => Some(IllegalParameter),
                NoRenegotiation => None,
                _ => Some(HandshakeFailure),
            },
            VersionPolicy::Tls10 { explicit_iv } => match desc {
                NoCertificate => Some(HandshakeFailure),
                DecryptionFailed if explicit_iv => Some(BadRecordMac),
                _ => Some(desc),
            },
            VersionPolicy::Tls12 => match desc {
                NoCertificate => Some(HandshakeFailure),
                DecryptionFailed => Some(BadRecordMac),
                _ => Some(desc),
            },
        }
    }

    // -----------------------------------------------------------------
    // Handshake action tables
    // -----------------------------------------------------------------

    /// After ClientHello: the ServerHello must come next. HelloRequest is
    /// ignored for the whole negotiation.
    pub fn seed_hello(self, recv: &mut ActionQueue) {
        recv.clear();
        recv.push(
            hs(HandshakeType::HelloRequest),
            ActionStatus::Ignore,
            PostAction::None,
        );
        recv.push(
            hs(HandshakeType::ServerHello),
            ActionStatus::MustReceive,
            PostAction::None,
        );
    }

    /// Server's first flight of a full handshake.
    pub fn seed_server_flight(self, recv: &mut ActionQueue, status_request: bool) {
        recv.push(
            hs(HandshakeType::Certificate),
            ActionStatus::MustReceive,
            PostAction::None,
        );
        if status_request && self.supports_extensions() {
            recv.push(
                hs(HandshakeType::CertificateStatus),
                ActionStatus::Expect,
                PostAction::None,
            );
        }
        recv.push(
            hs(HandshakeType::ServerKeyExchange),
            ActionStatus::Expect,
            PostAction::None,
        );
        recv.push(
            hs(HandshakeType::CertificateRequest),
            ActionStatus::Expect,
            PostAction::None,
        );
        recv.push(
            hs(HandshakeType::ServerHelloDone),
            ActionStatus::MustReceive,
            PostAction::None,
        );
    }

    /// After ServerHelloDone: the client's key exchange flight, then the
    /// server's ChangeCipherSpec and Finished.
    pub fn seed_client_flight(self, send: &mut ActionQueue, recv: &mut ActionQueue, opts: FlightOptions) {
        send.clear();
        // SSL 3.0 answers a certificate request with a no_certificate alert.
        if opts.certificate_requested && self.supports_extensions() {
            send.push(
                hs(HandshakeType::Certificate),
                ActionStatus::WillSend,
                PostAction::None,
            );
        }
        send.push(
            hs(HandshakeType::ClientKeyExchange),
            ActionStatus::WillSend,
            PostAction::None,
        );
        send.push(
            MessageTag::ChangeCipherSpec,
            ActionStatus::WillSend,
            PostAction::ActivateWrite,
        );
        if opts.next_protocol && self.supports_extensions() {
            send.push(
                hs(HandshakeType::NextProtocol),
                ActionStatus::WillSend,
                PostAction::None,
            );
        }
        send.push(
            hs(HandshakeType::Finished),
            ActionStatus::WillSend,
            PostAction::None,
        );

        recv.push(
            MessageTag::ChangeCipherSpec,
            ActionStatus::MustReceive,
            PostAction::ActivateRead,
        );
        recv.push(
            hs(HandshakeType::Finished),
            ActionStatus::MustReceive,
            PostAction::Complete,
        );
    }

    /// Abbreviated handshake: the server's ChangeCipherSpec and Finished
    /// arrive first; the client's answer stays blocked until then.
    pub fn seed_resumed(self, send: &mut ActionQueue, recv: &mut ActionQueue, next_protocol: bool) {
        send.clear();
        recv.push(
            MessageTag::ChangeCipherSpec,
            ActionStatus::MustReceive,
            PostAction::ActivateRead,
        );
        recv.push(
            hs(HandshakeType::Finished),
            ActionStatus::MustReceive,
            PostAction::UnblockSends,
        );
        send.push(
            MessageTag::ChangeCipherSpec,
            ActionStatus::Block,
            PostAction::ActivateWrite,
        );
        if next_protocol && self.supports_extensions() {
            send.push(
                hs(HandshakeType::NextProtocol),
                ActionStatus::Block,
                PostAction::None,
            );
        }
        send.push(
            hs(HandshakeType::Finished),
            ActionStatus::Block,
            PostAction::Complete,
        );
    }
}
