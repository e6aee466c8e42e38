//! The cryptographic context of one handshake attempt.
//!
//! A connection holds two of these: `current`, whose cipher states protect
//! live traffic, and `pending`, which is being negotiated. On
//! ChangeCipherSpec the pending cipher for that direction moves into the
//! current state.

use sslr_types::TlsError;
use zeroize::Zeroize;

use crate::crypt::transcript::HandshakeTranscript;
use crate::crypt::CipherSuiteParams;
use crate::handshake::key_exchange::KeyExchange;
use crate::record::cipher_state::CipherState;
use crate::session::SessionHandle;
use crate::version::VersionPolicy;
use crate::ProtocolVersion;

pub struct ConnectionState {
    pub client_random: [u8; 32],
    pub server_random: [u8; 32],
    master_secret: Vec<u8>,
    pub version: Option<ProtocolVersion>,
    pub suite: Option<CipherSuiteParams>,
    read: Option<CipherState>,
    write: Option<CipherState>,
    pub session: Option<SessionHandle>,
    pub key_exchange: Option<Box<dyn KeyExchange>>,
    pub transcript: HandshakeTranscript,
    pub peer_certificates: Vec<Vec<u8>>,
    pub ocsp_response: Option<Vec<u8>>,
    pub certificate_requested: bool,
    pub resumed: bool,
    /// Protocols the server advertised via NPN.
    pub server_protocols: Option<Vec<Vec<u8>>>,
    pub next_protocol: Option<Vec<u8>>,
    pub key_bits: u32,
    pub revocation_unknown: bool,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    /// A state with nothing negotiated and no cipher objects.
    pub fn new() -> Self {
        Self {
            client_random: [0; 32],
            server_random: [0; 32],
            master_secret: Vec::new(),
            version: None,
            suite: None,
            read: None,
            write: None,
            session: None,
            key_exchange: None,
            transcript: HandshakeTranscript::new(),
            peer_certificates: Vec::new(),
            ocsp_response: None,
            certificate_requested: false,
            resumed: false,
            server_protocols: None,
            next_protocol: None,
            key_bits: 0,
            revocation_unknown: false,
        }
    }

    /// The state a connection starts in: null cipher both ways.
    pub fn initial() -> Self {
        let mut s = Self::new();
        s.read = Some(CipherState::plaintext());
        s.write = Some(CipherState::plaintext());
        s
    }

    pub fn policy(&self) -> Result<VersionPolicy, TlsError> {
        self.version
            .map(VersionPolicy::for_version)
            .ok_or_else(|| TlsError::InternalError("protocol version not negotiated".into()))
    }

    pub fn suite_params(&self) -> Result<CipherSuiteParams, TlsError> {
        self.suite
            .ok_or_else(|| TlsError::InternalError("cipher suite not negotiated".into()))
    }

    pub fn master_secret(&self) -> &[u8] {
        &self.master_secret
    }

    pub fn set_master_secret(&mut self, secret: Vec<u8>) {
        self.master_secret.zeroize();
        self.master_secret = secret;
    }

    /// Derive the master secret from the key exchange's premaster.
    pub fn calculate_master_secret(&mut self) -> Result<(), TlsError> {
        let policy = self.policy()?;
        let kx = self
            .key_exchange
            .as_ref()
            .ok_or_else(|| TlsError::InternalError("no key exchange object".into()))?;
        let secret = policy.calculate_master_secret(
            kx.pre_master_secret()?,
            &self.client_random,
            &self.server_random,
        )?;
        self.set_master_secret(secret);
        Ok(())
    }

    /// Build both cipher states from the master secret. `is_client`
    /// selects which half of the key block is used for writing.
    pub fn calculate_keys(&mut self, is_client: bool) -> Result<(), TlsError> {
        if self.master_secret.is_empty() {
            return Err(TlsError::InternalError("master secret not set".into()));
        }
        let policy = self.policy()?;
        let params = self.suite_params()?;
        let keys = policy.calculate_keys(
            &self.master_secret,
            &self.client_random,
            &self.server_random,
            &params,
        )?;
        let client = policy.cipher_state(
            &params,
            &keys.client_mac_secret,
            &keys.client_key,
            &keys.client_iv,
        )?;
        let server = policy.cipher_state(
            &params,
            &keys.server_mac_secret,
            &keys.server_key,
            &keys.server_iv,
        )?;
        if is_client {
            self.write = Some(client);
            self.read = Some(server);
        } else {
            self.write = Some(server);
            self.read = Some(client);
        }
        Ok(())
    }

    pub fn take_read(&mut self) -> Result<CipherState, TlsError> {
        self.read
            .take()
            .ok_or_else(|| TlsError::InternalError("no pending read cipher".into()))
    }

    pub fn take_write(&mut self) -> Result<CipherState, TlsError> {
        self.write
            .take()
            .ok_or_else(|| TlsError::InternalError("no pending write cipher".into()))
    }

    pub fn install_read(&mut self, state: CipherState) {
        self.read = Some(state);
    }

    pub fn install_write(&mut self, state: CipherState) {
        self.write = Some(state);
    }

    pub fn read_state_mut(&mut self) -> Result<&mut CipherState, TlsError> {
        self.read
            .as_mut()
            .ok_or_else(|| TlsError::InternalError("no read cipher".into()))
    }

    pub fn write_state_mut(&mut self) -> Result<&mut CipherState, TlsError> {
        self.write
            .as_mut()
            .ok_or_else(|| TlsError::InternalError("no write cipher".into()))
    }

    /// Drop cipher objects, key exchange and the session reference.
    pub fn release(&mut self) {
        self.read = None;
        self.write = None;
        self.key_exchange = None;
        self.session = None;
        self.master_secret.zeroize();
        self.transcript.clear();
    }
}

impl Drop for ConnectionState {
    fn drop(&mut self) {
        self.master_secret.zeroize();
    }
}
