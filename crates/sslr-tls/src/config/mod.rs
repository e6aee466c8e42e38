//! Engine configuration with builder pattern.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sslr_types::TlsError;

use crate::cert_verify::CertificateHandler;
use crate::crypt::CipherSuiteParams;
use crate::record::layer::MIN_NETWORK_BUFFER_SIZE;
use crate::{CipherSuite, ProtocolVersion};

/// Encrypts the RSA premaster to the server: `(leaf_cert_der, premaster) -> exchange_keys`.
pub type PremasterEncryptor = Arc<dyn Fn(&[u8], &[u8]) -> Result<Vec<u8>, TlsError> + Send + Sync>;

/// Strict-transport (HSTS) evaluation: true when `host` must never be
/// reached over a downgraded protocol.
pub type StrictTransportCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Engine configuration.
#[derive(Clone)]
pub struct SslConfig {
    pub ssl3: bool,
    pub tls10: bool,
    pub tls11: bool,
    pub tls12: bool,
    /// Offered cipher suites, in preference order.
    pub cipher_suites: Vec<CipherSuite>,
    /// Read buffer and maximum outgoing fragment size.
    pub network_buffer_size: usize,
    /// 1/(n-1) split of application data on SSL 3.0 / TLS 1.0 CBC suites.
    pub record_splitting: bool,
    /// Coalesce handshake records into fewer transport writes.
    pub coalesce_handshake_records: bool,
    /// Records sealed per pipeline pass before yielding to the event loop.
    pub max_records_per_pass: usize,
    pub server_name: Option<String>,
    /// NPN protocols, in preference order.
    pub next_protocols: Vec<Vec<u8>>,
    pub request_certificate_status: bool,
    pub session_resumption: bool,
    pub allow_renegotiation: bool,
    pub allow_version_fallback: bool,
    /// How long to wait for a ServerHello before retrying with a lower version.
    pub server_hello_timeout: Option<Duration>,
    pub max_handshake_message_len: usize,
    pub certificate_handler: Option<CertificateHandler>,
    pub premaster_encryptor: Option<PremasterEncryptor>,
    pub strict_transport: Option<StrictTransportCheck>,
}

impl fmt::Debug for SslConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SslConfig")
            .field("enabled_versions", &self.enabled_versions())
            .field("cipher_suites", &self.cipher_suites)
            .field("network_buffer_size", &self.network_buffer_size)
            .field("server_name", &self.server_name)
            .field(
                "certificate_handler",
                &self.certificate_handler.as_ref().map(|_| "<callback>"),
            )
            .finish_non_exhaustive()
    }
}

impl SslConfig {
    pub fn builder() -> SslConfigBuilder {
        SslConfigBuilder::default()
    }

    pub fn is_enabled(&self, version: ProtocolVersion) -> bool {
        match version {
            ProtocolVersion::Ssl30 => self.ssl3,
            ProtocolVersion::Tls10 => self.tls10,
            ProtocolVersion::Tls11 => self.tls11,
            ProtocolVersion::Tls12 => self.tls12,
        }
    }

    /// Enabled versions, newest first.
    pub fn enabled_versions(&self) -> Vec<ProtocolVersion> {
        ProtocolVersion::ALL
            .into_iter()
            .filter(|v| self.is_enabled(*v))
            .collect()
    }

    pub fn max_enabled_version(&self) -> Option<ProtocolVersion> {
        self.enabled_versions().first().copied()
    }

    pub fn min_enabled_version(&self) -> Option<ProtocolVersion> {
        self.enabled_versions().last().copied()
    }

    /// Configured suites usable up to `max_version`, in preference order.
    pub fn suites_for(&self, max_version: ProtocolVersion) -> Vec<CipherSuite> {
        self.cipher_suites
            .iter()
            .copied()
            .filter(|s| {
                CipherSuiteParams::from_suite(*s)
                    .map(|p| p.min_version <= max_version)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Whether `host` is under a strict-transport policy.
    pub fn is_strict_transport(&self, host: &str) -> bool {
        self.strict_transport.as_ref().is_some_and(|f| f(host))
    }
}

/// Builder for `SslConfig`.
pub struct SslConfigBuilder {
    config: SslConfig,
}

impl Default for SslConfigBuilder {
    fn default() -> Self {
        Self {
            config: SslConfig {
                ssl3: false,
                tls10: true,
                tls11: true,
                tls12: true,
                cipher_suites: vec![
                    CipherSuite::RSA_WITH_AES_128_CBC_SHA256,
                    CipherSuite::RSA_WITH_AES_256_CBC_SHA256,
                    CipherSuite::RSA_WITH_AES_128_CBC_SHA,
                    CipherSuite::RSA_WITH_AES_256_CBC_SHA,
                    CipherSuite::RSA_WITH_3DES_EDE_CBC_SHA,
                    CipherSuite::RSA_WITH_RC4_128_SHA,
                    CipherSuite::RSA_WITH_RC4_128_MD5,
                ],
                network_buffer_size: 16 * 1024,
                record_splitting: true,
                coalesce_handshake_records: true,
                max_records_per_pass: 16,
                server_name: None,
                next_protocols: Vec::new(),
                request_certificate_status: false,
                session_resumption: true,
                allow_renegotiation: true,
                allow_version_fallback: true,
                server_hello_timeout: Some(Duration::from_secs(10)),
                max_handshake_message_len: 0x20000,
                certificate_handler: None,
                premaster_encryptor: None,
                strict_transport: None,
            },
        }
    }
}

impl fmt::Debug for SslConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SslConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl SslConfigBuilder {
    pub fn ssl3(mut self, enabled: bool) -> Self {
        self.config.ssl3 = enabled;
        self
    }

    pub fn tls10(mut self, enabled: bool) -> Self {
        self.config.tls10 = enabled;
        self
    }

    pub fn tls11(mut self, enabled: bool) -> Self {
        self.config.tls11 = enabled;
        self
    }

    pub fn tls12(mut self, enabled: bool) -> Self {
        self.config.tls12 = enabled;
        self
    }

    /// Enable exactly the versions in `[min, max]`.
    pub fn versions(mut self, min: ProtocolVersion, max: ProtocolVersion) -> Self {
        let on = |v: ProtocolVersion| v >= min && v <= max;
        self.config.ssl3 = on(ProtocolVersion::Ssl30);
        self.config.tls10 = on(ProtocolVersion::Tls10);
        self.config.tls11 = on(ProtocolVersion::Tls11);
        self.config.tls12 = on(ProtocolVersion::Tls12);
        self
    }

    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.config.cipher_suites = suites.to_vec();
        self
    }

    pub fn network_buffer_size(mut self, size: usize) -> Self {
        self.config.network_buffer_size = size;
        self
    }

    pub fn record_splitting(mut self, enabled: bool) -> Self {
        self.config.record_splitting = enabled;
        self
    }

    pub fn coalesce_handshake_records(mut self, enabled: bool) -> Self {
        self.config.coalesce_handshake_records = enabled;
        self
    }

    pub fn max_records_per_pass(mut self, n: usize) -> Self {
        self.config.max_records_per_pass = n;
        self
    }

    pub fn server_name(mut self, name: &str) -> Self {
        self.config.server_name = Some(name.to_string());
        self
    }

    pub fn next_protocols(mut self, protocols: &[&[u8]]) -> Self {
        self.config.next_protocols = protocols.iter().map(|p| p.to_vec()).collect();
        self
    }

    pub fn request_certificate_status(mut self, enabled: bool) -> Self {
        self.config.request_certificate_status = enabled;
        self
    }

    pub fn session_resumption(mut self, enabled: bool) -> Self {
        self.config.session_resumption = enabled;
        self
    }

    pub fn allow_renegotiation(mut self, enabled: bool) -> Self {
        self.config.allow_renegotiation = enabled;
        self
    }

    pub fn allow_version_fallback(mut self, enabled: bool) -> Self {
        self.config.allow_version_fallback = enabled;
        self
    }

    pub fn server_hello_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.server_hello_timeout = timeout;
        self
    }

    pub fn max_handshake_message_len(mut self, len: usize) -> Self {
        self.config.max_handshake_message_len = len;
        self
    }

    pub fn certificate_handler(mut self, handler: CertificateHandler) -> Self {
        self.config.certificate_handler = Some(handler);
        self
    }

    pub fn premaster_encryptor(mut self, encryptor: PremasterEncryptor) -> Self {
        self.config.premaster_encryptor = Some(encryptor);
        self
    }

    pub fn strict_transport(mut self, check: StrictTransportCheck) -> Self {
        self.config.strict_transport = Some(check);
        self
    }

    pub fn build(mut self) -> SslConfig {
        self.config.network_buffer_size = self.config.network_buffer_size.max(MIN_NETWORK_BUFFER_SIZE);
        self.config.max_records_per_pass = self.config.max_records_per_pass.max(1);
        self.config
    }
}
