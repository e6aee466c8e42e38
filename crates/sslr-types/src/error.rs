/// Cryptographic primitive errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("null or empty input")]
    NullInput,
    #[error("invalid argument")]
    InvalidArg,
    #[error("operation not supported")]
    NotSupported,
    #[error("key not loaded")]
    KeyNotSet,

    // Buffer errors
    #[error("buffer length not enough: need {need}, got {got}")]
    BufferTooSmall { need: usize, got: usize },
    #[error("input length {0} is not a multiple of the block size")]
    NotBlockAligned(usize),

    // Symmetric cipher errors
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("invalid iv length")]
    InvalidIvLength,

    #[error("random number generation failed")]
    RandomFailed,
}

/// TLS protocol errors.
///
/// Each variant corresponds to one error class of the engine; the alert sent
/// to the peer is derived from the variant, never from free-form text.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// Local resource problem (missing cipher/MAC object, bad internal state).
    #[error("internal error: {0}")]
    InternalError(String),
    #[error("memory allocation failed")]
    AllocationFailure,
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),
    #[error("illegal parameter: {0}")]
    IllegalParameter(String),
    #[error("decode error: {0}")]
    DecodeError(String),
    /// Integrity failure (bad MAC or bad padding, deliberately indistinguishable).
    #[error("bad record mac")]
    BadRecordMac,
    /// Ciphertext rejected by the length precheck before any cipher operation.
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("record overflow")]
    RecordOverflow,
    #[error("unsupported protocol version")]
    UnsupportedVersion,
    #[error("no shared cipher suite")]
    NoSharedCipherSuite,
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("certificate verification failed: {0}")]
    CertVerifyFailed(String),
    #[error("alert received: {0}")]
    AlertReceived(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("connection cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

impl TlsError {
    /// Returns true if the error originates locally rather than from the peer.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            TlsError::InternalError(_)
                | TlsError::AllocationFailure
                | TlsError::CryptoError(_)
                | TlsError::IoError(_)
                | TlsError::Cancelled
        )
    }
}
