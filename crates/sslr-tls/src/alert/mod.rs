//! Alert protocol.

use log::debug;
use sslr_types::TlsError;

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

/// Alert description codes for SSL 3.0 through TLS 1.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    /// TLS 1.0 only; later versions send BadRecordMac instead.
    DecryptionFailed = 21,
    RecordOverflow = 22,
    DecompressionFailure = 30,
    HandshakeFailure = 40,
    /// SSL 3.0 only.
    NoCertificate = 41,
    BadCertificate = 42,
    UnsupportedCertificate = 43,
    CertificateRevoked = 44,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    ExportRestriction = 60,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    InappropriateFallback = 86,
    UserCanceled = 90,
    NoRenegotiation = 100,
    UnsupportedExtension = 110,
    UnrecognizedName = 112,
    BadCertificateStatusResponse = 113,
}

/// An alert record body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl AlertLevel {
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            1 => Ok(AlertLevel::Warning),
            2 => Ok(AlertLevel::Fatal),
            _ => Err(v),
        }
    }
}

impl AlertDescription {
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        use AlertDescription::*;
        let d = match v {
            0 => CloseNotify,
            10 => UnexpectedMessage,
            20 => BadRecordMac,
            21 => DecryptionFailed,
            22 => RecordOverflow,
            30 => DecompressionFailure,
            40 => HandshakeFailure,
            41 => NoCertificate,
            42 => BadCertificate,
            43 => UnsupportedCertificate,
            44 => CertificateRevoked,
            45 => CertificateExpired,
            46 => CertificateUnknown,
            47 => IllegalParameter,
            48 => UnknownCa,
            49 => AccessDenied,
            50 => DecodeError,
            51 => DecryptError,
            60 => ExportRestriction,
            70 => ProtocolVersion,
            71 => InsufficientSecurity,
            80 => InternalError,
            86 => InappropriateFallback,
            90 => UserCanceled,
            100 => NoRenegotiation,
            110 => UnsupportedExtension,
            112 => UnrecognizedName,
            113 => BadCertificateStatusResponse,
            _ => return Err(v),
        };
        Ok(d)
    }
}

impl Alert {
    pub fn fatal(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Fatal,
            description,
        }
    }

    pub fn warning(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Warning,
            description,
        }
    }

    pub fn encode(&self) -> [u8; 2] {
        [self.level as u8, self.description as u8]
    }

    pub fn decode(data: &[u8]) -> Result<Self, TlsError> {
        if data.len() != 2 {
            return Err(TlsError::DecodeError(format!(
                "alert body of {} bytes",
                data.len()
            )));
        }
        let level = AlertLevel::from_u8(data[0])
            .map_err(|v| TlsError::IllegalParameter(format!("alert level {v}")))?;
        let description = AlertDescription::from_u8(data[1])
            .map_err(|v| TlsError::IllegalParameter(format!("alert description {v}")))?;
        Ok(Self { level, description })
    }

    /// Decode every alert in an alert record body.
    ///
    /// A record may carry several two-byte alerts back to back. Warnings
    /// with a description this engine does not know are skipped; an unknown
    /// fatal description is still an error.
    pub fn decode_all(data: &[u8]) -> Result<Vec<Self>, TlsError> {
        if data.is_empty() || data.len() % 2 != 0 {
            return Err(TlsError::DecodeError(format!(
                "alert body of {} bytes",
                data.len()
            )));
        }
        let mut alerts = Vec::with_capacity(data.len() / 2);
        for pair in data.chunks_exact(2) {
            let level = AlertLevel::from_u8(pair[0])
                .map_err(|v| TlsError::IllegalParameter(format!("alert level {v}")))?;
            match AlertDescription::from_u8(pair[1]) {
                Ok(description) => alerts.push(Self { level, description }),
                Err(v) if level == AlertLevel::Warning => {
                    debug!("ignoring unknown warning alert {v}");
                }
                Err(v) => {
                    return Err(TlsError::IllegalParameter(format!("alert description {v}")))
                }
            }
        }
        Ok(alerts)
    }
}

/// Map an engine error to the alert reported to the peer.
///
/// Integrity failures collapse onto `BadRecordMac`; the caller normalises
/// the result for the negotiated version before sending.
pub fn alert_for_error(err: &TlsError) -> AlertDescription {
    match err {
        TlsError::InternalError(_)
        | TlsError::AllocationFailure
        | TlsError::CryptoError(_)
        | TlsError::IoError(_) => AlertDescription::InternalError,
        TlsError::UnexpectedMessage(_) => AlertDescription::UnexpectedMessage,
        TlsError::IllegalParameter(_) => AlertDescription::IllegalParameter,
        TlsError::DecodeError(_) => AlertDescription::DecodeError,
        TlsError::BadRecordMac => AlertDescription::BadRecordMac,
        TlsError::DecryptionFailed => AlertDescription::DecryptionFailed,
        TlsError::RecordOverflow => AlertDescription::RecordOverflow,
        TlsError::UnsupportedVersion => AlertDescription::ProtocolVersion,
        TlsError::NoSharedCipherSuite | TlsError::HandshakeFailed(_) => {
            AlertDescription::HandshakeFailure
        }
        TlsError::CertVerifyFailed(_) => AlertDescription::BadCertificate,
        TlsError::Cancelled => AlertDescription::UserCanceled,
        TlsError::AlertReceived(_) | TlsError::ConnectionClosed => AlertDescription::CloseNotify,
    }
}

/// Whether an error should be answered with an alert at all. Peer alerts
/// and transport loss are not echoed back.
pub fn error_sends_alert(err: &TlsError) -> bool {
    !matches!(
        err,
        TlsError::AlertReceived(_) | TlsError::ConnectionClosed | TlsError::IoError(_)
    )
}
