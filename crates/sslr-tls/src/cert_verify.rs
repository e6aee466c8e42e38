//! Peer certificate verification seam.
//!
//! Chain validation, revocation fetching and any user prompt live outside
//! the engine; it only hands the received chain (and stapled OCSP response)
//! to the configured handler and acts on the verdict.

use std::sync::Arc;

use log::warn;

use crate::alert::AlertDescription;

/// What the handler gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct CertificateCheck<'a> {
    pub server_name: Option<&'a str>,
    /// DER certificates, leaf first.
    pub chain: &'a [Vec<u8>],
    pub ocsp_response: Option<&'a [u8]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateVerdict {
    /// Chain accepted. `key_bits` is the server key size.
    Trusted { key_bits: u32 },
    /// Chain accepted but revocation status could not be determined.
    /// The session is tainted: not resumable, no request pipelining.
    RevocationUnknown { key_bits: u32 },
    /// Chain refused; the alert to send.
    Rejected(AlertDescription),
}

impl CertificateVerdict {
    pub fn key_bits(&self) -> Option<u32> {
        match self {
            CertificateVerdict::Trusted { key_bits }
            | CertificateVerdict::RevocationUnknown { key_bits } => Some(*key_bits),
            CertificateVerdict::Rejected(_) => None,
        }
    }
}

/// Certificate verification callback.
pub type CertificateHandler = Arc<dyn Fn(&CertificateCheck<'_>) -> CertificateVerdict + Send + Sync>;

/// Run the handler, or accept with an unknown key size when none is set.
pub fn verify_certificate(
    handler: Option<&CertificateHandler>,
    check: &CertificateCheck<'_>,
) -> CertificateVerdict {
    match handler {
        Some(h) => h(check),
        None => {
            warn!(
                "no certificate handler configured, accepting chain of {} certificates unverified",
                check.chain.len()
            );
            CertificateVerdict::Trusted { key_bits: 0 }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_sees_chain_and_ocsp() {
        let handler: CertificateHandler = Arc::new(|c: &CertificateCheck<'_>| {
            if c.server_name == Some("bad.example") {
                CertificateVerdict::Rejected(AlertDescription::CertificateRevoked)
            } else if c.ocsp_response.is_none() {
                CertificateVerdict::RevocationUnknown { key_bits: 2048 }
            } else {
                CertificateVerdict::Trusted { key_bits: 2048 }
            }
        });
        let chain = vec![vec![1u8, 2, 3]];
        let mut check = CertificateCheck {
            server_name: Some("good.example"),
            chain: &chain,
            ocsp_response: Some(&[0x30]),
        };
        assert_eq!(
            verify_certificate(Some(&handler), &check),
            CertificateVerdict::Trusted { key_bits: 2048 }
        );
        check.ocsp_response = None;
        assert_eq!(
            verify_certificate(Some(&handler), &check).key_bits(),
            Some(2048)
        );
        check.server_name = Some("bad.example");
        assert_eq!(
            verify_certificate(Some(&handler), &check),
            CertificateVerdict::Rejected(AlertDescription::CertificateRevoked)
        );
    }

    #[test]
    fn test_default_accepts() {
        let chain = vec![vec![1u8]];
        let check = CertificateCheck {
            server_name: None,
            chain: &chain,
            ocsp_response: None,
        };
        assert_eq!(
            verify_certificate(None, &check),
            CertificateVerdict::Trusted { key_bits: 0 }
        );
    }
}
