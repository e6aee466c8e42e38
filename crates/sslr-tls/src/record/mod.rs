//! Record layer: wire records, per-direction cipher state, protection and
//! the streaming send/receive engine.

pub mod cipher_state;
pub mod codec;
pub mod layer;

use sslr_types::TlsError;

/// Maximum plaintext fragment length (2^14).
pub const MAX_PLAINTEXT_LENGTH: usize = 0x4000;
/// Maximum ciphertext fragment length (2^14 + 2048).
pub const MAX_CIPHERTEXT_LENGTH: usize = 0x4800;
/// Record header: type(1) || version(2) || length(2).
pub const RECORD_HEADER_LEN: usize = 5;

/// Record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl ContentType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            20 => Some(ContentType::ChangeCipherSpec),
            21 => Some(ContentType::Alert),
            22 => Some(ContentType::Handshake),
            23 => Some(ContentType::ApplicationData),
            _ => None,
        }
    }
}

/// One record, either plaintext or protected depending on pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub content_type: ContentType,
    pub version: u16,
    pub fragment: Vec<u8>,
}

impl Record {
    pub fn new(content_type: ContentType, version: u16, fragment: Vec<u8>) -> Self {
        Self {
            content_type,
            version,
            fragment,
        }
    }

    /// Serialize with the 5-byte header.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_HEADER_LEN + self.fragment.len());
        buf.push(self.content_type as u8);
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&(self.fragment.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.fragment);
        buf
    }

    /// Parse one complete record from the front of `data`.
    /// Returns the record and the number of bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Record, usize), TlsError> {
        if data.len() < RECORD_HEADER_LEN {
            return Err(TlsError::DecodeError("incomplete record header".into()));
        }
        let (content_type, version, length) = parse_header(&data[..RECORD_HEADER_LEN])?;
        let total = RECORD_HEADER_LEN + length;
        if data.len() < total {
            return Err(TlsError::DecodeError("incomplete record body".into()));
        }
        Ok((
            Record::new(content_type, version, data[RECORD_HEADER_LEN..total].to_vec()),
            total,
        ))
    }
}

/// Validate a record header and return (type, version, length).
pub(crate) fn parse_header(h: &[u8]) -> Result<(ContentType, u16, usize), TlsError> {
    let content_type = ContentType::from_u8(h[0])
        .ok_or_else(|| TlsError::UnexpectedMessage(format!("record content type {}", h[0])))?;
    if h[1] < 3 {
        return Err(TlsError::IllegalParameter(format!(
            "record major version {}",
            h[1]
        )));
    }
    let version = u16::from_be_bytes([h[1], h[2]]);
    let length = u16::from_be_bytes([h[3], h[4]]) as usize;
    if length > MAX_CIPHERTEXT_LENGTH {
        return Err(TlsError::RecordOverflow);
    }
    Ok((content_type, version, length))
}
